//! NooBaa Controller
//!
//! Watches NooBaa resources and the children they own, and runs one
//! [`System`] pass per trigger. Passes for the same object are serialized
//! by the runtime.

use crate::cluster::{KubeAuditRecorder, KubeClusterClient};
use crate::config::EngineConfig;
use crate::crd::NooBaa;
use crate::error::{Error, ReconcileOutcome, Result};
use crate::metrics::Metrics;
use crate::nb::RpcConnector;
use crate::system::{Context, System, SystemRequest};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::{watcher, Config};
use kube::runtime::{predicates, reflector, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Name the controller reports events under
pub const CONTROLLER_NAME: &str = "noobaa-operator";

/// State shared by every reconcile call
pub struct ControllerData {
    pub ctx: Context<KubeClusterClient>,
    pub metrics: Metrics,
    pub shutdown: CancellationToken,
}

impl ControllerData {
    /// Wire the Kubernetes and management API adapters
    pub fn new(client: Client, config: Arc<EngineConfig>, metrics: Metrics, shutdown: CancellationToken) -> Self {
        let connector = RpcConnector::new(config.rpc_timeout, config.insecure_tls);
        Self {
            ctx: Context {
                cluster: Arc::new(KubeClusterClient::new(client.clone())),
                connector: Arc::new(connector),
                recorder: Arc::new(KubeAuditRecorder::new(client, CONTROLLER_NAME)),
                config,
            },
            metrics,
            shutdown,
        }
    }
}

fn scoped<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Run the controller until `data.shutdown` is cancelled
pub async fn run(client: Client, namespace: Option<String>, data: ControllerData) -> Result<()> {
    let ns = namespace.as_deref();
    info!(namespace = ns.unwrap_or("<all>"), "Starting NooBaa controller");

    // Only generation changes of a NooBaa trigger a pass; status writes do not
    let (reader, writer) = reflector::store();
    let noobaas = reflector(writer, watcher(scoped::<NooBaa>(&client, ns), Config::default()))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);

    let shutdown = data.shutdown.clone();
    Controller::for_stream(noobaas, reader)
        .owns(scoped::<StatefulSet>(&client, ns), Config::default())
        .owns(scoped::<Service>(&client, ns), Config::default())
        .owns(scoped::<Secret>(&client, ns), Config::default())
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile, error_policy, Arc::new(data))
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(name = %obj.name, "Reconciled"),
                Err(err) => warn!("Reconcile failed: {}", err),
            }
        })
        .await;

    info!("NooBaa controller stopped");
    Ok(())
}

/// Map the engine outcome to a controller action
pub fn action_for(outcome: ReconcileOutcome) -> Action {
    match outcome {
        ReconcileOutcome::Done | ReconcileOutcome::AwaitChange => Action::await_change(),
        ReconcileOutcome::RequeueAfter(delay) => Action::requeue(delay),
    }
}

async fn reconcile(noobaa: Arc<NooBaa>, data: Arc<ControllerData>) -> Result<Action> {
    let namespace = noobaa
        .namespace()
        .ok_or_else(|| Error::Internal(format!("NooBaa {} has no namespace", noobaa.name_any())))?;
    let request = SystemRequest::new(namespace, noobaa.name_any());

    let started = Instant::now();
    let mut system = System::new(request, data.ctx.clone(), data.shutdown.child_token())?;
    let outcome = system.reconcile().await;
    data.metrics.observe(outcome, started.elapsed());

    Ok(action_for(outcome))
}

fn error_policy(noobaa: Arc<NooBaa>, err: &Error, data: Arc<ControllerData>) -> Action {
    warn!(system = %noobaa.name_any(), "Reconcile error: {}", err);
    data.metrics.observe_error();
    Action::requeue(data.ctx.config.retry_delay)
}
