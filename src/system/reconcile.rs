//! The reconcile pass: ordered convergence steps, status persistence and
//! the retry decision.

use super::readme::{self, ReadmeParams};
use super::{set_controller_reference, System};
use crate::bundle::{MONGO_IMAGE_PLACEHOLDER, NOOBAA_IMAGE_PLACEHOLDER};
use crate::crd::{NooBaa, SystemPhase};
use crate::domain::ports::{ClusterClient, KubeObject};
use crate::error::{combine_errors, Error, ReconcileError, ReconcileOutcome, ReconcileResult};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use tracing::{debug, error, info, instrument, warn};

impl<C: ClusterClient> System<C> {
    /// Run one full pass and decide what the controller does next.
    ///
    /// A missing NooBaa resource is a successful no-op. Otherwise the status
    /// is always written back, and its error is combined with the error of
    /// the convergence steps so a rejection is never hidden by a failed write.
    #[instrument(skip(self), fields(namespace = %self.request.namespace, system = %self.request.name))]
    pub async fn reconcile(&mut self) -> ReconcileOutcome {
        info!("Start reconcile");
        let retry_delay = self.config().retry_delay;

        let found = self
            .guard(
                self.ctx
                    .cluster
                    .get::<NooBaa>(&self.request.namespace, &self.request.name),
            )
            .await;
        match found {
            Ok(Some(noobaa)) => {
                self.stored_status = noobaa.status.clone();
                self.noobaa = noobaa;
            }
            Ok(None) => {
                info!("NooBaa not found or already deleted, skip reconcile");
                return ReconcileOutcome::Done;
            }
            Err(err) => {
                warn!("Temporary error reading NooBaa: {}, retry in {:?}", err, retry_delay);
                return ReconcileOutcome::RequeueAfter(retry_delay);
            }
        }

        let system_err = self.reconcile_system().await.err();
        let status_err = self.update_system_status().await.err();
        let combined = combine_errors([system_err, status_err]);

        match &combined {
            None => info!("Done"),
            Some(err) if err.is_persistent() => error!("Persistent error: {}", err),
            Some(err) => warn!("Temporary error: {}, retry in {:?}", err, retry_delay),
        }
        ReconcileOutcome::from_error(combined.as_ref(), retry_delay)
    }

    /// Run the convergence steps in order, stopping at the first failure
    pub async fn reconcile_system(&mut self) -> ReconcileResult<()> {
        self.set_phase(SystemPhase::Verifying);
        self.check_spec_image().await?;

        self.set_phase(SystemPhase::Creating);
        self.reconcile_secret_server().await.map_err(|e| self.fail(e))?;

        let app = self
            .reconcile_object(self.core_app.clone(), self.desired_core_app())
            .await
            .map_err(|e| self.fail(e))?;
        self.core_app = app;

        let mgmt = self
            .reconcile_object(self.service_mgmt.clone(), self.desired_service("noobaa-mgmt"))
            .await
            .map_err(|e| self.fail(e))?;
        self.service_mgmt = mgmt;

        let s3 = self
            .reconcile_object(self.service_s3.clone(), self.desired_service("noobaa-s3"))
            .await
            .map_err(|e| self.fail(e))?;
        self.service_s3 = s3;

        let mgmt_status = self.check_service_status(&self.service_mgmt, "mgmt-https").await;
        let s3_status = self.check_service_status(&self.service_s3, "s3-https").await;
        let services = &mut self.status_mut().services;
        services.service_mgmt = mgmt_status;
        services.service_s3 = s3_status;

        self.set_phase(SystemPhase::WaitingToConnect);
        self.init_nb_client().await.map_err(|e| self.fail(e))?;

        self.set_phase(SystemPhase::Configuring);
        self.reconcile_secret_op().await.map_err(|e| self.fail(e))?;
        self.reconcile_secret_admin().await.map_err(|e| self.fail(e))?;

        self.set_phase(SystemPhase::Ready);
        self.complete()
    }

    fn fail(&mut self, err: ReconcileError) -> ReconcileError {
        self.set_error_condition(&err);
        err
    }

    /// Own `obj` and converge it with `desired`.
    ///
    /// Returns the object as stored in the cluster.
    pub async fn reconcile_object<K, F>(&self, mut obj: K, desired: F) -> ReconcileResult<K>
    where
        K: KubeObject,
        F: FnOnce(&mut K) + Send,
    {
        let kind = K::kind(&()).to_string();
        let name = obj.meta().name.clone().unwrap_or_default();
        let owner = self.owner_ref()?;

        // An object controlled by someone else is left exactly as stored
        let mut owner_err = None;
        let owner_slot = &mut owner_err;
        let result = self
            .guard(self.ctx.cluster.create_or_update(&mut obj, move |o: &mut K| {
                match set_controller_reference(o.meta_mut(), owner) {
                    Ok(()) => desired(o),
                    Err(err) => *owner_slot = Some(err),
                }
            }))
            .await;
        let op = owner_err.map_or(result, Err).map_err(|err| {
            error!(kind = %kind, name = %name, "Reconcile object failed: {}", err);
            err
        })?;

        info!(kind = %kind, name = %name, op = %op, "Reconciled object");
        Ok(obj)
    }

    /// Desired state of the core workload
    pub fn desired_core_app(&self) -> impl FnOnce(&mut StatefulSet) + Send + 'static {
        let name = self.request.name.clone();
        let service_name = self.service_mgmt.metadata.name.clone().unwrap_or_default();
        let service_account = self.config().service_account.clone();
        let actual_image = self
            .noobaa
            .status
            .as_ref()
            .and_then(|s| s.actual_image.clone())
            .unwrap_or_default();
        let mongo_image = self
            .noobaa
            .spec
            .mongo_image
            .clone()
            .unwrap_or_else(|| self.config().default_mongo_image.clone());
        let pull_secret = self.noobaa.spec.image_pull_secret.clone();
        let storage_class = self.noobaa.spec.storage_class_name.clone();

        move |app: &mut StatefulSet| {
            let spec = app.spec.get_or_insert_with(Default::default);

            let labels = spec
                .template
                .metadata
                .get_or_insert_with(Default::default)
                .labels
                .get_or_insert_with(Default::default);
            for label in ["noobaa-core", "noobaa-mgmt", "noobaa-s3"] {
                labels.insert(label.to_string(), name.clone());
            }
            spec.selector
                .match_labels
                .get_or_insert_with(Default::default)
                .insert("noobaa-core".to_string(), name.clone());
            spec.service_name = service_name;

            let pod = spec.template.spec.get_or_insert_with(Default::default);
            pod.service_account_name = Some(service_account);
            for c in pod.init_containers.iter_mut().flatten() {
                if c.image.as_deref() == Some(NOOBAA_IMAGE_PLACEHOLDER) {
                    c.image = Some(actual_image.clone());
                }
            }
            for c in pod.containers.iter_mut() {
                match c.image.as_deref() {
                    Some(NOOBAA_IMAGE_PLACEHOLDER) => c.image = Some(actual_image.clone()),
                    Some(MONGO_IMAGE_PLACEHOLDER) => c.image = Some(mongo_image.clone()),
                    _ => {}
                }
            }
            pod.image_pull_secrets = pull_secret.map(|s| vec![s]);

            // Claims are never owned: the platform refuses owner references on them
            for pvc in spec.volume_claim_templates.iter_mut().flatten() {
                pvc.spec.get_or_insert_with(Default::default).storage_class_name =
                    storage_class.clone();
            }
        }
    }

    /// Desired state of a service: select the pods carrying `label`
    pub fn desired_service(&self, label: &'static str) -> impl FnOnce(&mut Service) + Send + 'static {
        let name = self.request.name.clone();
        move |svc: &mut Service| {
            svc.spec
                .get_or_insert_with(Default::default)
                .selector
                .get_or_insert_with(Default::default)
                .insert(label.to_string(), name);
        }
    }

    /// Connect to the management endpoint and check it answers
    pub(super) async fn init_nb_client(&mut self) -> ReconcileResult<()> {
        let endpoint = self
            .noobaa
            .status
            .as_ref()
            .and_then(|s| s.services.service_mgmt.node_ports.first().cloned())
            .ok_or_else(|| Error::NotReady("core pod port not ready yet".to_string()))?;

        self.refresh_secret_op().await?;
        let mut client = self.ctx.connector.connect(&endpoint)?;
        client.set_auth_token(self.secret_op_value("auth_token"));
        self.guard(client.read_auth()).await?;

        info!(endpoint = %endpoint, "Connected to management API");
        self.nb_client = Some(client);
        Ok(())
    }

    /// Write the in-memory status, stamping the observed generation.
    ///
    /// Nothing is written when the pass left the stored status as it was,
    /// so a converged system does not trigger its own watch.
    pub async fn update_system_status(&mut self) -> ReconcileResult<()> {
        let generation = self.noobaa.metadata.generation.unwrap_or_default();
        let stored = self.stored_status.take();
        let status = self.status_mut();
        status.observed_generation = generation;
        if let Some(stored) = &stored {
            status.carry_condition_times(stored);
        }
        if stored.as_ref() == self.noobaa.status.as_ref() {
            debug!("Status unchanged, skip update");
            self.stored_status = stored;
            return Ok(());
        }

        info!("Updating noobaa status");
        let updated = self.guard(self.ctx.cluster.update_status(&self.noobaa)).await?;
        self.stored_status = updated.status.clone();
        self.noobaa = updated;
        Ok(())
    }

    /// Publish the readme and the admin account reference
    pub(super) fn complete(&mut self) -> ReconcileResult<()> {
        let (admin, admin_ns) = readme::name_ns(&self.secret_admin)?;
        let text = readme::render(&ReadmeParams {
            secret_admin: (admin, admin_ns),
            service_mgmt: readme::name_ns(&self.service_mgmt)?,
            service_s3: readme::name_ns(&self.service_s3)?,
        });
        let admin = admin.to_string();
        let admin_ns = admin_ns.to_string();

        let status = self.status_mut();
        status.readme = text;
        status.accounts.admin.secret_ref.name = Some(admin);
        status.accounts.admin.secret_ref.namespace = Some(admin_ns);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use crate::bundle;
    use crate::cluster::Verb;
    use crate::crd::{ConditionStatus, ConditionType, NooBaa, SystemPhase};
    use crate::domain::ports::ClusterClient;
    use crate::error::ReconcileOutcome;
    use k8s_openapi::api::apps::v1::StatefulSet;
    use k8s_openapi::api::core::v1::{LocalObjectReference, Secret, Service};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use std::time::Duration;

    const RETRY: ReconcileOutcome = ReconcileOutcome::RequeueAfter(Duration::from_secs(2));

    fn stored_noobaa(env: &TestEnv) -> NooBaa {
        env.cluster.peek("ns", "noobaa").unwrap()
    }

    #[tokio::test]
    async fn test_missing_system_is_noop() {
        let env = TestEnv::new();
        let mut s = env.system("ns", "noobaa");
        assert_eq!(s.reconcile().await, ReconcileOutcome::Done);
        assert_eq!(env.cluster.write_count(), 0);
    }

    #[tokio::test]
    async fn test_full_pass_reaches_ready() {
        let env = TestEnv::new();
        seed_running_system(&env, "ns", "noobaa", None);

        let mut s = env.system("ns", "noobaa");
        assert_eq!(s.reconcile().await, ReconcileOutcome::Done);

        let nb = stored_noobaa(&env);
        let status = nb.status.unwrap();
        assert_eq!(status.phase, Some(SystemPhase::Ready));
        assert_eq!(status.observed_generation, nb.metadata.generation.unwrap());
        assert_eq!(status.actual_image.as_deref(), Some("noobaa/noobaa-core:5"));
        assert_eq!(status.accounts.admin.secret_ref.name.as_deref(), Some("noobaa-admin"));
        assert!(status.readme.contains("noobaa-admin"));
        assert_eq!(status.services.service_mgmt.node_ports.len(), 2);
        assert_eq!(env.nb.endpoints(), vec!["https://192.168.1.1:30443"]);

        let app: StatefulSet = env.cluster.peek("ns", "noobaa-core").unwrap();
        assert_eq!(app.metadata.owner_references.unwrap()[0].uid, nb.metadata.uid.unwrap());
        let spec = app.spec.unwrap();
        assert_eq!(spec.service_name, "noobaa-mgmt");
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some("noobaa-operator"));
        let images: Vec<_> = pod.containers.iter().filter_map(|c| c.image.clone()).collect();
        assert_eq!(images, vec!["noobaa/noobaa-core:5", "centos/mongodb-36-centos7"]);
        assert_eq!(
            pod.init_containers.unwrap()[0].image.as_deref(),
            Some("noobaa/noobaa-core:5")
        );
        assert!(pod.image_pull_secrets.is_none());
        for pvc in spec.volume_claim_templates.unwrap() {
            assert!(pvc.metadata.owner_references.is_none());
        }
    }

    #[tokio::test]
    async fn test_second_pass_is_noop() {
        let env = TestEnv::new();
        seed_running_system(&env, "ns", "noobaa", None);

        let mut s = env.system("ns", "noobaa");
        assert_eq!(s.reconcile().await, ReconcileOutcome::Done);
        let before = env.cluster.snapshot();
        env.cluster.clear_calls();
        env.nb.clear_calls();

        let mut s = env.system("ns", "noobaa");
        assert_eq!(s.reconcile().await, ReconcileOutcome::Done);

        assert_eq!(env.cluster.write_count(), 0);
        assert_eq!(env.nb.calls(), vec!["read_auth"]);
        assert_eq!(env.cluster.snapshot(), before);
        assert_eq!(stored_noobaa(&env).status.unwrap().phase, Some(SystemPhase::Ready));
    }

    #[tokio::test]
    async fn test_converged_status_is_stable_across_passes() {
        let env = TestEnv::new();
        seed_running_system(&env, "ns", "noobaa", None);

        let mut s = env.system("ns", "noobaa");
        s.reconcile().await;
        let first = stored_noobaa(&env);

        let mut s = env.system("ns", "noobaa");
        assert_eq!(s.reconcile().await, ReconcileOutcome::Done);
        let second = stored_noobaa(&env);

        assert_eq!(first.metadata.resource_version, second.metadata.resource_version);
        assert_eq!(first.status, second.status);
    }

    #[tokio::test]
    async fn test_rejected_system_stops_writing_status() {
        let env = TestEnv::new();
        seed_running_system(&env, "ns", "noobaa", Some("noobaa/noobaa-core:6.0.0"));

        let mut s = env.system("ns", "noobaa");
        assert_eq!(s.reconcile().await, ReconcileOutcome::AwaitChange);
        let version = stored_noobaa(&env).metadata.resource_version;
        env.cluster.clear_calls();

        for _ in 0..2 {
            let mut s = env.system("ns", "noobaa");
            assert_eq!(s.reconcile().await, ReconcileOutcome::AwaitChange);
        }
        assert_eq!(env.cluster.write_count(), 0);
        assert_eq!(stored_noobaa(&env).metadata.resource_version, version);
        assert_eq!(stored_noobaa(&env).status.unwrap().phase, Some(SystemPhase::Rejected));
    }

    #[tokio::test]
    async fn test_spec_settings_reach_workload() {
        let env = TestEnv::new();
        seed_running_system(&env, "ns", "noobaa", None);
        let mut nb = stored_noobaa(&env);
        nb.spec.mongo_image = Some("mongo:3.6".into());
        nb.spec.storage_class_name = Some("fast".into());
        nb.spec.image_pull_secret = Some(LocalObjectReference {
            name: Some("pull".into()),
        });
        env.cluster.insert(&nb).unwrap();

        let mut s = env.system("ns", "noobaa");
        assert_eq!(s.reconcile().await, ReconcileOutcome::Done);

        let app: StatefulSet = env.cluster.peek("ns", "noobaa-core").unwrap();
        let spec = app.spec.unwrap();
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.containers[1].image.as_deref(), Some("mongo:3.6"));
        assert_eq!(pod.image_pull_secrets.unwrap()[0].name.as_deref(), Some("pull"));
        for pvc in spec.volume_claim_templates.unwrap() {
            assert_eq!(pvc.spec.unwrap().storage_class_name.as_deref(), Some("fast"));
        }
    }

    #[tokio::test]
    async fn test_no_endpoint_is_transient() {
        let env = TestEnv::new();
        env.cluster.insert(&test_noobaa("ns", "noobaa", None)).unwrap();

        let mut s = env.system("ns", "noobaa");
        assert_eq!(s.reconcile().await, RETRY);

        let status = stored_noobaa(&env).status.unwrap();
        assert_eq!(status.phase, Some(SystemPhase::WaitingToConnect));
        let degraded = status
            .condition(crate::crd::ConditionType::Degraded)
            .unwrap();
        assert_eq!(degraded.reason, "ReconcileFailed");
        assert!(degraded.message.contains("core pod port not ready yet"));

        // Children were still converged before the failing step
        let mgmt: Option<Service> = env.cluster.peek("ns", "noobaa-mgmt");
        assert!(mgmt.is_some());
        let server: Option<Secret> = env.cluster.peek("ns", "noobaa-server");
        assert!(server.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_management_api_is_transient() {
        let env = TestEnv::new();
        seed_running_system(&env, "ns", "noobaa", None);
        env.nb.fail_read_auth();

        let mut s = env.system("ns", "noobaa");
        assert_eq!(s.reconcile().await, RETRY);
        assert_eq!(
            stored_noobaa(&env).status.unwrap().phase,
            Some(SystemPhase::WaitingToConnect)
        );
        let op: Option<Secret> = env.cluster.peek("ns", "noobaa-operator");
        assert!(op.is_none());
    }

    #[tokio::test]
    async fn test_rejected_image_waits_for_change() {
        let env = TestEnv::new();
        seed_running_system(&env, "ns", "noobaa", Some("noobaa/noobaa-core:6.0.0"));

        let mut s = env.system("ns", "noobaa");
        assert_eq!(s.reconcile().await, ReconcileOutcome::AwaitChange);

        let status = stored_noobaa(&env).status.unwrap();
        assert_eq!(status.phase, Some(SystemPhase::Rejected));
        let core: Option<StatefulSet> = env.cluster.peek("ns", "noobaa-core");
        assert!(core.is_none());
    }

    #[tokio::test]
    async fn test_status_write_failure_does_not_mask_rejection() {
        let env = TestEnv::new();
        seed_running_system(&env, "ns", "noobaa", Some("not a valid ref!!"));
        env.cluster.fail_next(Verb::UpdateStatus, "NooBaa");

        let mut s = env.system("ns", "noobaa");
        assert_eq!(s.reconcile().await, ReconcileOutcome::AwaitChange);
    }

    #[tokio::test]
    async fn test_status_write_failure_alone_is_transient() {
        let env = TestEnv::new();
        seed_running_system(&env, "ns", "noobaa", None);
        env.cluster.fail_next(Verb::UpdateStatus, "NooBaa");

        let mut s = env.system("ns", "noobaa");
        assert_eq!(s.reconcile().await, RETRY);
    }

    #[tokio::test]
    async fn test_cancelled_pass_is_transient() {
        let env = TestEnv::new();
        seed_running_system(&env, "ns", "noobaa", None);
        env.cancel.cancel();

        let mut s = env.system("ns", "noobaa");
        assert_eq!(s.reconcile().await, RETRY);
        assert_eq!(env.cluster.write_count(), 0);
    }

    #[tokio::test]
    async fn test_observed_generation_follows_spec_changes() {
        let env = TestEnv::new();
        seed_running_system(&env, "ns", "noobaa", None);

        let mut s = env.system("ns", "noobaa");
        s.reconcile().await;

        let mut nb = stored_noobaa(&env);
        nb.spec.storage_class_name = Some("fast".into());
        let nb = env.cluster.update(&nb).await.unwrap();
        assert_eq!(nb.metadata.generation, Some(2));

        let mut s = env.system("ns", "noobaa");
        assert_eq!(s.reconcile().await, ReconcileOutcome::Done);
        assert_eq!(stored_noobaa(&env).status.unwrap().observed_generation, 2);
    }

    #[tokio::test]
    async fn test_conflict_mid_pass_is_transient() {
        let env = TestEnv::new();
        seed_running_system(&env, "ns", "noobaa", None);
        // The token write of the operator secret is the first secret update
        env.cluster.conflict_next(Verb::Update, "Secret");

        let mut s = env.system("ns", "noobaa");
        assert_eq!(s.reconcile().await, RETRY);

        let status = stored_noobaa(&env).status.unwrap();
        assert_eq!(status.phase, Some(SystemPhase::Configuring));
        let degraded = status.condition(ConditionType::Degraded).unwrap();
        assert_eq!(degraded.status, ConditionStatus::True);
        assert_eq!(degraded.reason, "ReconcileFailed");
        assert!(degraded.message.contains("Conflict"));

        let mut s = env.system("ns", "noobaa");
        assert_eq!(s.reconcile().await, ReconcileOutcome::Done);
        assert_eq!(stored_noobaa(&env).status.unwrap().phase, Some(SystemPhase::Ready));
    }

    #[tokio::test]
    async fn test_child_controlled_elsewhere_is_not_written() {
        let env = TestEnv::new();
        seed_running_system(&env, "ns", "noobaa", None);
        let mut app = bundle::core_app().unwrap();
        app.metadata.namespace = Some("ns".into());
        app.metadata.name = Some("noobaa-core".into());
        app.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "apps/v1".into(),
            kind: "Deployment".into(),
            name: "other".into(),
            uid: "other-uid".into(),
            controller: Some(true),
            block_owner_deletion: None,
        }]);
        let before = env.cluster.insert(&app).unwrap();

        let mut s = env.system("ns", "noobaa");
        assert_eq!(s.reconcile().await, RETRY);

        let after: StatefulSet = env.cluster.peek("ns", "noobaa-core").unwrap();
        assert_eq!(after, before);
        assert!(!env
            .cluster
            .calls()
            .iter()
            .any(|c| c.kind == "StatefulSet" && c.verb.is_write()));
        let degraded = stored_noobaa(&env)
            .status
            .unwrap()
            .condition(ConditionType::Degraded)
            .cloned()
            .unwrap();
        assert!(degraded.message.contains("already controlled by Deployment other"));
    }
}
