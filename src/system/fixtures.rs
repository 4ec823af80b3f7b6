//! Test environment: an in-memory cluster, a recording audit sink and a
//! scripted management API.

use super::{Context, System, SystemRequest};
use crate::bundle;
use crate::cluster::{MemoryCluster, MemoryRecorder};
use crate::config::EngineConfig;
use crate::crd::{NooBaa, NooBaaSpec};
use crate::domain::ports::{
    AccessKeys, AccountInfo, AuthReply, CreateAuthParams, CreateSystemParams, ListAccountsReply,
    ManagementApi, ManagementConnector, ReadAuthReply,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    LoadBalancerIngress, LoadBalancerStatus, Pod, PodStatus, Secret, Service, ServiceStatus,
};
use kube::api::ObjectMeta;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const FAKE_AUTH_TOKEN: &str = "auth-token";
pub const FAKE_SYSTEM_TOKEN: &str = "system-token";

// =============================================================================
// Scripted Management API
// =============================================================================

#[derive(Default)]
struct FakeState {
    calls: Vec<&'static str>,
    endpoints: Vec<String>,
    token: Option<String>,
    fail_read_auth: bool,
    fail_create_auth: bool,
    fail_create_system: bool,
}

/// Handle on the scripted management API shared by every client it hands out
#[derive(Clone, Default)]
pub struct FakeManagement {
    state: Arc<Mutex<FakeState>>,
}

impl FakeManagement {
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.state.lock().endpoints.clone()
    }

    pub fn current_token(&self) -> Option<String> {
        self.state.lock().token.clone()
    }

    pub fn fail_read_auth(&self) {
        self.state.lock().fail_read_auth = true;
    }

    pub fn fail_create_auth(&self) {
        self.state.lock().fail_create_auth = true;
    }

    pub fn fail_create_system(&self) {
        self.state.lock().fail_create_system = true;
    }

    fn record(&self, call: &'static str, fail: impl Fn(&FakeState) -> bool) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if fail(&state) {
            return Err(Error::Api {
                method: call.to_string(),
                code: "UNAUTHORIZED".to_string(),
                message: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

impl ManagementConnector for FakeManagement {
    fn connect(&self, endpoint: &str) -> Result<Box<dyn ManagementApi>> {
        self.state.lock().endpoints.push(endpoint.to_string());
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl ManagementApi for FakeManagement {
    fn set_auth_token(&mut self, token: &str) {
        self.state.lock().token = Some(token.to_string());
    }

    async fn read_auth(&self) -> Result<ReadAuthReply> {
        self.record("read_auth", |s| s.fail_read_auth)?;
        Ok(ReadAuthReply::default())
    }

    async fn create_auth(&self, _params: CreateAuthParams) -> Result<AuthReply> {
        self.record("create_auth", |s| s.fail_create_auth)?;
        Ok(AuthReply {
            token: FAKE_AUTH_TOKEN.to_string(),
            operator_token: None,
        })
    }

    async fn create_system(&self, _params: CreateSystemParams) -> Result<AuthReply> {
        self.record("create_system", |s| s.fail_create_system)?;
        Ok(AuthReply {
            token: FAKE_SYSTEM_TOKEN.to_string(),
            operator_token: Some("operator-token".to_string()),
        })
    }

    async fn list_accounts(&self) -> Result<ListAccountsReply> {
        self.record("list_accounts", |_| false)?;
        let keys = |a: &str, s: &str| AccessKeys {
            access_key: a.to_string(),
            secret_key: s.to_string(),
        };
        Ok(ListAccountsReply {
            accounts: vec![
                AccountInfo {
                    name: "user".to_string(),
                    email: "user@noobaa.io".to_string(),
                    access_keys: vec![keys("AK0", "SK0")],
                },
                AccountInfo {
                    name: "admin".to_string(),
                    email: "admin@noobaa.io".to_string(),
                    access_keys: vec![keys("AK1", "SK1"), keys("AK2", "SK2")],
                },
                AccountInfo {
                    name: "admin-2".to_string(),
                    email: "admin@noobaa.io".to_string(),
                    access_keys: vec![keys("AK3", "SK3")],
                },
            ],
        })
    }
}

// =============================================================================
// Environment
// =============================================================================

pub struct TestEnv {
    pub cluster: Arc<MemoryCluster>,
    pub recorder: Arc<MemoryRecorder>,
    pub nb: FakeManagement,
    pub cancel: CancellationToken,
    pub config: Arc<EngineConfig>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            cluster: Arc::new(MemoryCluster::new()),
            recorder: Arc::new(MemoryRecorder::new()),
            nb: FakeManagement::default(),
            cancel: CancellationToken::new(),
            config: Arc::new(EngineConfig::default()),
        }
    }

    pub fn context(&self) -> Context<MemoryCluster> {
        Context {
            cluster: self.cluster.clone(),
            connector: Arc::new(self.nb.clone()),
            recorder: self.recorder.clone(),
            config: self.config.clone(),
        }
    }

    /// A fresh system, as the controller builds one per pass
    pub fn system(&self, ns: &str, name: &str) -> System<MemoryCluster> {
        System::new(SystemRequest::new(ns, name), self.context(), self.cancel.clone()).unwrap()
    }

    /// A fresh system loaded from the cluster
    pub async fn loaded(&self, ns: &str, name: &str) -> System<MemoryCluster> {
        let mut s = self.system(ns, name);
        s.load().await.unwrap();
        s
    }
}

/// A system over an empty cluster
pub fn test_system(ns: &str, name: &str) -> (System<MemoryCluster>, TestEnv) {
    let env = TestEnv::new();
    (env.system(ns, name), env)
}

/// A system whose NooBaa resource exists, so it can own children
pub async fn loaded_system(ns: &str, name: &str) -> (System<MemoryCluster>, TestEnv) {
    let env = TestEnv::new();
    env.cluster.insert(&test_noobaa(ns, name, None)).unwrap();
    (env.loaded(ns, name).await, env)
}

/// A loaded system with a management client already connected
pub async fn connected_system(ns: &str, name: &str) -> (System<MemoryCluster>, TestEnv) {
    let (mut s, env) = loaded_system(ns, name).await;
    s.nb_client = Some(env.nb.connect("https://192.168.1.1:30443").unwrap());
    (s, env)
}

// =============================================================================
// Objects
// =============================================================================

fn meta(ns: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(ns.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

pub fn test_noobaa(ns: &str, name: &str, image: Option<&str>) -> NooBaa {
    let mut nb = NooBaa::new(
        name,
        NooBaaSpec {
            image: image.map(str::to_string),
            ..Default::default()
        },
    );
    nb.metadata.namespace = Some(ns.to_string());
    nb
}

pub fn operator_secret(ns: &str, name: &str, token: Option<&str>) -> Secret {
    let mut data = BTreeMap::from([
        ("email".to_string(), "admin@noobaa.io".to_string()),
        ("password".to_string(), "stored-password".to_string()),
    ]);
    if let Some(token) = token {
        data.insert("auth_token".to_string(), token.to_string());
    }
    Secret {
        metadata: meta(ns, &format!("{}-operator", name)),
        type_: Some("Opaque".to_string()),
        string_data: Some(data),
        ..Default::default()
    }
}

fn with_addresses(mut svc: Service, ns: &str, name: &str, cluster_ip: &str, node_ports: &[(&str, i32)]) -> Service {
    svc.metadata.namespace = Some(ns.to_string());
    svc.metadata.name = Some(name.to_string());
    let spec = svc.spec.get_or_insert_with(Default::default);
    spec.cluster_ip = Some(cluster_ip.to_string());
    for port in spec.ports.iter_mut().flatten() {
        if let Some((_, node_port)) = node_ports.iter().find(|(n, _)| port.name.as_deref() == Some(*n)) {
            port.node_port = Some(*node_port);
        }
    }
    svc
}

/// The mgmt service as the platform fills it in once the system runs
pub fn running_mgmt_service(ns: &str, name: &str) -> Service {
    let svc = bundle::service_mgmt().unwrap();
    let mut svc = with_addresses(
        svc,
        ns,
        &format!("{}-mgmt", name),
        "10.96.0.10",
        &[("mgmt", 30080), ("mgmt-https", 30443), ("bg-https", 30445)],
    );
    svc.status = Some(ServiceStatus {
        load_balancer: Some(LoadBalancerStatus {
            ingress: Some(vec![LoadBalancerIngress {
                ip: Some("34.1.1.1".to_string()),
                hostname: Some("lb.example.com".to_string()),
                ..Default::default()
            }]),
        }),
        ..Default::default()
    });
    svc
}

pub fn running_s3_service(ns: &str) -> Service {
    let svc = bundle::service_s3().unwrap();
    with_addresses(svc, ns, "s3", "10.96.0.20", &[("s3", 31080), ("s3-https", 31443)])
}

/// Two running core pods on different nodes
pub fn seed_pods(env: &TestEnv, ns: &str, name: &str) {
    let labels = BTreeMap::from([
        ("noobaa-core".to_string(), name.to_string()),
        ("noobaa-mgmt".to_string(), name.to_string()),
        ("noobaa-s3".to_string(), name.to_string()),
    ]);
    for i in 0..2 {
        let mut pod_meta = meta(ns, &format!("{}-core-{}", name, i));
        pod_meta.labels = Some(labels.clone());
        let pod = Pod {
            metadata: pod_meta,
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                host_ip: Some(format!("192.168.1.{}", i + 1)),
                pod_ip: Some(format!("10.1.0.{}", i + 1)),
                ..Default::default()
            }),
            ..Default::default()
        };
        env.cluster.insert(&pod).unwrap();
    }
}

/// A NooBaa resource whose services and pods are already up
pub fn seed_running_system(env: &TestEnv, ns: &str, name: &str, image: Option<&str>) {
    env.cluster.insert(&test_noobaa(ns, name, image)).unwrap();
    env.cluster.insert(&running_mgmt_service(ns, name)).unwrap();
    env.cluster.insert(&running_s3_service(ns)).unwrap();
    seed_pods(env, ns, name);
}
