//! NooBaa System Reconciliation
//!
//! A [`System`] is built fresh for every reconcile pass from the
//! (namespace, name) of a NooBaa resource. It holds the in-memory desired
//! state of every child object, drives them toward the cluster and
//! bootstraps the credentials of the managed system. Nothing survives
//! between passes except what was written to the cluster.

mod endpoints;
mod image;
mod phase;
mod readme;
mod reconcile;
mod secrets;

#[cfg(test)]
mod fixtures;

pub use secrets::{random_base64, random_hex, secret_reset_string_data_from_data};

use crate::bundle;
use crate::config::EngineConfig;
use crate::crd::{NooBaa, NooBaaStatus};
use crate::domain::ports::{
    AuditEvent, AuditRecorderRef, ClusterClient, ManagementApi, ManagementConnectorRef,
};
use crate::error::{Error, Result};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

// =============================================================================
// Request & Context
// =============================================================================

/// Identifies one managed system
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SystemRequest {
    pub namespace: String,
    pub name: String,
}

impl SystemRequest {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SystemRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Collaborators shared by every reconcile pass
pub struct Context<C> {
    pub cluster: Arc<C>,
    pub connector: ManagementConnectorRef,
    pub recorder: AuditRecorderRef,
    pub config: Arc<EngineConfig>,
}

impl<C> Clone for Context<C> {
    fn clone(&self) -> Self {
        Self {
            cluster: self.cluster.clone(),
            connector: self.connector.clone(),
            recorder: self.recorder.clone(),
            config: self.config.clone(),
        }
    }
}

// =============================================================================
// System
// =============================================================================

/// In-memory state of one system during a single pass
pub struct System<C: ClusterClient> {
    pub request: SystemRequest,
    ctx: Context<C>,
    cancel: CancellationToken,
    nb_client: Option<Box<dyn ManagementApi>>,
    /// Status as last read from or written to the cluster
    stored_status: Option<NooBaaStatus>,

    pub noobaa: NooBaa,
    pub core_app: StatefulSet,
    pub service_mgmt: Service,
    pub service_s3: Service,
    pub secret_server: Secret,
    pub secret_op: Secret,
    pub secret_admin: Secret,
}

impl<C: ClusterClient> System<C> {
    /// Build the desired state of a system from the baseline templates
    pub fn new(request: SystemRequest, ctx: Context<C>, cancel: CancellationToken) -> Result<Self> {
        let mut s = Self {
            noobaa: bundle::noobaa()?,
            core_app: bundle::core_app()?,
            service_mgmt: bundle::service_mgmt()?,
            service_s3: bundle::service_s3()?,
            secret_server: bundle::secret_server()?,
            secret_op: bundle::secret_operator()?,
            secret_admin: bundle::secret_admin()?,
            request,
            ctx,
            cancel,
            nb_client: None,
            stored_status: None,
        };
        secret_reset_string_data_from_data(&mut s.secret_op);
        secret_reset_string_data_from_data(&mut s.secret_admin);

        let ns = s.request.namespace.clone();
        let name = s.request.name.clone();
        let assign = |meta: &mut ObjectMeta, object_name: String| {
            meta.namespace = Some(ns.clone());
            meta.name = Some(object_name);
        };
        assign(&mut s.noobaa.metadata, name.clone());
        assign(&mut s.core_app.metadata, format!("{}-core", name));
        assign(&mut s.service_mgmt.metadata, format!("{}-mgmt", name));
        // TODO: a second system in the same namespace collides on this name
        assign(&mut s.service_s3.metadata, "s3".to_string());
        assign(&mut s.secret_server.metadata, format!("{}-server", name));
        assign(&mut s.secret_op.metadata, format!("{}-operator", name));
        assign(&mut s.secret_admin.metadata, format!("{}-admin", name));

        Ok(s)
    }

    /// Read the current cluster state of every object of the system.
    ///
    /// Objects that do not exist keep their template state.
    pub async fn load(&mut self) -> Result<()> {
        let ns = self.request.namespace.clone();
        let cluster = self.ctx.cluster.clone();

        let nb = self.guard(cluster.get::<NooBaa>(&ns, &self.request.name)).await?;
        let app = self.guard(cluster.get::<StatefulSet>(&ns, &object_name(&self.core_app))).await?;
        let mgmt = self.guard(cluster.get::<Service>(&ns, &object_name(&self.service_mgmt))).await?;
        let s3 = self.guard(cluster.get::<Service>(&ns, &object_name(&self.service_s3))).await?;
        let server = self.guard(cluster.get::<Secret>(&ns, &object_name(&self.secret_server))).await?;
        let op = self.guard(cluster.get::<Secret>(&ns, &object_name(&self.secret_op))).await?;
        let admin = self.guard(cluster.get::<Secret>(&ns, &object_name(&self.secret_admin))).await?;

        if let Some(nb) = nb {
            self.stored_status = nb.status.clone();
            self.noobaa = nb;
        }
        if let Some(app) = app {
            self.core_app = app;
        }
        if let Some(svc) = mgmt {
            self.service_mgmt = svc;
        }
        if let Some(svc) = s3 {
            self.service_s3 = svc;
        }
        if let Some(secret) = server {
            self.secret_server = secret;
        }
        if let Some(secret) = op {
            self.secret_op = secret;
        }
        if let Some(secret) = admin {
            self.secret_admin = secret;
        }

        secret_reset_string_data_from_data(&mut self.secret_op);
        secret_reset_string_data_from_data(&mut self.secret_admin);
        Ok(())
    }

    /// Controller owner reference pointing at the NooBaa resource
    pub fn owner_ref(&self) -> Result<OwnerReference> {
        self.noobaa.controller_owner_ref(&()).ok_or_else(|| {
            Error::Internal(format!("NooBaa {} has no uid to own children", self.request))
        })
    }

    /// Make the NooBaa resource the controller owner of `meta`
    pub fn own(&self, meta: &mut ObjectMeta) -> Result<()> {
        set_controller_reference(meta, self.owner_ref()?)
    }

    /// Race a blocking call against the cancellation token
    async fn guard<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            res = fut => res,
        }
    }

    /// Publish an audit event about the NooBaa resource; failures are logged only
    async fn publish(&self, event: AuditEvent) {
        let object = self.noobaa.object_ref(&());
        let reason = event.reason.clone();
        if let Err(err) = self.guard(self.ctx.recorder.publish(&object, event)).await {
            warn!(reason = %reason, "Failed to publish event: {}", err);
        }
    }

    fn status_mut(&mut self) -> &mut NooBaaStatus {
        self.noobaa.status.get_or_insert_with(NooBaaStatus::default)
    }

    fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }
}

fn object_name<K: Resource>(obj: &K) -> String {
    obj.meta().name.clone().unwrap_or_default()
}

/// Set `owner` as the controller reference of `meta`.
///
/// Fails when a different controller already owns the object.
pub fn set_controller_reference(meta: &mut ObjectMeta, owner: OwnerReference) -> Result<()> {
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    if let Some(other) = refs
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner.uid)
    {
        return Err(Error::Internal(format!(
            "object {} is already controlled by {} {}",
            meta.name.as_deref().unwrap_or_default(),
            other.kind,
            other.name
        )));
    }
    match refs.iter_mut().find(|r| r.uid == owner.uid) {
        Some(existing) => *existing = owner,
        None => refs.push(owner),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_child_names() {
        let (s, _) = test_system("ns", "sys");
        assert_eq!(object_name(&s.noobaa), "sys");
        assert_eq!(object_name(&s.core_app), "sys-core");
        assert_eq!(object_name(&s.service_mgmt), "sys-mgmt");
        assert_eq!(object_name(&s.service_s3), "s3");
        assert_eq!(object_name(&s.secret_server), "sys-server");
        assert_eq!(object_name(&s.secret_op), "sys-operator");
        assert_eq!(object_name(&s.secret_admin), "sys-admin");
        assert_eq!(s.secret_admin.metadata.namespace.as_deref(), Some("ns"));
    }

    #[test]
    fn test_set_controller_reference() {
        let owner = |uid: &str| OwnerReference {
            api_version: "noobaa.io/v1alpha1".into(),
            kind: "NooBaa".into(),
            name: "noobaa".into(),
            uid: uid.into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        };
        let mut meta = ObjectMeta::default();
        set_controller_reference(&mut meta, owner("u1")).unwrap();
        set_controller_reference(&mut meta, owner("u1")).unwrap();
        assert_eq!(meta.owner_references.as_ref().unwrap().len(), 1);

        assert!(set_controller_reference(&mut meta, owner("u2")).is_err());
    }

    #[tokio::test]
    async fn test_own_requires_uid() {
        let (s, _) = test_system("ns", "sys");
        let mut meta = ObjectMeta::default();
        assert!(s.own(&mut meta).is_err());
    }

    #[tokio::test]
    async fn test_load_keeps_templates_for_missing_objects() {
        let (mut s, env) = test_system("ns", "noobaa");
        let stored = env.cluster.insert(&test_noobaa("ns", "noobaa", None)).unwrap();
        s.load().await.unwrap();
        assert_eq!(s.noobaa.metadata.uid, stored.metadata.uid);
        assert!(s.core_app.metadata.uid.is_none());
        assert!(s.secret_op.data.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_call_is_cancelled_error() {
        let (s, env) = test_system("ns", "noobaa");
        env.cancel.cancel();
        let err = s
            .guard(s.ctx.cluster.get::<NooBaa>("ns", "noobaa"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
