//! Kubernetes Cluster Adapter
//!
//! Implements the cluster and audit ports on top of a live API server.

use crate::domain::ports::{AuditEvent, AuditEventType, AuditRecorder, ClusterClient, KubeObject};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

// =============================================================================
// Cluster Client
// =============================================================================

/// Cluster client backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Create a new cluster client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: KubeObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Render a label map as a `k=v,k2=v2` selector
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn object_key<K: KubeObject>(obj: &K) -> Result<(String, String)> {
    let meta = obj.meta();
    match (&meta.namespace, &meta.name) {
        (Some(ns), Some(name)) => Ok((ns.clone(), name.clone())),
        _ => Err(Error::Internal(format!(
            "{} object is missing namespace or name",
            K::kind(&())
        ))),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get<K: KubeObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn list<K: KubeObject>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let params = ListParams::default().labels(&label_selector(labels));
        Ok(self.api::<K>(namespace).list(&params).await?.items)
    }

    async fn create<K: KubeObject>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_key(obj)?;
        debug!(kind = %K::kind(&()), %namespace, %name, "Creating object");
        Ok(self
            .api::<K>(&namespace)
            .create(&PostParams::default(), obj)
            .await?)
    }

    async fn update<K: KubeObject>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_key(obj)?;
        debug!(kind = %K::kind(&()), %namespace, %name, "Updating object");
        Ok(self
            .api::<K>(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await?)
    }

    async fn update_status<K: KubeObject>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_key(obj)?;
        let value = serde_json::to_value(obj)?;

        // Carrying the resource version keeps the write conditional
        let patch = json!({
            "metadata": { "resourceVersion": obj.meta().resource_version },
            "status": value.get("status").cloned().unwrap_or_default(),
        });

        debug!(kind = %K::kind(&()), %namespace, %name, "Updating object status");
        Ok(self
            .api::<K>(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }
}

// =============================================================================
// Audit Recorder
// =============================================================================

/// Publishes audit events as Kubernetes events
#[derive(Clone)]
pub struct KubeAuditRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeAuditRecorder {
    /// Create a recorder reporting as `controller`
    pub fn new(client: Client, controller: &str) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: controller.to_string(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }
}

#[async_trait]
impl AuditRecorder for KubeAuditRecorder {
    async fn publish(&self, object: &ObjectReference, event: AuditEvent) -> Result<()> {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), object.clone());
        recorder
            .publish(Event {
                type_: match event.event_type {
                    AuditEventType::Normal => EventType::Normal,
                    AuditEventType::Warning => EventType::Warning,
                },
                reason: event.reason,
                note: Some(event.message),
                action: "Reconcile".into(),
                secondary: None,
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_selector() {
        let labels = BTreeMap::from([
            ("noobaa-mgmt".to_string(), "noobaa".to_string()),
            ("app".to_string(), "noobaa".to_string()),
        ]);
        assert_eq!(label_selector(&labels), "app=noobaa,noobaa-mgmt=noobaa");
        assert_eq!(label_selector(&BTreeMap::new()), "");
    }
}
