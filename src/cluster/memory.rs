//! In-Memory Cluster
//!
//! A process-local stand-in for the cluster API. Objects are stored as JSON
//! and behave the way the API server treats them where the engine depends
//! on it: resource versions guard every write, `replace` keeps the stored
//! status, secrets fold `stringData` into `data`, and uids and generations
//! are assigned by the store.

use crate::domain::ports::{AuditEvent, AuditRecorder, ClusterClient, KubeObject};
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::core::v1::ObjectReference;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

// =============================================================================
// Call Log
// =============================================================================

/// Verbs of the cluster port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
}

impl Verb {
    /// Check if this verb writes to the store
    pub fn is_write(&self) -> bool {
        matches!(self, Verb::Create | Verb::Update | Verb::UpdateStatus)
    }
}

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCall {
    pub verb: Verb,
    pub kind: String,
    pub name: String,
}

type ObjectKey = (String, String, String);

// =============================================================================
// Memory Cluster
// =============================================================================

/// In-memory implementation of [`ClusterClient`]
#[derive(Default)]
pub struct MemoryCluster {
    objects: RwLock<BTreeMap<ObjectKey, Value>>,
    calls: RwLock<Vec<ClusterCall>>,
    failures: RwLock<HashSet<(Verb, String)>>,
    conflicts: RwLock<HashSet<(Verb, String)>>,
    next_version: AtomicU64,
}

impl MemoryCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object directly, bypassing the call log
    pub fn insert<K: KubeObject>(&self, obj: &K) -> Result<K> {
        let key = Self::key(obj)?;
        let mut value = serde_json::to_value(obj)?;
        self.stamp_new(&mut value, &key);
        self.objects.write().insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    /// Read an object directly, bypassing the call log
    pub fn peek<K: KubeObject>(&self, namespace: &str, name: &str) -> Option<K> {
        let key = (K::kind(&()).to_string(), namespace.to_string(), name.to_string());
        self.objects
            .read()
            .get(&key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Make the next `verb` call on objects of `kind` fail once
    pub fn fail_next(&self, verb: Verb, kind: &str) {
        self.failures.write().insert((verb, kind.to_string()));
    }

    /// Make the next `verb` call on objects of `kind` fail once with a
    /// stale resource version conflict
    pub fn conflict_next(&self, verb: Verb, kind: &str) {
        self.conflicts.write().insert((verb, kind.to_string()));
    }

    /// All calls made through the port so far
    pub fn calls(&self) -> Vec<ClusterCall> {
        self.calls.read().clone()
    }

    /// Number of write calls made through the port so far
    pub fn write_count(&self) -> usize {
        self.calls.read().iter().filter(|c| c.verb.is_write()).count()
    }

    /// Forget the recorded calls
    pub fn clear_calls(&self) {
        self.calls.write().clear();
    }

    /// Snapshot of every stored object body, keyed by kind/namespace/name
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.objects
            .read()
            .iter()
            .map(|((kind, ns, name), v)| (format!("{}/{}/{}", kind, ns, name), v.clone()))
            .collect()
    }

    fn key<K: KubeObject>(obj: &K) -> Result<ObjectKey> {
        let meta = obj.meta();
        match (&meta.namespace, &meta.name) {
            (Some(ns), Some(name)) => Ok((K::kind(&()).to_string(), ns.clone(), name.clone())),
            _ => Err(Error::Internal(format!(
                "{} object is missing namespace or name",
                K::kind(&())
            ))),
        }
    }

    fn record(&self, verb: Verb, kind: &str, name: &str) -> Result<()> {
        debug!(?verb, kind, name, "Memory cluster call");
        self.calls.write().push(ClusterCall {
            verb,
            kind: kind.to_string(),
            name: name.to_string(),
        });
        if self.failures.write().remove(&(verb, kind.to_string())) {
            return Err(Error::Internal(format!(
                "injected {:?} failure for {}/{}",
                verb, kind, name
            )));
        }
        if self.conflicts.write().remove(&(verb, kind.to_string())) {
            return Err(Error::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn bump_version(&self, value: &mut Value) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        value["metadata"]["resourceVersion"] = Value::String(version.to_string());
    }

    fn stamp_new(&self, value: &mut Value, key: &ObjectKey) {
        let metadata = &mut value["metadata"];
        if metadata.get("uid").map_or(true, Value::is_null) {
            metadata["uid"] = Value::String(format!("uid-{}-{}-{}", key.0, key.1, key.2).to_lowercase());
        }
        if metadata.get("generation").map_or(true, Value::is_null) {
            metadata["generation"] = Value::from(1);
        }
        if key.0 == "Secret" {
            fold_string_data(value);
        }
        self.bump_version(value);
    }

    fn check_version(stored: &Value, incoming: &Value, key: &ObjectKey) -> Result<()> {
        let incoming_version = &incoming["metadata"]["resourceVersion"];
        if !incoming_version.is_null() && incoming_version != &stored["metadata"]["resourceVersion"] {
            return Err(Error::Conflict {
                kind: key.0.clone(),
                name: key.2.clone(),
            });
        }
        Ok(())
    }
}

/// Merge `stringData` into base64 `data` the way the API server does
fn fold_string_data(value: &mut Value) {
    let Some(Value::Object(string_data)) = value.as_object_mut().and_then(|o| o.remove("stringData"))
    else {
        return;
    };
    if !value["data"].is_object() {
        value["data"] = Value::Object(Map::new());
    }
    for (k, v) in string_data {
        let raw = v.as_str().unwrap_or_default();
        value["data"][k] = Value::String(STANDARD.encode(raw.as_bytes()));
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn get<K: KubeObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.record(Verb::Get, &K::kind(&()), name)?;
        let key = (K::kind(&()).to_string(), namespace.to_string(), name.to_string());
        let stored = self.objects.read().get(&key).cloned();
        stored.map(|v| serde_json::from_value(v).map_err(Error::from)).transpose()
    }

    async fn list<K: KubeObject>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let kind = K::kind(&()).to_string();
        self.record(Verb::List, &kind, "")?;
        let matching = self
            .objects
            .read()
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .map(|(_, v)| v.clone())
            .collect::<Vec<_>>();

        let mut items = Vec::new();
        for value in matching {
            let obj: K = serde_json::from_value(value)?;
            let obj_labels = obj.meta().labels.clone().unwrap_or_default();
            if labels.iter().all(|(k, v)| obj_labels.get(k) == Some(v)) {
                items.push(obj);
            }
        }
        Ok(items)
    }

    async fn create<K: KubeObject>(&self, obj: &K) -> Result<K> {
        let key = Self::key(obj)?;
        self.record(Verb::Create, &key.0, &key.2)?;

        let mut objects = self.objects.write();
        if objects.contains_key(&key) {
            return Err(Error::ResourceExists {
                kind: key.0,
                name: key.2,
            });
        }
        let mut value = serde_json::to_value(obj)?;
        self.stamp_new(&mut value, &key);
        objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn update<K: KubeObject>(&self, obj: &K) -> Result<K> {
        let key = Self::key(obj)?;
        self.record(Verb::Update, &key.0, &key.2)?;

        let mut objects = self.objects.write();
        let stored = objects.get(&key).cloned().ok_or_else(|| Error::ResourceNotFound {
            kind: key.0.clone(),
            name: key.2.clone(),
        })?;
        let mut value = serde_json::to_value(obj)?;
        Self::check_version(&stored, &value, &key)?;

        // Status only changes through the status endpoint
        match stored.get("status") {
            Some(status) => value["status"] = status.clone(),
            None => {
                if let Some(o) = value.as_object_mut() {
                    o.remove("status");
                }
            }
        }
        value["metadata"]["uid"] = stored["metadata"]["uid"].clone();
        let generation = stored["metadata"]["generation"].as_i64().unwrap_or(1);
        let spec_changed = stored.get("spec") != value.get("spec");
        value["metadata"]["generation"] = Value::from(generation + i64::from(spec_changed));
        if key.0 == "Secret" {
            fold_string_data(&mut value);
        }
        self.bump_version(&mut value);
        objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn update_status<K: KubeObject>(&self, obj: &K) -> Result<K> {
        let key = Self::key(obj)?;
        self.record(Verb::UpdateStatus, &key.0, &key.2)?;

        let mut objects = self.objects.write();
        let mut stored = objects.get(&key).cloned().ok_or_else(|| Error::ResourceNotFound {
            kind: key.0.clone(),
            name: key.2.clone(),
        })?;
        let value = serde_json::to_value(obj)?;
        Self::check_version(&stored, &value, &key)?;

        stored["status"] = value.get("status").cloned().unwrap_or(Value::Null);
        self.bump_version(&mut stored);
        objects.insert(key, stored.clone());
        Ok(serde_json::from_value(stored)?)
    }
}

// =============================================================================
// Memory Recorder
// =============================================================================

/// Audit recorder that keeps every event in memory
#[derive(Default)]
pub struct MemoryRecorder {
    events: RwLock<Vec<(ObjectReference, AuditEvent)>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published so far
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().iter().map(|(_, e)| e.clone()).collect()
    }
}

#[async_trait]
impl AuditRecorder for MemoryRecorder {
    async fn publish(&self, object: &ObjectReference, event: AuditEvent) -> Result<()> {
        debug!(
            object = object.name.as_deref().unwrap_or_default(),
            reason = %event.reason,
            "Recording audit event"
        );
        self.events.write().push((object.clone(), event));
        Ok(())
    }
}
