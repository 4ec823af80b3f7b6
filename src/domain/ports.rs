//! Domain Ports - Core trait definitions for the NooBaa operator
//!
//! These traits define the boundaries between the reconcile engine and the
//! systems it talks to: the cluster API, the NooBaa management API and the
//! cluster event log. Adapters implement these traits to provide concrete
//! functionality.

use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

// =============================================================================
// Cluster Client Port
// =============================================================================

/// Any namespaced object the engine reads or writes
pub trait KubeObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> KubeObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// What a create-or-update call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    Created,
    Updated,
    Unchanged,
}

impl std::fmt::Display for OperationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationResult::Created => write!(f, "created"),
            OperationResult::Updated => write!(f, "updated"),
            OperationResult::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Port for cluster API operations
///
/// Writes are guarded by the object's resource version; a stale write
/// surfaces as an ordinary error.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Get an object by name, `None` when it does not exist
    async fn get<K: KubeObject>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// List objects in a namespace matching all the given labels
    async fn list<K: KubeObject>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>>;

    /// Create an object, failing if it already exists
    async fn create<K: KubeObject>(&self, obj: &K) -> Result<K>;

    /// Replace an existing object
    async fn update<K: KubeObject>(&self, obj: &K) -> Result<K>;

    /// Replace only the status of an existing object
    async fn update_status<K: KubeObject>(&self, obj: &K) -> Result<K>;

    /// Create the object if absent, otherwise apply `mutate` to the stored
    /// object and write it back only when that changed anything.
    ///
    /// On return `obj` holds the state as stored in the cluster.
    async fn create_or_update<K, F>(&self, obj: &mut K, mutate: F) -> Result<OperationResult>
    where
        K: KubeObject,
        F: FnOnce(&mut K) + Send,
    {
        let namespace = obj.meta().namespace.clone().unwrap_or_default();
        let name = obj.meta().name.clone().unwrap_or_default();

        match self.get::<K>(&namespace, &name).await? {
            None => {
                mutate(obj);
                *obj = self.create(obj).await?;
                Ok(OperationResult::Created)
            }
            Some(existing) => {
                *obj = existing;
                let before = serde_json::to_value(&*obj)?;
                mutate(obj);
                if serde_json::to_value(&*obj)? == before {
                    return Ok(OperationResult::Unchanged);
                }
                *obj = self.update(obj).await?;
                Ok(OperationResult::Updated)
            }
        }
    }
}

// =============================================================================
// Management API Port
// =============================================================================

/// Parameters for authenticating an existing account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAuthParams {
    pub system: String,
    pub role: String,
    pub email: String,
    pub password: String,
}

/// Parameters for creating the system and its first account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSystemParams {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Reply carrying an auth token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthReply {
    pub token: String,
    /// Token scoped to the operator, returned by system creation only
    #[serde(default)]
    pub operator_token: Option<String>,
}

/// Identity behind the current auth token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadAuthReply {
    #[serde(default)]
    pub account: Option<AuthAccount>,
    #[serde(default)]
    pub system: Option<AuthSystem>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthAccount {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSystem {
    #[serde(default)]
    pub name: String,
}

/// One S3 access key pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKeys {
    pub access_key: String,
    pub secret_key: String,
}

/// An account of the managed system
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(default)]
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub access_keys: Vec<AccessKeys>,
}

/// Reply of the account listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListAccountsReply {
    #[serde(default)]
    pub accounts: Vec<AccountInfo>,
}

/// Port for the NooBaa management API
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// Use this token for every following call
    fn set_auth_token(&mut self, token: &str);

    /// Read the identity of the current token; used as a reachability check
    async fn read_auth(&self) -> Result<ReadAuthReply>;

    /// Authenticate an existing account
    async fn create_auth(&self, params: CreateAuthParams) -> Result<AuthReply>;

    /// Create the system together with its first account
    async fn create_system(&self, params: CreateSystemParams) -> Result<AuthReply>;

    /// List the accounts of the system
    async fn list_accounts(&self) -> Result<ListAccountsReply>;
}

/// Builds management API clients for a discovered endpoint
pub trait ManagementConnector: Send + Sync {
    /// Create a client for `endpoint` (`scheme://host:port`)
    fn connect(&self, endpoint: &str) -> Result<Box<dyn ManagementApi>>;
}

// =============================================================================
// Audit Recorder Port
// =============================================================================

/// Severity of an audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    Normal,
    Warning,
}

/// An event attached to a cluster object for humans to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub reason: String,
    pub message: String,
}

impl AuditEvent {
    pub fn normal(reason: &str, message: impl Into<String>) -> Self {
        Self {
            event_type: AuditEventType::Normal,
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    pub fn warning(reason: &str, message: impl Into<String>) -> Self {
        Self {
            event_type: AuditEventType::Warning,
            reason: reason.to_string(),
            message: message.into(),
        }
    }
}

/// Port for publishing audit events
#[async_trait]
pub trait AuditRecorder: Send + Sync {
    /// Publish an event regarding `object`
    async fn publish(&self, object: &ObjectReference, event: AuditEvent) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ManagementConnectorRef = Arc<dyn ManagementConnector>;
pub type AuditRecorderRef = Arc<dyn AuditRecorder>;
