//! NooBaa CRD
//!
//! The top-level resource describing one NooBaa system deployment: user
//! intent in the spec, convergence progress and addresses in the status.

use chrono::{DateTime, SubsecRound, Utc};
use k8s_openapi::api::core::v1::{LocalObjectReference, SecretReference};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// NooBaa CRD
// =============================================================================

/// NooBaa describes a single object-storage system managed by the operator.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "noobaa.io",
    version = "v1alpha1",
    kind = "NooBaa",
    plural = "noobaas",
    shortname = "nb",
    status = "NooBaaStatus",
    printcolumn = r#"{"name": "Image", "type": "string", "jsonPath": ".status.actualImage"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NooBaaSpec {
    /// Container image for the core server (defaults to the operator's built-in image)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Container image for the database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mongo_image: Option<String>,

    /// Storage class for the volume claims of the core workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Pull secret used for the container images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<LocalObjectReference>,
}

// =============================================================================
// Status
// =============================================================================

/// Observed state of a NooBaa system
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NooBaaStatus {
    /// Current phase of convergence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<SystemPhase>,

    /// Availability conditions derived from the phase
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Generation last processed by the operator
    #[serde(default)]
    pub observed_generation: i64,

    /// Image actually deployed after validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_image: Option<String>,

    /// Addresses of the system services
    #[serde(default)]
    pub services: ServicesStatus,

    /// Accounts created for users of the system
    #[serde(default)]
    pub accounts: AccountsStatus,

    /// Usage instructions rendered once the system is ready
    #[serde(default)]
    pub readme: String,
}

/// Phase of the reconciliation state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SystemPhase {
    Verifying,
    Creating,
    WaitingToConnect,
    Configuring,
    Ready,
    Rejected,
}

impl std::fmt::Display for SystemPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SystemPhase::Verifying => write!(f, "Verifying"),
            SystemPhase::Creating => write!(f, "Creating"),
            SystemPhase::WaitingToConnect => write!(f, "WaitingToConnect"),
            SystemPhase::Configuring => write!(f, "Configuring"),
            SystemPhase::Ready => write!(f, "Ready"),
            SystemPhase::Rejected => write!(f, "Rejected"),
        }
    }
}

/// Addresses of both system services
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServicesStatus {
    #[serde(default)]
    pub service_mgmt: ServiceStatus,
    #[serde(default)]
    pub service_s3: ServiceStatus,
}

/// Every known address of one service, as `scheme://host:port` strings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pod_ports: Vec<String>,
    #[serde(default, rename = "internalIP", skip_serializing_if = "Vec::is_empty")]
    pub internal_ip: Vec<String>,
    #[serde(default, rename = "internalDNS", skip_serializing_if = "Vec::is_empty")]
    pub internal_dns: Vec<String>,
    #[serde(default, rename = "externalIP", skip_serializing_if = "Vec::is_empty")]
    pub external_ip: Vec<String>,
    #[serde(default, rename = "externalDNS", skip_serializing_if = "Vec::is_empty")]
    pub external_dns: Vec<String>,
}

/// Accounts of the system
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountsStatus {
    #[serde(default)]
    pub admin: UserStatus,
}

/// Reference to the credentials of one account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    #[serde(default)]
    pub secret_ref: SecretReference,
}

// =============================================================================
// Conditions
// =============================================================================

/// Condition axes reported on the status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    Available,
    Progressing,
    Degraded,
    Upgradeable,
}

/// Condition status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single status condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_heartbeat_time: Option<DateTime<Utc>>,
}

impl NooBaaStatus {
    /// Set a condition, replacing the existing one of the same type.
    ///
    /// The transition time moves only when the status value changes.
    /// Times have the whole-second precision of a Kubernetes `Time`.
    pub fn set_condition(
        &mut self,
        r#type: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) {
        let now = Utc::now().trunc_subsecs(0);
        match self.conditions.iter_mut().find(|c| c.r#type == r#type) {
            Some(existing) => {
                if existing.status != status {
                    existing.status = status;
                    existing.last_transition_time = Some(now);
                }
                existing.reason = reason.to_string();
                existing.message = message.to_string();
                existing.last_heartbeat_time = Some(now);
            }
            None => self.conditions.push(Condition {
                r#type,
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: Some(now),
                last_heartbeat_time: Some(now),
            }),
        }
    }

    /// Keep the times of `previous` on every condition that ends up with
    /// the same status, reason and message.
    ///
    /// A pass walks the conditions through intermediate phases; only the
    /// net change against the stored status counts as a transition.
    pub fn carry_condition_times(&mut self, previous: &NooBaaStatus) {
        for cond in self.conditions.iter_mut() {
            let Some(prev) = previous.condition(cond.r#type) else {
                continue;
            };
            if prev.status != cond.status {
                continue;
            }
            cond.last_transition_time = prev.last_transition_time;
            if prev.reason == cond.reason && prev.message == cond.message {
                cond.last_heartbeat_time = prev.last_heartbeat_time;
            }
        }
    }

    /// Look up a condition by type
    pub fn condition(&self, r#type: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }

    /// Check if the system reached the ready phase
    pub fn is_ready(&self) -> bool {
        self.phase == Some(SystemPhase::Ready)
    }
}
