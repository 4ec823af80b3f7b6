//! NooBaa Operator - System Reconciliation Engine
//!
//! A Kubernetes operator that drives a NooBaa object-storage system toward
//! the state declared by its `NooBaa` custom resource.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                           NooBaa Controller                                  │
//! │        (watches NooBaa + owned StatefulSet / Service / Secret)               │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                      System (one per reconcile pass)                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  Image Check    │  │ Desired Objects │  │   Credential Bootstrap      │  │
//! │  │  (constraint)   │  │ (bundle + spec) │  │   (server/op/admin secrets) │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                    ┌───────────┴───────────┐                                │
//! │                    │   Phase & Conditions  │                                │
//! │                    └───────────────────────┘                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                               Ports                                          │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  ClusterClient  │  │ ManagementApi   │  │      AuditRecorder          │  │
//! │  │  (kube / mem)   │  │  (JSON RPC)     │  │      (k8s events)           │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`system`]: The reconcile pass of one NooBaa system
//! - [`controller`]: Watch loop feeding the system
//! - [`cluster`]: Kubernetes and in-memory cluster adapters
//! - [`nb`]: Management API client
//! - [`bundle`]: Embedded templates of the child objects
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Ports between the engine and the outside world
//! - [`image`]: Image reference and version parsing
//! - [`error`]: Error types and handling

pub mod bundle;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod image;
pub mod metrics;
pub mod nb;
pub mod system;

// Re-export commonly used types
pub use cluster::{KubeAuditRecorder, KubeClusterClient, MemoryCluster, MemoryRecorder};

pub use config::EngineConfig;

pub use controller::ControllerData;

pub use crd::{
    Condition, ConditionStatus, ConditionType, NooBaa, NooBaaSpec, NooBaaStatus, SystemPhase,
};

pub use domain::ports::{AuditRecorder, ClusterClient, ManagementApi, ManagementConnector};

pub use error::{Error, ReconcileError, ReconcileOutcome, Result};

pub use metrics::Metrics;

pub use nb::{RpcClient, RpcConnector};

pub use system::{Context, System, SystemRequest};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
