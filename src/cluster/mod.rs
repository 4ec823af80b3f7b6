//! Cluster Adapters
//!
//! Implementations of the cluster and audit ports:
//! - Kubernetes: the live API server
//! - Memory: an in-process store for standalone runs and tests

pub mod k8s;
pub mod memory;

pub use k8s::{label_selector, KubeAuditRecorder, KubeClusterClient};
pub use memory::{ClusterCall, MemoryCluster, MemoryRecorder, Verb};
