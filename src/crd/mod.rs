//! Custom Resource Definitions for the NooBaa operator
//!
//! - NooBaa: one object-storage system, its intent and observed state

pub mod noobaa;

pub use noobaa::*;
