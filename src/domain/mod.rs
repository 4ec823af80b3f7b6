//! Domain Module
//!
//! Trait boundaries between the reconcile engine and its collaborators.

pub mod ports;

pub use ports::*;
