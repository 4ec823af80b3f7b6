//! Container image handling
//!
//! Parsing of image references and of the versions carried in their tags.

pub mod reference;
pub mod version;

pub use reference::ImageReference;
pub use version::{Version, VersionConstraint};
