//! Engine configuration
//!
//! Built once at startup and shared read-only by every reconcile pass.

use crate::error::Result;
use crate::image::VersionConstraint;
use std::time::Duration;

/// Org of the default core image
pub const CONTAINER_IMAGE_ORG: &str = "noobaa";
/// Repo of the default core image
pub const CONTAINER_IMAGE_REPO: &str = "noobaa-core";
/// Tag of the default core image
pub const CONTAINER_IMAGE_TAG: &str = "5";
/// Supported core image versions
pub const CONTAINER_IMAGE_CONSTRAINT: &str = ">=5, <6";
/// Default database image
pub const MONGO_IMAGE: &str = "centos/mongodb-36-centos7";
/// Email of the bootstrap and admin accounts
pub const ADMIN_ACCOUNT_EMAIL: &str = "admin@noobaa.io";
/// Service account used by the core pods
pub const OPERATOR_SERVICE_ACCOUNT: &str = "noobaa-operator";

/// Configuration for the reconcile engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Image used when the spec does not name one
    pub default_image: String,
    /// Canonical image name without tag
    pub canonical_image_name: String,
    /// Versions of the canonical image the operator supports
    pub image_constraint: VersionConstraint,
    /// Database image used when the spec does not name one
    pub default_mongo_image: String,
    /// Email of the bootstrap and admin accounts
    pub admin_email: String,
    /// Service account of the core pods
    pub service_account: String,
    /// Fixed delay before retrying a transient failure
    pub retry_delay: Duration,
    /// Timeout of a single management API request
    pub rpc_timeout: Duration,
    /// Accept self-signed certificates of the management endpoint
    pub insecure_tls: bool,
}

impl EngineConfig {
    /// Build the default configuration with a custom constraint expression
    pub fn with_constraint(constraint: &str) -> Result<Self> {
        Ok(Self {
            image_constraint: VersionConstraint::parse(constraint)?,
            ..Self::default()
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let canonical_image_name = format!("{}/{}", CONTAINER_IMAGE_ORG, CONTAINER_IMAGE_REPO);
        Self {
            default_image: format!("{}:{}", canonical_image_name, CONTAINER_IMAGE_TAG),
            canonical_image_name,
            image_constraint: VersionConstraint::parse(CONTAINER_IMAGE_CONSTRAINT)
                .expect("built-in image constraint is valid"),
            default_mongo_image: MONGO_IMAGE.to_string(),
            admin_email: ADMIN_ACCOUNT_EMAIL.to_string(),
            service_account: OPERATOR_SERVICE_ACCOUNT.to_string(),
            retry_delay: Duration::from_secs(2),
            rpc_timeout: Duration::from_secs(30),
            insecure_tls: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.default_image, "noobaa/noobaa-core:5");
        assert_eq!(config.canonical_image_name, "noobaa/noobaa-core");
        assert_eq!(config.image_constraint.to_string(), ">=5, <6");
        assert_eq!(config.retry_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_custom_constraint() {
        let config = EngineConfig::with_constraint(">=5.2, <6").unwrap();
        assert_eq!(config.image_constraint.to_string(), ">=5.2, <6");
        assert!(EngineConfig::with_constraint("bogus").is_err());
    }
}
