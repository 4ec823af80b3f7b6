//! Baseline Resource Templates
//!
//! The child objects of a system start from these embedded manifests. Each
//! loader returns a fresh typed copy with the template defaults; names and
//! namespaces are assigned by the caller.

use crate::crd::NooBaa;
use crate::error::Result;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Secret, Service};
use serde::de::DeserializeOwned;

/// Image placeholder replaced by the validated core image
pub const NOOBAA_IMAGE_PLACEHOLDER: &str = "NOOBAA_IMAGE";
/// Image placeholder replaced by the database image
pub const MONGO_IMAGE_PLACEHOLDER: &str = "MONGO_IMAGE";

const NOOBAA_CR: &str = include_str!("assets/noobaa-cr.yaml");
const STATEFULSET_CORE: &str = include_str!("assets/statefulset-core.yaml");
const SERVICE_MGMT: &str = include_str!("assets/service-mgmt.yaml");
const SERVICE_S3: &str = include_str!("assets/service-s3.yaml");
const SECRET_SERVER: &str = include_str!("assets/secret-server.yaml");
const SECRET_OPERATOR: &str = include_str!("assets/secret-operator.yaml");
const SECRET_ADMIN: &str = include_str!("assets/secret-admin.yaml");

fn load<K: DeserializeOwned>(manifest: &str) -> Result<K> {
    Ok(serde_yaml::from_str(manifest)?)
}

pub fn noobaa() -> Result<NooBaa> {
    load(NOOBAA_CR)
}

pub fn core_app() -> Result<StatefulSet> {
    load(STATEFULSET_CORE)
}

pub fn service_mgmt() -> Result<Service> {
    load(SERVICE_MGMT)
}

pub fn service_s3() -> Result<Service> {
    load(SERVICE_S3)
}

pub fn secret_server() -> Result<Secret> {
    load(SECRET_SERVER)
}

pub fn secret_operator() -> Result<Secret> {
    load(SECRET_OPERATOR)
}

pub fn secret_admin() -> Result<Secret> {
    load(SECRET_ADMIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_app_placeholders() {
        let app = core_app().unwrap();
        let pod = app.spec.unwrap().template.spec.unwrap();
        let init = pod.init_containers.unwrap();
        assert_eq!(init[0].image.as_deref(), Some(NOOBAA_IMAGE_PLACEHOLDER));

        let images: Vec<_> = pod.containers.iter().filter_map(|c| c.image.as_deref()).collect();
        assert!(images.contains(&NOOBAA_IMAGE_PLACEHOLDER));
        assert!(images.contains(&MONGO_IMAGE_PLACEHOLDER));
    }

    #[test]
    fn test_core_app_claim_templates() {
        let app = core_app().unwrap();
        let claims = app.spec.unwrap().volume_claim_templates.unwrap();
        let names: Vec<_> = claims.iter().filter_map(|c| c.metadata.name.as_deref()).collect();
        assert_eq!(names, vec!["db", "logs"]);
    }

    #[test]
    fn test_service_ports() {
        let port_names = |svc: Service| -> Vec<String> {
            svc.spec
                .unwrap()
                .ports
                .unwrap()
                .into_iter()
                .filter_map(|p| p.name)
                .collect()
        };
        assert_eq!(port_names(service_mgmt().unwrap()), vec!["mgmt", "mgmt-https", "bg-https"]);
        assert_eq!(port_names(service_s3().unwrap()), vec!["s3", "s3-https"]);
    }

    #[test]
    fn test_secrets_and_cr_load() {
        for secret in [secret_server(), secret_operator(), secret_admin()] {
            let secret = secret.unwrap();
            assert_eq!(secret.type_.as_deref(), Some("Opaque"));
        }
        let nb = noobaa().unwrap();
        assert!(nb.spec.image.is_none());
        assert!(nb.status.is_none());
    }
}
