//! Usage instructions published on the status of a ready system

use crate::error::{Error, Result};
use kube::Resource;

/// Names needed to render the readme
pub(super) struct ReadmeParams<'a> {
    pub secret_admin: (&'a str, &'a str),
    pub service_mgmt: (&'a str, &'a str),
    pub service_s3: (&'a str, &'a str),
}

/// (name, namespace) of an object; both must be set
pub(super) fn name_ns<K: Resource<DynamicType = ()>>(obj: &K) -> Result<(&str, &str)> {
    let meta = obj.meta();
    match (meta.name.as_deref(), meta.namespace.as_deref()) {
        (Some(name), Some(ns)) if !name.is_empty() && !ns.is_empty() => Ok((name, ns)),
        _ => Err(Error::Template(format!(
            "{} without name or namespace",
            K::kind(&())
        ))),
    }
}

pub(super) fn render(p: &ReadmeParams<'_>) -> String {
    let (admin, admin_ns) = p.secret_admin;
    let (mgmt, mgmt_ns) = p.service_mgmt;
    let (s3, s3_ns) = p.service_s3;
    format!(
        r#"

	Welcome to NooBaa!
	-----------------

	Lets get started:

	1. Connect to Management console:

		Read your mgmt console login information (email & password) from secret: "{admin}".

			kubectl get secret {admin} -n {admin_ns} -o json | jq '.data|map_values(@base64d)'

		Open the management console service - take External IP/DNS or Node Port or use port forwarding:

			kubectl port-forward -n {mgmt_ns} service/{mgmt} 11443:8443 &
			open https://localhost:11443

	2. Test S3 client:

		kubectl port-forward -n {s3_ns} service/{s3} 10443:443 &
		NOOBAA_ACCESS_KEY=$(kubectl get secret {admin} -n {admin_ns} -o json | jq -r '.data.AWS_ACCESS_KEY_ID|@base64d')
		NOOBAA_SECRET_KEY=$(kubectl get secret {admin} -n {admin_ns} -o json | jq -r '.data.AWS_SECRET_ACCESS_KEY|@base64d')
		alias s3='AWS_ACCESS_KEY_ID=$NOOBAA_ACCESS_KEY AWS_SECRET_ACCESS_KEY=$NOOBAA_SECRET_KEY aws --endpoint https://localhost:10443 --no-verify-ssl s3'
		s3 ls

"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use kube::api::ObjectMeta;

    #[test]
    fn test_render_names_objects() {
        let readme = render(&ReadmeParams {
            secret_admin: ("noobaa-admin", "store"),
            service_mgmt: ("noobaa-mgmt", "store"),
            service_s3: ("s3", "store"),
        });
        assert!(readme.contains("kubectl get secret noobaa-admin -n store"));
        assert!(readme.contains("service/noobaa-mgmt 11443:8443"));
        assert!(readme.contains("service/s3 10443:443"));
    }

    #[test]
    fn test_name_ns_requires_both() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("noobaa-admin".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(name_ns(&secret).is_err());
    }
}
