//! Service address discovery

use super::System;
use crate::crd::ServiceStatus;
use crate::domain::ports::ClusterClient;
use k8s_openapi::api::core::v1::{Pod, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::{info, warn};

/// Find a port of a service by name
pub fn find_port_by_name<'a>(srv: &'a Service, port_name: &str) -> Option<&'a ServicePort> {
    srv.spec
        .as_ref()?
        .ports
        .as_ref()?
        .iter()
        .find(|p| p.name.as_deref() == Some(port_name))
}

fn protocol(port_name: &str) -> &'static str {
    if port_name.ends_with("https") {
        "https"
    } else {
        "http"
    }
}

fn target_port(port: &ServicePort) -> String {
    match &port.target_port {
        Some(IntOrString::Int(p)) => p.to_string(),
        Some(IntOrString::String(p)) => p.clone(),
        None => port.port.to_string(),
    }
}

/// Addresses of `srv` reachable through the cluster and from outside
fn service_addresses(srv: &Service, port: &ServicePort, proto: &str, status: &mut ServiceStatus) {
    let name = srv.metadata.name.as_deref().unwrap_or_default();
    let namespace = srv.metadata.namespace.as_deref().unwrap_or_default();

    if let Some(cluster_ip) = srv
        .spec
        .as_ref()
        .and_then(|s| s.cluster_ip.as_deref())
        .filter(|ip| !ip.is_empty())
    {
        status
            .internal_ip
            .push(format!("{}://{}:{}", proto, cluster_ip, port.port));
        status
            .internal_dns
            .push(format!("{}://{}.{}:{}", proto, name, namespace, port.port));
    }

    let ingress = srv
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref());
    for lb in ingress.into_iter().flatten() {
        if let Some(ip) = lb.ip.as_deref().filter(|ip| !ip.is_empty()) {
            status
                .external_ip
                .push(format!("{}://{}:{}", proto, ip, port.port));
        }
        if let Some(host) = lb.hostname.as_deref().filter(|h| !h.is_empty()) {
            status
                .external_dns
                .push(format!("{}://{}:{}", proto, host, port.port));
        }
    }

    let external_ips = srv.spec.as_ref().and_then(|s| s.external_ips.as_ref());
    for ip in external_ips.into_iter().flatten() {
        status
            .external_ip
            .push(format!("{}://{}:{}", proto, ip, port.port));
    }
}

/// Per-pod addresses of running pods behind the service
fn pod_addresses(pods: &[Pod], port: &ServicePort, proto: &str, status: &mut ServiceStatus) {
    let node_port = port.node_port.unwrap_or_default();
    let target = target_port(port);
    let running = pods
        .iter()
        .filter_map(|p| p.status.as_ref())
        .filter(|s| s.phase.as_deref() == Some("Running"));

    for pod in running {
        if let Some(host_ip) = pod.host_ip.as_deref().filter(|ip| !ip.is_empty()) {
            status
                .node_ports
                .push(format!("{}://{}:{}", proto, host_ip, node_port));
        }
        if let Some(pod_ip) = pod.pod_ip.as_deref().filter(|ip| !ip.is_empty()) {
            status
                .pod_ports
                .push(format!("{}://{}:{}", proto, pod_ip, target));
        }
    }
}

impl<C: ClusterClient> System<C> {
    /// Collect every address of `srv` on the named port.
    ///
    /// Best effort: missing address families stay empty and a failure to
    /// list pods is only logged.
    pub(super) async fn check_service_status(&self, srv: &Service, port_name: &str) -> ServiceStatus {
        let mut status = ServiceStatus::default();
        let service_name = srv.metadata.name.as_deref().unwrap_or_default();
        let Some(port) = find_port_by_name(srv, port_name).cloned() else {
            warn!(service = service_name, port = port_name, "Service has no such port");
            return status;
        };
        let proto = protocol(port_name);

        let selector = srv
            .spec
            .as_ref()
            .and_then(|s| s.selector.clone())
            .unwrap_or_default();
        match self
            .guard(self.ctx.cluster.list::<Pod>(&self.request.namespace, &selector))
            .await
        {
            Ok(pods) => pod_addresses(&pods, &port, proto, &mut status),
            Err(err) => warn!(service = service_name, "Failed to list pods: {}", err),
        }

        service_addresses(srv, &port, proto, &mut status);

        info!(service = service_name, "Collected addresses: {:?}", status);
        status
    }
}
