//! RBAC query proxy manifests.
//!
//! The proxy sits in front of Thanos query-frontend and injects label
//! matchers so users only read metrics of managed clusters they can access.
//! It verifies client certificates against the cluster client CA, which is
//! copied into the render namespace as its own ConfigMap.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, PodTemplateSpec, Service, ServiceAccount, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::config::CLIENT_CA_CONFIGMAP_KEY;
use crate::rendering::common::{
    RenderContext, container_port, oauth_proxy_volumes, replicas,
    resource_requirements, restricted_security_context,
};
use crate::rendering::thanos;

pub const COMPONENT: &str = "rbac-query-proxy";
pub const DEPLOYMENT_NAME: &str = "observability-rbac-query-proxy";
pub const SERVICE_NAME: &str = "rbac-query-proxy";
pub const SERVICE_ACCOUNT_NAME: &str = "rbac-query-proxy";
pub const CLIENT_CA_CONFIGMAP_NAME: &str = "observability-client-ca";
pub const HTTPS_PORT: i32 = 8443;
const TLS_SECRET_NAME: &str = "rbac-proxy-tls";
const HTTP_PORT: i32 = 8080;
const DEFAULT_REPLICAS: i32 = 2;

/// Rendered RBAC query proxy objects.
pub struct ProxyManifests {
    pub client_ca: ConfigMap,
    pub service_account: ServiceAccount,
    pub service: Service,
    pub deployment: Deployment,
}

/// Generate all RBAC query proxy objects.
pub fn generate(ctx: &RenderContext<'_>) -> ProxyManifests {
    ProxyManifests {
        client_ca: generate_client_ca(ctx),
        service_account: ctx.service_account(SERVICE_ACCOUNT_NAME, COMPONENT, Some(SERVICE_NAME)),
        service: generate_service(ctx),
        deployment: generate_deployment(ctx),
    }
}

/// Copy of the cluster client CA bundle in the render namespace.
fn generate_client_ca(ctx: &RenderContext<'_>) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert(CLIENT_CA_CONFIGMAP_KEY.to_string(), ctx.client_ca.clone());
    ConfigMap {
        metadata: ctx.metadata(CLIENT_CA_CONFIGMAP_NAME, COMPONENT),
        data: Some(data),
        ..Default::default()
    }
}

/// The Service exposes the oauth-proxy port under the name `https`.
fn generate_service(ctx: &RenderContext<'_>) -> Service {
    let mut service = ctx.service(
        SERVICE_NAME,
        COMPONENT,
        &[("oauth-proxy", HTTPS_PORT)],
        Some(TLS_SECRET_NAME),
    );
    if let Some(ports) = service.spec.as_mut().and_then(|s| s.ports.as_mut()) {
        for port in ports {
            port.name = Some("https".to_string());
        }
    }
    service
}

fn generate_deployment(ctx: &RenderContext<'_>) -> Deployment {
    let overrides = ctx
        .mco
        .spec
        .advanced
        .as_ref()
        .and_then(|a| a.rbac_query_proxy.as_ref());

    let metrics_server = format!(
        "http://{}:{}",
        ctx.service_host(thanos::QUERY_FRONTEND_NAME),
        thanos::QUERY_FRONTEND_PORT
    );

    let proxy = Container {
        name: "rbac-query-proxy".to_string(),
        image: Some(ctx.images.rbac_query_proxy.clone()),
        image_pull_policy: ctx.pull_policy(),
        args: Some(vec![
            format!("--listen-address=0.0.0.0:{}", HTTP_PORT),
            format!("--metrics-server={}", metrics_server),
            format!(
                "--client-ca-file=/var/run/client-ca/{}",
                CLIENT_CA_CONFIGMAP_KEY
            ),
        ]),
        ports: Some(vec![container_port("http", HTTP_PORT)]),
        resources: Some(resource_requirements(overrides, ("20m", "100Mi"), None)),
        volume_mounts: Some(vec![VolumeMount {
            name: "client-ca".to_string(),
            mount_path: "/var/run/client-ca".to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        security_context: Some(restricted_security_context()),
        ..Default::default()
    };

    let mut pod_spec = ctx.pod_spec(
        SERVICE_ACCOUNT_NAME,
        vec![proxy, ctx.oauth_proxy_container(SERVICE_ACCOUNT_NAME, HTTP_PORT)],
    );
    let mut volumes = vec![Volume {
        name: "client-ca".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: CLIENT_CA_CONFIGMAP_NAME.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }];
    volumes.extend(oauth_proxy_volumes(TLS_SECRET_NAME));
    pod_spec.volumes = Some(volumes);

    Deployment {
        metadata: ctx.metadata(DEPLOYMENT_NAME, COMPONENT),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas(overrides, DEFAULT_REPLICAS)),
            selector: ctx.label_selector(COMPONENT),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(ctx.labels(COMPONENT)),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
