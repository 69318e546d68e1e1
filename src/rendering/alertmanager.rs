//! Alertmanager manifests.
//!
//! Alertmanager runs as a StatefulSet so each replica keeps its silences
//! and notification log on its own volume. Its web UI is only reachable
//! through the oauth-proxy sidecar. Replicas find each other through the
//! headless governing Service.
//!
//! The configuration Secret is seeded once by the controller and then
//! belongs to the user, so it is not part of the rendered set.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ExecAction, ObjectFieldSelector,
    PodTemplateSpec, Probe, Secret, Service, ServiceAccount, ServicePort, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Serialize;

use crate::controller::error::Error;
use crate::crd::MultiClusterObservability;
use crate::rendering::common::{
    OAUTH_PROXY_PORT, RenderContext, container_port, headless, oauth_proxy_volumes,
    object_metadata, replicas, resource_requirements, restricted_security_context, secret_volume,
};

pub const COMPONENT: &str = "alertmanager";
pub const STATEFULSET_NAME: &str = "observability-alertmanager";
pub const SERVICE_NAME: &str = "alertmanager";
/// Headless Service giving each replica a stable DNS name for gossip.
pub const GOVERNING_SERVICE_NAME: &str = "alertmanager-operated";
pub const SERVICE_ACCOUNT_NAME: &str = "alertmanager";
pub const CONFIG_SECRET_NAME: &str = "alertmanager-config";
pub const CONFIG_SECRET_KEY: &str = "alertmanager.yaml";
const TLS_SECRET_NAME: &str = "alertmanager-tls";
const VOLUME_CLAIM_NAME: &str = "alertmanager-db";
const WEB_PORT: i32 = 9093;
const CLUSTER_PORT: i32 = 9094;
const DEFAULT_REPLICAS: i32 = 3;

/// Rendered Alertmanager objects.
pub struct AlertmanagerManifests {
    pub service_account: ServiceAccount,
    pub service: Service,
    pub governing_service: Service,
    pub statefulset: StatefulSet,
}

/// Generate all Alertmanager objects.
pub fn generate(ctx: &RenderContext<'_>) -> AlertmanagerManifests {
    AlertmanagerManifests {
        service_account: ctx.service_account(SERVICE_ACCOUNT_NAME, COMPONENT, Some(SERVICE_NAME)),
        service: ctx.service(
            SERVICE_NAME,
            COMPONENT,
            &[("oauth-proxy", OAUTH_PROXY_PORT)],
            Some(TLS_SECRET_NAME),
        ),
        governing_service: generate_governing_service(ctx),
        statefulset: generate_statefulset(ctx),
    }
}

/// Headless Service for the cluster mesh. Addresses are published before
/// pods are ready so replicas can join each other while starting.
fn generate_governing_service(ctx: &RenderContext<'_>) -> Service {
    let mut service = headless(ctx.service(
        GOVERNING_SERVICE_NAME,
        COMPONENT,
        &[("mesh-tcp", CLUSTER_PORT)],
        None,
    ));
    if let Some(spec) = service.spec.as_mut() {
        spec.publish_not_ready_addresses = Some(true);
        if let Some(ports) = spec.ports.as_mut() {
            ports.push(ServicePort {
                name: Some("mesh-udp".to_string()),
                port: CLUSTER_PORT,
                target_port: Some(IntOrString::String("mesh-udp".to_string())),
                protocol: Some("UDP".to_string()),
                ..Default::default()
            });
        }
    }
    service
}

#[derive(Serialize)]
struct AlertmanagerConfig {
    global: GlobalConfig,
    route: RouteConfig,
    receivers: Vec<ReceiverConfig>,
}

#[derive(Serialize)]
struct GlobalConfig {
    resolve_timeout: String,
}

#[derive(Serialize)]
struct RouteConfig {
    receiver: String,
    group_by: Vec<String>,
    group_wait: String,
    group_interval: String,
    repeat_interval: String,
}

#[derive(Serialize)]
struct ReceiverConfig {
    name: String,
}

/// Seed configuration: everything is routed to a null receiver.
fn default_config() -> AlertmanagerConfig {
    AlertmanagerConfig {
        global: GlobalConfig {
            resolve_timeout: "5m".to_string(),
        },
        route: RouteConfig {
            receiver: "null".to_string(),
            group_by: vec!["namespace".to_string()],
            group_wait: "30s".to_string(),
            group_interval: "5m".to_string(),
            repeat_interval: "12h".to_string(),
        },
        receivers: vec![ReceiverConfig {
            name: "null".to_string(),
        }],
    }
}

/// Configuration Secret created when none exists. Later edits by the user
/// are never overwritten.
pub fn default_config_secret(
    mco: &MultiClusterObservability,
    namespace: &str,
) -> Result<Secret, Error> {
    let config = serde_yaml::to_string(&default_config())?;
    let mut string_data = BTreeMap::new();
    string_data.insert(CONFIG_SECRET_KEY.to_string(), config);

    Ok(Secret {
        metadata: object_metadata(mco, namespace, CONFIG_SECRET_NAME, COMPONENT),
        type_: Some("Opaque".to_string()),
        string_data: Some(string_data),
        ..Default::default()
    })
}

fn generate_statefulset(ctx: &RenderContext<'_>) -> StatefulSet {
    let overrides = ctx
        .mco
        .spec
        .advanced
        .as_ref()
        .and_then(|a| a.alertmanager.as_ref());
    let replica_count = replicas(overrides, DEFAULT_REPLICAS);

    let mut pod_spec = ctx.pod_spec(
        SERVICE_ACCOUNT_NAME,
        vec![
            alertmanager_container(ctx, replica_count),
            config_reloader_container(ctx),
            ctx.oauth_proxy_container(SERVICE_ACCOUNT_NAME, WEB_PORT),
        ],
    );
    let mut volumes = vec![secret_volume("config-volume", CONFIG_SECRET_NAME)];
    volumes.extend(oauth_proxy_volumes(TLS_SECRET_NAME));
    pod_spec.volumes = Some(volumes);

    StatefulSet {
        metadata: ctx.metadata(STATEFULSET_NAME, COMPONENT),
        spec: Some(StatefulSetSpec {
            replicas: Some(replica_count),
            service_name: Some(GOVERNING_SERVICE_NAME.to_string()),
            selector: ctx.label_selector(COMPONENT),
            pod_management_policy: Some("Parallel".to_string()),
            template: PodTemplateSpec {
                metadata: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                    labels: Some(ctx.labels(COMPONENT)),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            volume_claim_templates: Some(vec![ctx.volume_claim(
                VOLUME_CLAIM_NAME,
                &ctx.storage.alertmanager_storage_size,
            )]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn alertmanager_container(ctx: &RenderContext<'_>, replica_count: i32) -> Container {
    let mut args = vec![
        format!("--config.file=/etc/alertmanager/config/{}", CONFIG_SECRET_KEY),
        "--storage.path=/alertmanager".to_string(),
        "--data.retention=120h".to_string(),
        format!("--web.listen-address=127.0.0.1:{}", WEB_PORT),
        format!("--cluster.listen-address=[$(POD_IP)]:{}", CLUSTER_PORT),
        "--log.level=info".to_string(),
    ];
    for ordinal in 0..replica_count {
        args.push(format!(
            "--cluster.peer={}-{}.{}:{}",
            STATEFULSET_NAME,
            ordinal,
            ctx.service_host(GOVERNING_SERVICE_NAME),
            CLUSTER_PORT
        ));
    }

    let overrides = ctx
        .mco
        .spec
        .advanced
        .as_ref()
        .and_then(|a| a.alertmanager.as_ref());

    Container {
        name: "alertmanager".to_string(),
        image: Some(ctx.images.alertmanager.clone()),
        image_pull_policy: ctx.pull_policy(),
        args: Some(args),
        env: Some(vec![EnvVar {
            name: "POD_IP".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "status.podIP".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ports: Some(vec![
            container_port("mesh-tcp", CLUSTER_PORT),
            ContainerPort {
                container_port: CLUSTER_PORT,
                name: Some("mesh-udp".to_string()),
                protocol: Some("UDP".to_string()),
                ..Default::default()
            },
        ]),
        resources: Some(resource_requirements(overrides, ("4m", "200Mi"), None)),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "config-volume".to_string(),
                mount_path: "/etc/alertmanager/config".to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: VOLUME_CLAIM_NAME.to_string(),
                mount_path: "/alertmanager".to_string(),
                ..Default::default()
            },
        ]),
        // The web listener is bound to loopback, so readiness is checked
        // from inside the container.
        readiness_probe: Some(Probe {
            exec: Some(ExecAction {
                command: Some(vec![
                    "wget".to_string(),
                    "--quiet".to_string(),
                    "--tries=1".to_string(),
                    "--spider".to_string(),
                    format!("http://127.0.0.1:{}/-/ready", WEB_PORT),
                ]),
            }),
            initial_delay_seconds: Some(3),
            period_seconds: Some(5),
            ..Default::default()
        }),
        security_context: Some(restricted_security_context()),
        ..Default::default()
    }
}

/// Sidecar that reloads Alertmanager when the config Secret changes.
fn config_reloader_container(ctx: &RenderContext<'_>) -> Container {
    Container {
        name: "config-reloader".to_string(),
        image: Some(ctx.images.configmap_reloader.clone()),
        image_pull_policy: ctx.pull_policy(),
        args: Some(vec![
            "-volume-dir=/etc/alertmanager/config".to_string(),
            format!("-webhook-url=http://127.0.0.1:{}/-/reload", WEB_PORT),
        ]),
        resources: Some(resource_requirements(None, ("4m", "25Mi"), None)),
        volume_mounts: Some(vec![VolumeMount {
            name: "config-volume".to_string(),
            mount_path: "/etc/alertmanager/config".to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        security_context: Some(restricted_security_context()),
        ..Default::default()
    }
}
