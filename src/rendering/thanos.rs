//! Thanos manifests.
//!
//! Managed clusters remote-write into receive. Receive and rule upload
//! blocks to object storage, store serves them back, compact downsamples
//! and applies retention. Query fans out to receive, rule and store, and
//! query-frontend caches and splits queries in front of it.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EnvVar, EnvVarSource, HTTPGetAction,
    ObjectFieldSelector, PodTemplateSpec, Probe, Service, ServiceAccount, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Serialize;

use crate::controller::error::Error;
use crate::crd::RetentionConfig;
use crate::rendering::alertmanager;
use crate::rendering::common::{
    OAUTH_PROXY_PORT, RenderContext, container_port, headless, replicas, resource_requirements,
    restricted_security_context,
};

pub const COMPACT_NAME: &str = "observability-thanos-compact";
pub const RECEIVE_NAME: &str = "observability-thanos-receive-default";
pub const RULE_NAME: &str = "observability-thanos-rule";
pub const STORE_NAME: &str = "observability-thanos-store";
pub const QUERY_NAME: &str = "observability-thanos-query";
pub const QUERY_FRONTEND_NAME: &str = "observability-thanos-query-frontend";
pub const RECEIVE_HASHRINGS_CONFIGMAP_NAME: &str = "observability-thanos-receive-hashrings";
pub const RECEIVE_HASHRINGS_KEY: &str = "hashrings.json";
pub const RULE_DEFAULT_RULES_CONFIGMAP_NAME: &str = "thanos-ruler-default-rules";
pub const RULE_DEFAULT_RULES_KEY: &str = "default_rules.yaml";
/// Service account shared by every Thanos workload.
pub const THANOS_SERVICE_ACCOUNT: &str = "observability-thanos";

pub const GRPC_PORT: i32 = 10901;
pub const HTTP_PORT: i32 = 10902;
pub const REMOTE_WRITE_PORT: i32 = 19291;
pub const QUERY_FRONTEND_PORT: i32 = 9090;
const QUERY_HTTP_PORT: i32 = 9090;

const DATA_VOLUME: &str = "data";
const DATA_PATH: &str = "/var/thanos/data";

const COMPACT_COMPONENT: &str = "thanos-compact";
const RECEIVE_COMPONENT: &str = "thanos-receive";
const RULE_COMPONENT: &str = "thanos-rule";
const STORE_COMPONENT: &str = "thanos-store";
const QUERY_COMPONENT: &str = "thanos-query";
const QUERY_FRONTEND_COMPONENT: &str = "thanos-query-frontend";

/// Rendered Thanos objects.
pub struct ThanosManifests {
    pub service_account: ServiceAccount,
    pub receive_hashrings: ConfigMap,
    pub rule_default_rules: ConfigMap,
    pub compact: StatefulSet,
    pub receive: StatefulSet,
    pub rule: StatefulSet,
    pub store: StatefulSet,
    pub query: Deployment,
    pub query_frontend: Deployment,
    pub services: Vec<Service>,
}

/// Generate all Thanos objects.
pub fn generate(ctx: &RenderContext<'_>) -> Result<ThanosManifests, Error> {
    let advanced = ctx.mco.spec.advanced.as_ref();
    let retention = ctx.mco.retention();
    let receive_replicas = replicas(advanced.and_then(|a| a.receive.as_ref()), 3);

    Ok(ThanosManifests {
        service_account: ctx.service_account(THANOS_SERVICE_ACCOUNT, "thanos", None),
        receive_hashrings: generate_receive_hashrings(ctx, receive_replicas)?,
        rule_default_rules: generate_default_rules(ctx)?,
        compact: generate_compact(ctx, &retention),
        receive: generate_receive(ctx, &retention, receive_replicas),
        rule: generate_rule(ctx, &retention)?,
        store: generate_store(ctx),
        query: generate_query(ctx),
        query_frontend: generate_query_frontend(ctx),
        services: generate_services(ctx),
    })
}

fn generate_services(ctx: &RenderContext<'_>) -> Vec<Service> {
    vec![
        headless(ctx.service(
            COMPACT_NAME,
            COMPACT_COMPONENT,
            &[("http", HTTP_PORT)],
            None,
        )),
        headless(ctx.service(
            RECEIVE_NAME,
            RECEIVE_COMPONENT,
            &[
                ("grpc", GRPC_PORT),
                ("http", HTTP_PORT),
                ("remote-write", REMOTE_WRITE_PORT),
            ],
            None,
        )),
        headless(ctx.service(
            RULE_NAME,
            RULE_COMPONENT,
            &[("grpc", GRPC_PORT), ("http", HTTP_PORT)],
            None,
        )),
        headless(ctx.service(
            STORE_NAME,
            STORE_COMPONENT,
            &[("grpc", GRPC_PORT), ("http", HTTP_PORT)],
            None,
        )),
        ctx.service(
            QUERY_NAME,
            QUERY_COMPONENT,
            &[("grpc", GRPC_PORT), ("http", QUERY_HTTP_PORT)],
            None,
        ),
        ctx.service(
            QUERY_FRONTEND_NAME,
            QUERY_FRONTEND_COMPONENT,
            &[("http", QUERY_FRONTEND_PORT)],
            None,
        ),
    ]
}

#[derive(Serialize)]
struct Hashring {
    hashring: String,
    endpoints: Vec<String>,
}

/// Static hashring listing every receive replica.
fn generate_receive_hashrings(
    ctx: &RenderContext<'_>,
    receive_replicas: i32,
) -> Result<ConfigMap, Error> {
    let endpoints = (0..receive_replicas)
        .map(|ordinal| receive_endpoint(ctx, &format!("{}-{}", RECEIVE_NAME, ordinal)))
        .collect();
    let hashrings = vec![Hashring {
        hashring: "default".to_string(),
        endpoints,
    }];

    let mut data = BTreeMap::new();
    data.insert(
        RECEIVE_HASHRINGS_KEY.to_string(),
        serde_json::to_string(&hashrings)?,
    );
    Ok(ConfigMap {
        metadata: ctx.metadata(RECEIVE_HASHRINGS_CONFIGMAP_NAME, RECEIVE_COMPONENT),
        data: Some(data),
        ..Default::default()
    })
}

fn receive_endpoint(ctx: &RenderContext<'_>, pod: &str) -> String {
    format!("{}.{}:{}", pod, ctx.service_host(RECEIVE_NAME), GRPC_PORT)
}

#[derive(Serialize)]
struct RuleFile {
    groups: Vec<serde_yaml::Value>,
}

fn generate_default_rules(ctx: &RenderContext<'_>) -> Result<ConfigMap, Error> {
    let mut data = BTreeMap::new();
    data.insert(
        RULE_DEFAULT_RULES_KEY.to_string(),
        serde_yaml::to_string(&RuleFile { groups: Vec::new() })?,
    );
    Ok(ConfigMap {
        metadata: ctx.metadata(RULE_DEFAULT_RULES_CONFIGMAP_NAME, RULE_COMPONENT),
        data: Some(data),
        ..Default::default()
    })
}

fn generate_compact(ctx: &RenderContext<'_>, retention: &RetentionConfig) -> StatefulSet {
    let overrides = ctx.mco.spec.advanced.as_ref().and_then(|a| a.compact.as_ref());

    let mut args = vec![
        "compact".to_string(),
        "--wait".to_string(),
        format!("--http-address=0.0.0.0:{}", HTTP_PORT),
        format!("--data-dir={}", DATA_PATH),
        "--objstore.config=$(OBJSTORE_CONFIG)".to_string(),
        format!("--retention.resolution-raw={}", retention.retention_resolution_raw),
        format!("--retention.resolution-5m={}", retention.retention_resolution5m),
        format!("--retention.resolution-1h={}", retention.retention_resolution1h),
        format!("--delete-delay={}", retention.delete_delay),
        "--compact.concurrency=1".to_string(),
        "--log.level=info".to_string(),
    ];
    if !ctx.mco.spec.enable_downsampling {
        args.push("--downsampling.disable".to_string());
    }

    let container = thanos_container(
        ctx,
        "thanos-compact",
        args,
        vec![container_port("http", HTTP_PORT)],
        resource_requirements(overrides, ("100m", "512Mi"), None),
        true,
    );

    stateful(
        ctx,
        COMPACT_NAME,
        COMPACT_COMPONENT,
        replicas(overrides, 1),
        container,
        Vec::new(),
        &ctx.storage.compact_storage_size,
    )
}

fn generate_receive(
    ctx: &RenderContext<'_>,
    retention: &RetentionConfig,
    receive_replicas: i32,
) -> StatefulSet {
    let overrides = ctx.mco.spec.advanced.as_ref().and_then(|a| a.receive.as_ref());

    let args = vec![
        "receive".to_string(),
        format!("--grpc-address=0.0.0.0:{}", GRPC_PORT),
        format!("--http-address=0.0.0.0:{}", HTTP_PORT),
        format!("--remote-write.address=0.0.0.0:{}", REMOTE_WRITE_PORT),
        format!("--tsdb.path={}", DATA_PATH),
        format!("--tsdb.retention={}", retention.retention_in_local),
        format!("--tsdb.min-block-duration={}", retention.block_duration),
        format!("--tsdb.max-block-duration={}", retention.block_duration),
        "--objstore.config=$(OBJSTORE_CONFIG)".to_string(),
        "--label=replica=\"$(POD_NAME)\"".to_string(),
        "--receive.replication-factor=1".to_string(),
        format!(
            "--receive.hashrings-file=/etc/thanos/hashrings/{}",
            RECEIVE_HASHRINGS_KEY
        ),
        format!(
            "--receive.local-endpoint=$(POD_NAME).{}:{}",
            ctx.service_host(RECEIVE_NAME),
            GRPC_PORT
        ),
        "--log.level=info".to_string(),
    ];

    let mut container = thanos_container(
        ctx,
        "thanos-receive",
        args,
        vec![
            container_port("grpc", GRPC_PORT),
            container_port("http", HTTP_PORT),
            container_port("remote-write", REMOTE_WRITE_PORT),
        ],
        resource_requirements(overrides, ("300m", "512Mi"), None),
        true,
    );
    container
        .env
        .get_or_insert_with(Vec::new)
        .push(pod_name_env());
    container
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .push(VolumeMount {
            name: "hashrings".to_string(),
            mount_path: "/etc/thanos/hashrings".to_string(),
            read_only: Some(true),
            ..Default::default()
        });

    stateful(
        ctx,
        RECEIVE_NAME,
        RECEIVE_COMPONENT,
        receive_replicas,
        container,
        vec![config_map_volume("hashrings", RECEIVE_HASHRINGS_CONFIGMAP_NAME)],
        &ctx.storage.receive_storage_size,
    )
}

#[derive(Serialize)]
struct AlertmanagersFile {
    alertmanagers: Vec<AlertmanagerEndpoint>,
}

#[derive(Serialize)]
struct AlertmanagerEndpoint {
    static_configs: Vec<String>,
    scheme: String,
    api_version: String,
    http_config: AlertmanagerHttpConfig,
}

#[derive(Serialize)]
struct AlertmanagerHttpConfig {
    bearer_token_file: String,
    tls_config: AlertmanagerTlsConfig,
}

#[derive(Serialize)]
struct AlertmanagerTlsConfig {
    ca_file: String,
    server_name: String,
}

/// Thanos rule reaches Alertmanager through its oauth-proxy using the
/// pod's service account token.
fn alertmanagers_config(ctx: &RenderContext<'_>) -> Result<String, Error> {
    let host = ctx.service_host(alertmanager::SERVICE_NAME);
    let file = AlertmanagersFile {
        alertmanagers: vec![AlertmanagerEndpoint {
            static_configs: vec![format!("{}:{}", host, OAUTH_PROXY_PORT)],
            scheme: "https".to_string(),
            api_version: "v2".to_string(),
            http_config: AlertmanagerHttpConfig {
                bearer_token_file: "/var/run/secrets/kubernetes.io/serviceaccount/token"
                    .to_string(),
                tls_config: AlertmanagerTlsConfig {
                    ca_file: "/var/run/secrets/kubernetes.io/serviceaccount/service-ca.crt"
                        .to_string(),
                    server_name: host,
                },
            },
        }],
    };
    Ok(serde_yaml::to_string(&file)?)
}

fn generate_rule(ctx: &RenderContext<'_>, retention: &RetentionConfig) -> Result<StatefulSet, Error> {
    let overrides = ctx.mco.spec.advanced.as_ref().and_then(|a| a.rule.as_ref());

    let args = vec![
        "rule".to_string(),
        format!("--grpc-address=0.0.0.0:{}", GRPC_PORT),
        format!("--http-address=0.0.0.0:{}", HTTP_PORT),
        format!("--data-dir={}", DATA_PATH),
        "--eval-interval=30s".to_string(),
        format!("--tsdb.retention={}", retention.retention_in_local),
        format!("--tsdb.block-duration={}", retention.block_duration),
        "--objstore.config=$(OBJSTORE_CONFIG)".to_string(),
        "--label=thanos_ruler_replica=\"$(POD_NAME)\"".to_string(),
        "--alert.label-drop=thanos_ruler_replica".to_string(),
        format!(
            "--query=dnssrv+_http._tcp.{}",
            ctx.service_host(QUERY_NAME)
        ),
        format!("--alertmanagers.config={}", alertmanagers_config(ctx)?),
        format!("--rule-file=/etc/thanos/rules/{}", RULE_DEFAULT_RULES_KEY),
        "--log.level=info".to_string(),
    ];

    let mut container = thanos_container(
        ctx,
        "thanos-rule",
        args,
        vec![
            container_port("grpc", GRPC_PORT),
            container_port("http", HTTP_PORT),
        ],
        resource_requirements(overrides, ("50m", "512Mi"), None),
        true,
    );
    container
        .env
        .get_or_insert_with(Vec::new)
        .push(pod_name_env());
    container
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .push(VolumeMount {
            name: "default-rules".to_string(),
            mount_path: "/etc/thanos/rules".to_string(),
            read_only: Some(true),
            ..Default::default()
        });

    Ok(stateful(
        ctx,
        RULE_NAME,
        RULE_COMPONENT,
        replicas(overrides, 3),
        container,
        vec![config_map_volume(
            "default-rules",
            RULE_DEFAULT_RULES_CONFIGMAP_NAME,
        )],
        &ctx.storage.rule_storage_size,
    ))
}

fn generate_store(ctx: &RenderContext<'_>) -> StatefulSet {
    let overrides = ctx.mco.spec.advanced.as_ref().and_then(|a| a.store.as_ref());

    let args = vec![
        "store".to_string(),
        format!("--grpc-address=0.0.0.0:{}", GRPC_PORT),
        format!("--http-address=0.0.0.0:{}", HTTP_PORT),
        format!("--data-dir={}", DATA_PATH),
        "--objstore.config=$(OBJSTORE_CONFIG)".to_string(),
        "--ignore-deletion-marks-delay=24h".to_string(),
        "--log.level=info".to_string(),
    ];

    let container = thanos_container(
        ctx,
        "thanos-store",
        args,
        vec![
            container_port("grpc", GRPC_PORT),
            container_port("http", HTTP_PORT),
        ],
        resource_requirements(overrides, ("100m", "1Gi"), None),
        true,
    );

    stateful(
        ctx,
        STORE_NAME,
        STORE_COMPONENT,
        replicas(overrides, 1),
        container,
        Vec::new(),
        &ctx.storage.store_storage_size,
    )
}

fn generate_query(ctx: &RenderContext<'_>) -> Deployment {
    let overrides = ctx.mco.spec.advanced.as_ref().and_then(|a| a.query.as_ref());

    let mut args = vec![
        "query".to_string(),
        format!("--grpc-address=0.0.0.0:{}", GRPC_PORT),
        format!("--http-address=0.0.0.0:{}", QUERY_HTTP_PORT),
        "--query.replica-label=replica".to_string(),
        "--query.replica-label=thanos_ruler_replica".to_string(),
        "--query.auto-downsampling".to_string(),
        "--log.level=info".to_string(),
    ];
    for store in [RECEIVE_NAME, RULE_NAME, STORE_NAME] {
        args.push(format!(
            "--endpoint=dnssrv+_grpc._tcp.{}",
            ctx.service_host(store)
        ));
    }

    let container = thanos_container(
        ctx,
        "thanos-query",
        args,
        vec![
            container_port("grpc", GRPC_PORT),
            container_port("http", QUERY_HTTP_PORT),
        ],
        resource_requirements(overrides, ("300m", "1Gi"), None),
        false,
    );

    stateless(
        ctx,
        QUERY_NAME,
        QUERY_COMPONENT,
        replicas(overrides, 2),
        container,
    )
}

fn generate_query_frontend(ctx: &RenderContext<'_>) -> Deployment {
    let overrides = ctx
        .mco
        .spec
        .advanced
        .as_ref()
        .and_then(|a| a.query_frontend.as_ref());

    let args = vec![
        "query-frontend".to_string(),
        format!("--http-address=0.0.0.0:{}", QUERY_FRONTEND_PORT),
        format!(
            "--query-frontend.downstream-url=http://{}:{}",
            ctx.service_host(QUERY_NAME),
            QUERY_HTTP_PORT
        ),
        "--query-range.split-interval=24h".to_string(),
        "--query-range.max-retries-per-request=5".to_string(),
        "--log.level=info".to_string(),
    ];

    let container = thanos_container(
        ctx,
        "thanos-query-frontend",
        args,
        vec![container_port("http", QUERY_FRONTEND_PORT)],
        resource_requirements(overrides, ("100m", "256Mi"), None),
        false,
    );

    stateless(
        ctx,
        QUERY_FRONTEND_NAME,
        QUERY_FRONTEND_COMPONENT,
        replicas(overrides, 2),
        container,
    )
}

/// A Thanos container. Components touching object storage get the
/// objstore environment, TLS mount and the data volume mount.
fn thanos_container(
    ctx: &RenderContext<'_>,
    name: &str,
    args: Vec<String>,
    ports: Vec<k8s_openapi::api::core::v1::ContainerPort>,
    resources: k8s_openapi::api::core::v1::ResourceRequirements,
    uses_object_storage: bool,
) -> Container {
    let probe_port = ports
        .iter()
        .find(|p| p.name.as_deref() == Some("http"))
        .map(|p| p.container_port)
        .unwrap_or(HTTP_PORT);

    let mut env = Vec::new();
    let mut mounts = Vec::new();
    if uses_object_storage {
        env.push(ctx.objstore_env());
        mounts.push(VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: DATA_PATH.to_string(),
            ..Default::default()
        });
        if let Some((_, mount)) = ctx.objstore_tls() {
            mounts.push(mount);
        }
    }

    Container {
        name: name.to_string(),
        image: Some(ctx.images.thanos.clone()),
        image_pull_policy: ctx.pull_policy(),
        args: Some(args),
        env: if env.is_empty() { None } else { Some(env) },
        ports: Some(ports),
        resources: Some(resources),
        volume_mounts: if mounts.is_empty() { None } else { Some(mounts) },
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/-/ready".to_string()),
                port: IntOrString::Int(probe_port),
                ..Default::default()
            }),
            period_seconds: Some(5),
            failure_threshold: Some(20),
            ..Default::default()
        }),
        security_context: Some(restricted_security_context()),
        ..Default::default()
    }
}

fn pod_name_env() -> EnvVar {
    EnvVar {
        name: "POD_NAME".to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "metadata.name".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn config_map_volume(name: &str, config_map: &str) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn pod_template(ctx: &RenderContext<'_>, component: &str, spec: k8s_openapi::api::core::v1::PodSpec) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(ctx.labels(component)),
            ..Default::default()
        }),
        spec: Some(spec),
    }
}

/// StatefulSet with a data volume claim of `size`.
fn stateful(
    ctx: &RenderContext<'_>,
    name: &str,
    component: &str,
    replica_count: i32,
    container: Container,
    mut volumes: Vec<Volume>,
    size: &str,
) -> StatefulSet {
    if let Some((volume, _)) = ctx.objstore_tls() {
        volumes.push(volume);
    }
    let mut pod_spec = ctx.pod_spec(THANOS_SERVICE_ACCOUNT, vec![container]);
    pod_spec.volumes = if volumes.is_empty() { None } else { Some(volumes) };

    StatefulSet {
        metadata: ctx.metadata(name, component),
        spec: Some(StatefulSetSpec {
            replicas: Some(replica_count),
            service_name: Some(name.to_string()),
            selector: ctx.label_selector(component),
            pod_management_policy: Some("Parallel".to_string()),
            template: pod_template(ctx, component, pod_spec),
            volume_claim_templates: Some(vec![ctx.volume_claim(DATA_VOLUME, size)]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn stateless(
    ctx: &RenderContext<'_>,
    name: &str,
    component: &str,
    replica_count: i32,
    container: Container,
) -> Deployment {
    let pod_spec = ctx.pod_spec(THANOS_SERVICE_ACCOUNT, vec![container]);
    Deployment {
        metadata: ctx.metadata(name, component),
        spec: Some(DeploymentSpec {
            replicas: Some(replica_count),
            selector: ctx.label_selector(component),
            template: pod_template(ctx, component, pod_spec),
            ..Default::default()
        }),
        ..Default::default()
    }
}
