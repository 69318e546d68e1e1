//! Grafana manifests.
//!
//! Grafana queries metrics through the RBAC query proxy so every user only
//! sees the managed clusters they have access to.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EmptyDirVolumeSource, HTTPGetAction,
    PodTemplateSpec, Probe, Service, ServiceAccount, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Serialize;

use crate::controller::error::Error;
use crate::rendering::common::{
    RenderContext, container_port, replicas, resource_requirements, restricted_security_context,
};
use crate::rendering::proxy;

pub const COMPONENT: &str = "grafana";
pub const DEPLOYMENT_NAME: &str = "observability-grafana";
pub const SERVICE_NAME: &str = "grafana";
pub const SERVICE_ACCOUNT_NAME: &str = "grafana";
pub const DATASOURCES_CONFIGMAP_NAME: &str = "grafana-datasources";
pub const DATASOURCES_KEY: &str = "datasources.yaml";
const HTTP_PORT: i32 = 3001;
const DEFAULT_REPLICAS: i32 = 2;

/// Rendered Grafana objects.
pub struct GrafanaManifests {
    pub service_account: ServiceAccount,
    pub datasources: ConfigMap,
    pub service: Service,
    pub deployment: Deployment,
}

/// Generate all Grafana objects.
pub fn generate(ctx: &RenderContext<'_>) -> Result<GrafanaManifests, Error> {
    Ok(GrafanaManifests {
        service_account: ctx.service_account(SERVICE_ACCOUNT_NAME, COMPONENT, None),
        datasources: generate_datasources(ctx)?,
        service: ctx.service(SERVICE_NAME, COMPONENT, &[("http", HTTP_PORT)], None),
        deployment: generate_deployment(ctx),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasourcesFile {
    api_version: i32,
    datasources: Vec<Datasource>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Datasource {
    name: String,
    #[serde(rename = "type")]
    type_: String,
    access: String,
    url: String,
    is_default: bool,
    editable: bool,
    json_data: BTreeMap<String, serde_yaml::Value>,
}

fn generate_datasources(ctx: &RenderContext<'_>) -> Result<ConfigMap, Error> {
    let mut json_data = BTreeMap::new();
    json_data.insert(
        "timeInterval".to_string(),
        serde_yaml::Value::String(format!(
            "{}s",
            ctx.mco.spec.observability_addon_spec.interval
        )),
    );
    json_data.insert(
        "tlsSkipVerify".to_string(),
        serde_yaml::Value::Bool(true),
    );

    let file = DatasourcesFile {
        api_version: 1,
        datasources: vec![Datasource {
            name: "Observatorium".to_string(),
            type_: "prometheus".to_string(),
            access: "proxy".to_string(),
            url: format!(
                "https://{}:{}",
                ctx.service_host(proxy::SERVICE_NAME),
                proxy::HTTPS_PORT
            ),
            is_default: true,
            editable: false,
            json_data,
        }],
    };

    let mut data = BTreeMap::new();
    data.insert(DATASOURCES_KEY.to_string(), serde_yaml::to_string(&file)?);

    Ok(ConfigMap {
        metadata: ctx.metadata(DATASOURCES_CONFIGMAP_NAME, COMPONENT),
        data: Some(data),
        ..Default::default()
    })
}

fn generate_deployment(ctx: &RenderContext<'_>) -> Deployment {
    let overrides = ctx
        .mco
        .spec
        .advanced
        .as_ref()
        .and_then(|a| a.grafana.as_ref());

    let mut pod_spec = ctx.pod_spec(
        SERVICE_ACCOUNT_NAME,
        vec![
            Container {
                name: "grafana".to_string(),
                image: Some(ctx.images.grafana.clone()),
                image_pull_policy: ctx.pull_policy(),
                args: Some(vec![
                    "-config=/etc/grafana/grafana.ini".to_string(),
                ]),
                ports: Some(vec![container_port("http", HTTP_PORT)]),
                resources: Some(resource_requirements(overrides, ("4m", "100Mi"), None)),
                volume_mounts: Some(vec![
                    VolumeMount {
                        name: "grafana-storage".to_string(),
                        mount_path: "/var/lib/grafana".to_string(),
                        ..Default::default()
                    },
                    VolumeMount {
                        name: "grafana-datasources".to_string(),
                        mount_path: "/etc/grafana/provisioning/datasources".to_string(),
                        read_only: Some(true),
                        ..Default::default()
                    },
                ]),
                readiness_probe: Some(Probe {
                    http_get: Some(HTTPGetAction {
                        path: Some("/api/health".to_string()),
                        port: IntOrString::Int(HTTP_PORT),
                        ..Default::default()
                    }),
                    period_seconds: Some(10),
                    ..Default::default()
                }),
                security_context: Some(restricted_security_context()),
                ..Default::default()
            },
            Container {
                name: "grafana-dashboard-loader".to_string(),
                image: Some(ctx.images.grafana_dashboard_loader.clone()),
                image_pull_policy: ctx.pull_policy(),
                env: Some(vec![k8s_openapi::api::core::v1::EnvVar {
                    name: "POD_NAMESPACE".to_string(),
                    value: Some(ctx.namespace.clone()),
                    ..Default::default()
                }]),
                resources: Some(resource_requirements(None, ("4m", "50Mi"), None)),
                security_context: Some(restricted_security_context()),
                ..Default::default()
            },
        ],
    );
    pod_spec.volumes = Some(vec![
        Volume {
            name: "grafana-storage".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        Volume {
            name: "grafana-datasources".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: DATASOURCES_CONFIGMAP_NAME.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        },
    ]);

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
