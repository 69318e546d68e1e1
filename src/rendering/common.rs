//! Shared building blocks for rendered manifests.
//!
//! Every generator receives a `RenderContext` holding the validated CR
//! inputs, resolved images and namespace, and uses the helpers here so that
//! labels, owner references, scheduling and pull settings are identical
//! across components.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EnvVar, EnvVarSource, LocalObjectReference,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSecurityContext, PodSpec,
    ResourceRequirements, SecretKeySelector, SecretVolumeSource, SecurityContext, Service,
    ServiceAccount, ServicePort, ServiceSpec, Toleration, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DynamicObject;
use kube::{Resource, ResourceExt};
use serde::Serialize;

use crate::config::OPERATOR_NAME;
use crate::controller::error::Error;
use crate::crd::{
    ComponentOverrides, MultiClusterObservability, PreConfiguredStorage, StorageConfig,
};
use crate::rendering::images::ImageSet;

/// Label carrying the owning CR name on every rendered object.
pub const OWNER_LABEL: &str = "observability.open-cluster-management.io/name";
/// Label carrying the component name on every rendered object.
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/name";

/// Annotation asking the OpenShift service CA to mint a serving certificate.
pub const SERVING_CERT_ANNOTATION: &str = "service.beta.openshift.io/serving-cert-secret-name";

/// Secret holding the oauth-proxy cookie secret, created by the controller.
pub const OAUTH_COOKIE_SECRET_NAME: &str = "observability-oauth-cookie";
pub const OAUTH_COOKIE_SECRET_KEY: &str = "session_secret";

/// Port the oauth-proxy sidecars listen on.
pub const OAUTH_PROXY_PORT: i32 = 9443;

/// Inputs shared by every component generator.
pub struct RenderContext<'a> {
    pub mco: &'a MultiClusterObservability,
    pub namespace: String,
    pub images: ImageSet,
    pub storage: &'a StorageConfig,
    pub object_storage: &'a PreConfiguredStorage,
    pub client_ca: String,
}

impl RenderContext<'_> {
    /// Labels for a component's objects.
    pub fn labels(&self, component: &str) -> BTreeMap<String, String> {
        component_labels(self.mco, component)
    }

    /// Stable subset of labels used in selectors.
    pub fn selector_labels(&self, component: &str) -> BTreeMap<String, String> {
        selector_labels(self.mco, component)
    }

    /// Metadata for a namespaced object belonging to `component`.
    pub fn metadata(&self, name: &str, component: &str) -> ObjectMeta {
        object_metadata(self.mco, &self.namespace, name, component)
    }

    pub fn label_selector(&self, component: &str) -> LabelSelector {
        LabelSelector {
            match_labels: Some(self.selector_labels(component)),
            ..Default::default()
        }
    }

    /// Pod spec skeleton carrying pull secret, node selector and tolerations.
    pub fn pod_spec(&self, service_account: &str, containers: Vec<Container>) -> PodSpec {
        let spec = &self.mco.spec;
        PodSpec {
            service_account_name: Some(service_account.to_string()),
            containers,
            image_pull_secrets: if spec.image_pull_secret.is_empty() {
                None
            } else {
                Some(vec![LocalObjectReference {
                    name: spec.image_pull_secret.clone(),
                }])
            },
            node_selector: if spec.node_selector.is_empty() {
                None
            } else {
                Some(spec.node_selector.clone())
            },
            tolerations: convert_tolerations(&spec.tolerations),
            security_context: Some(PodSecurityContext {
                run_as_non_root: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn pull_policy(&self) -> Option<String> {
        Some(self.mco.spec.image_pull_policy.clone())
    }

    /// PVC template named `name` using the configured storage class.
    pub fn volume_claim(&self, name: &str, size: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name: if self.storage.storage_class.is_empty() {
                    None
                } else {
                    Some(self.storage.storage_class.clone())
                },
                resources: Some(VolumeResourceRequirements {
                    requests: Some(quantities(&[("storage", size)])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Environment variable carrying the Thanos object storage config.
    pub fn objstore_env(&self) -> EnvVar {
        EnvVar {
            name: "OBJSTORE_CONFIG".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: self.object_storage.name.clone(),
                    key: self.object_storage.key.clone(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Volume and mount for object storage TLS material, when configured.
    pub fn objstore_tls(&self) -> Option<(Volume, VolumeMount)> {
        let secret = self.object_storage.tls_secret_name.as_ref()?;
        let mount_path = self
            .object_storage
            .tls_secret_mount_path
            .clone()
            .unwrap_or_else(|| "/etc/minio/certs".to_string());
        Some((
            secret_volume("objstore-tls", secret),
            VolumeMount {
                name: "objstore-tls".to_string(),
                mount_path,
                read_only: Some(true),
                ..Default::default()
            },
        ))
    }

    /// Internal DNS name of a Service in the render namespace.
    pub fn service_host(&self, service: &str) -> String {
        format!("{}.{}.svc", service, self.namespace)
    }

    /// oauth-proxy sidecar fronting `upstream_port` on localhost.
    ///
    /// TLS material comes from the serving certificate `tls_secret`,
    /// mounted through the volume returned by `oauth_proxy_volumes`.
    pub fn oauth_proxy_container(&self, service_account: &str, upstream_port: i32) -> Container {
        Container {
            name: "oauth-proxy".to_string(),
            image: Some(self.images.oauth_proxy.clone()),
            image_pull_policy: self.pull_policy(),
            args: Some(vec![
                "--provider=openshift".to_string(),
                format!("--https-address=:{}", OAUTH_PROXY_PORT),
                format!("--upstream=http://localhost:{}", upstream_port),
                format!("--openshift-service-account={}", service_account),
                "--tls-cert=/etc/tls/private/tls.crt".to_string(),
                "--tls-key=/etc/tls/private/tls.key".to_string(),
                "--cookie-secret=$(COOKIE_SECRET)".to_string(),
                "--pass-basic-auth=false".to_string(),
                "--skip-auth-regex=^/metrics".to_string(),
            ]),
            env: Some(vec![EnvVar {
                name: "COOKIE_SECRET".to_string(),
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: OAUTH_COOKIE_SECRET_NAME.to_string(),
                        key: OAUTH_COOKIE_SECRET_KEY.to_string(),
                        optional: Some(false),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ports: Some(vec![container_port("oauth-proxy", OAUTH_PROXY_PORT)]),
            resources: Some(resource_requirements(None, ("1m", "20Mi"), None)),
            volume_mounts: Some(vec![VolumeMount {
                name: "oauth-tls".to_string(),
                mount_path: "/etc/tls/private".to_string(),
                read_only: Some(true),
                ..Default::default()
            }]),
            security_context: Some(restricted_security_context()),
            ..Default::default()
        }
    }

    /// ServiceAccount for a component. Accounts fronted by oauth-proxy
    /// carry the OAuth redirect reference to their Route.
    pub fn service_account(&self, name: &str, component: &str, oauth_route: Option<&str>) -> ServiceAccount {
        let mut metadata = self.metadata(name, component);
        if let Some(route) = oauth_route {
            let reference = serde_json::json!({
                "kind": "OAuthRedirectReference",
                "apiVersion": "v1",
                "reference": {"kind": "Route", "name": route},
            });
            let mut annotations = BTreeMap::new();
            annotations.insert(
                "serviceaccounts.openshift.io/oauth-redirectreference.primary".to_string(),
                reference.to_string(),
            );
            metadata.annotations = Some(annotations);
        }
        ServiceAccount {
            metadata,
            ..Default::default()
        }
    }

    /// ClusterIP Service for a component. When `serving_cert` is set the
    /// OpenShift service CA writes a certificate into that Secret.
    pub fn service(
        &self,
        name: &str,
        component: &str,
        ports: &[(&str, i32)],
        serving_cert: Option<&str>,
    ) -> Service {
        let mut metadata = self.metadata(name, component);
        if let Some(secret) = serving_cert {
            let mut annotations = BTreeMap::new();
            annotations.insert(SERVING_CERT_ANNOTATION.to_string(), secret.to_string());
            metadata.annotations = Some(annotations);
        }
        Service {
            metadata,
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(self.selector_labels(component)),
                ports: Some(
                    ports
                        .iter()
                        .map(|(port_name, port)| ServicePort {
                            name: Some(port_name.to_string()),
                            port: *port,
                            target_port: Some(IntOrString::String(port_name.to_string())),
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

pub fn component_labels(mco: &MultiClusterObservability, component: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(mco, component);
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        OPERATOR_NAME.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/part-of".to_string(),
        "observability".to_string(),
    );
    labels
}

pub fn selector_labels(mco: &MultiClusterObservability, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(COMPONENT_LABEL.to_string(), component.to_string());
    labels.insert(OWNER_LABEL.to_string(), mco.name_any());
    labels
}

/// Name, namespace, labels and owner reference shared by every object the
/// operator creates for `mco`.
pub fn object_metadata(
    mco: &MultiClusterObservability,
    namespace: &str,
    name: &str,
    component: &str,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(component_labels(mco, component)),
        owner_references: Some(vec![owner_reference(mco)]),
        ..Default::default()
    }
}

/// StatefulSet pods are addressed individually, so their governing
/// services have no cluster IP.
pub fn headless(mut service: Service) -> Service {
    if let Some(spec) = service.spec.as_mut() {
        spec.cluster_ip = Some("None".to_string());
    }
    service
}

/// Volumes backing the oauth-proxy sidecar.
pub fn oauth_proxy_volumes(tls_secret: &str) -> Vec<Volume> {
    vec![secret_volume("oauth-tls", tls_secret)]
}

/// Create owner reference for a MultiClusterObservability.
///
/// The CR is cluster-scoped, so it may own objects in any namespace.
pub fn owner_reference(resource: &MultiClusterObservability) -> OwnerReference {
    OwnerReference {
        api_version: MultiClusterObservability::api_version(&()).to_string(),
        kind: MultiClusterObservability::kind(&()).to_string(),
        name: resource.name_any(),
        uid: resource.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Replica count, honouring an advanced override.
pub fn replicas(overrides: Option<&ComponentOverrides>, default: i32) -> i32 {
    overrides.and_then(|o| o.replicas).unwrap_or(default)
}

/// Resource requirements with advanced overrides layered over defaults.
///
/// `default_requests` is `(cpu, memory)`; limits are only set when a default
/// or an override provides them.
pub fn resource_requirements(
    overrides: Option<&ComponentOverrides>,
    default_requests: (&str, &str),
    default_limits: Option<(&str, &str)>,
) -> ResourceRequirements {
    let custom = overrides.and_then(|o| o.resources.as_ref());

    let mut requests = quantities(&[("cpu", default_requests.0), ("memory", default_requests.1)]);
    let mut limits = default_limits
        .map(|(cpu, memory)| quantities(&[("cpu", cpu), ("memory", memory)]))
        .unwrap_or_default();

    if let Some(custom) = custom {
        for (key, value) in [("cpu", &custom.requests.cpu), ("memory", &custom.requests.memory)] {
            if let Some(v) = value {
                requests.insert(key.to_string(), Quantity(v.clone()));
            }
        }
        for (key, value) in [("cpu", &custom.limits.cpu), ("memory", &custom.limits.memory)] {
            if let Some(v) = value {
                limits.insert(key.to_string(), Quantity(v.clone()));
            }
        }
    }

    ResourceRequirements {
        requests: Some(requests),
        limits: if limits.is_empty() { None } else { Some(limits) },
        ..Default::default()
    }
}

/// Build a quantity map from `(resource, value)` pairs.
pub fn quantities(pairs: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
        .collect()
}

pub fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        container_port: port,
        name: Some(name.to_string()),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

pub fn secret_volume(name: &str, secret: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Container security context: no privilege escalation, all capabilities dropped.
pub fn restricted_security_context() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        privileged: Some(false),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Convert CRD tolerations to k8s-openapi Tolerations.
fn convert_tolerations(crd_tolerations: &[crate::crd::Toleration]) -> Option<Vec<Toleration>> {
    if crd_tolerations.is_empty() {
        return None;
    }

    Some(
        crd_tolerations
            .iter()
            .map(|t| Toleration {
                key: t.key.clone(),
                operator: t.operator.clone(),
                value: t.value.clone(),
                effect: t.effect.clone(),
                toleration_seconds: t.toleration_seconds,
            })
            .collect(),
    )
}

/// Convert a typed object into an unstructured manifest.
pub fn to_dynamic<K>(obj: &K) -> Result<DynamicObject, Error>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let mut value = serde_json::to_value(obj)?;
    // k8s-openapi types carry apiVersion/kind in their serializer, but be
    // explicit so the unstructured object always has type information.
    if let Some(map) = value.as_object_mut() {
        map.insert(
            "apiVersion".to_string(),
            serde_json::Value::String(K::api_version(&()).to_string()),
        );
        map.insert(
            "kind".to_string(),
            serde_json::Value::String(K::kind(&()).to_string()),
        );
    }
    Ok(serde_json::from_value(value)?)
}
