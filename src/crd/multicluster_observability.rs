//! MultiClusterObservability Custom Resource Definition.
//!
//! Describes the desired hub-side observability stack: object storage for
//! metrics, persistent volume sizes for each stateful component, image pull
//! settings and scheduling constraints.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// MultiClusterObservability is the cluster-scoped resource that drives the
/// observability stack.
///
/// Example:
/// ```yaml
/// apiVersion: observability.open-cluster-management.io/v1beta2
/// kind: MultiClusterObservability
/// metadata:
///   name: observability
/// spec:
///   imagePullPolicy: IfNotPresent
///   storageConfig:
///     metricObjectStorage:
///       name: thanos-object-storage
///       key: thanos.yaml
///     storageClass: gp2
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "observability.open-cluster-management.io",
    version = "v1beta2",
    kind = "MultiClusterObservability",
    plural = "multiclusterobservabilities",
    shortname = "mco",
    status = "MultiClusterObservabilityStatus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MultiClusterObservabilitySpec {
    /// Pull policy for every rendered container (default: Always).
    #[serde(default = "default_image_pull_policy")]
    pub image_pull_policy: String,

    /// Name of the pull secret attached to every rendered workload.
    #[serde(default = "default_image_pull_secret")]
    pub image_pull_secret: String,

    /// Node selector applied to every rendered workload.
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    /// Tolerations applied to every rendered workload.
    #[serde(default)]
    pub tolerations: Vec<Toleration>,

    /// Enable Thanos downsampling in the compactor (default: true).
    #[serde(default = "default_true")]
    pub enable_downsampling: bool,

    /// Storage configuration. Rendering fails when this is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_config: Option<StorageConfig>,

    /// Settings propagated to the managed-cluster addon.
    #[serde(default)]
    pub observability_addon_spec: ObservabilityAddonSpec,

    /// Fine-grained per-component tuning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced: Option<AdvancedConfig>,
}

impl Default for MultiClusterObservabilitySpec {
    fn default() -> Self {
        Self {
            image_pull_policy: default_image_pull_policy(),
            image_pull_secret: default_image_pull_secret(),
            node_selector: BTreeMap::new(),
            tolerations: Vec::new(),
            enable_downsampling: true,
            storage_config: None,
            observability_addon_spec: ObservabilityAddonSpec::default(),
            advanced: None,
        }
    }
}

fn default_image_pull_policy() -> String {
    "Always".to_string()
}

fn default_image_pull_secret() -> String {
    "multiclusterhub-operator-pull-secret".to_string()
}

fn default_true() -> bool {
    true
}

/// Storage configuration for the stateful components.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Secret holding the Thanos object storage configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_object_storage: Option<PreConfiguredStorage>,

    /// Storage class for every PersistentVolumeClaim (default: gp2).
    #[serde(default = "default_storage_class")]
    pub storage_class: String,

    /// Alertmanager volume size (default: 1Gi).
    #[serde(default = "default_small_size")]
    pub alertmanager_storage_size: String,

    /// Thanos compactor volume size (default: 100Gi).
    #[serde(default = "default_large_size")]
    pub compact_storage_size: String,

    /// Thanos ruler volume size (default: 1Gi).
    #[serde(default = "default_small_size")]
    pub rule_storage_size: String,

    /// Thanos receiver volume size (default: 100Gi).
    #[serde(default = "default_large_size")]
    pub receive_storage_size: String,

    /// Thanos store gateway volume size (default: 10Gi).
    #[serde(default = "default_store_size")]
    pub store_storage_size: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            metric_object_storage: None,
            storage_class: default_storage_class(),
            alertmanager_storage_size: default_small_size(),
            compact_storage_size: default_large_size(),
            rule_storage_size: default_small_size(),
            receive_storage_size: default_large_size(),
            store_storage_size: default_store_size(),
        }
    }
}

fn default_storage_class() -> String {
    "gp2".to_string()
}

fn default_small_size() -> String {
    "1Gi".to_string()
}

fn default_large_size() -> String {
    "100Gi".to_string()
}

fn default_store_size() -> String {
    "10Gi".to_string()
}

/// Reference to a key within a pre-created Secret.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreConfiguredStorage {
    /// Key within the Secret holding the object storage configuration.
    pub key: String,

    /// Name of the Secret.
    pub name: String,

    /// Optional Secret with TLS material for the object storage endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret_name: Option<String>,

    /// Mount path for `tls_secret_name` (default: /etc/minio/certs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret_mount_path: Option<String>,
}

/// Settings for the observability addon running on managed clusters.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilityAddonSpec {
    /// Collect metrics from managed clusters (default: true).
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Collection interval in seconds (default: 300).
    #[serde(default = "default_interval")]
    pub interval: i32,
}

impl Default for ObservabilityAddonSpec {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            interval: default_interval(),
        }
    }
}

fn default_interval() -> i32 {
    300
}

/// Per-component tuning.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedConfig {
    /// Thanos retention and block settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_config: Option<RetentionConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alertmanager: Option<ComponentOverrides>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grafana: Option<ComponentOverrides>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rbac_query_proxy: Option<ComponentOverrides>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<ComponentOverrides>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_frontend: Option<ComponentOverrides>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive: Option<ComponentOverrides>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<ComponentOverrides>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<ComponentOverrides>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compact: Option<ComponentOverrides>,
}

/// Thanos retention settings.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetentionConfig {
    /// Retention of raw samples (default: 30d).
    #[serde(default = "default_retention_raw")]
    pub retention_resolution_raw: String,

    /// Retention of 5m downsampled samples (default: 180d).
    #[serde(default = "default_retention_5m")]
    pub retention_resolution5m: String,

    /// Retention of 1h downsampled samples (default: 0d, forever).
    #[serde(default = "default_retention_1h")]
    pub retention_resolution1h: String,

    /// TSDB block duration for the receiver (default: 2h).
    #[serde(default = "default_block_duration")]
    pub block_duration: String,

    /// Delay before compacted blocks are deleted (default: 48h).
    #[serde(default = "default_delete_delay")]
    pub delete_delay: String,

    /// Local retention of the receiver (default: 24h).
    #[serde(default = "default_retention_in_local")]
    pub retention_in_local: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_resolution_raw: default_retention_raw(),
            retention_resolution5m: default_retention_5m(),
            retention_resolution1h: default_retention_1h(),
            block_duration: default_block_duration(),
            delete_delay: default_delete_delay(),
            retention_in_local: default_retention_in_local(),
        }
    }
}

fn default_retention_raw() -> String {
    "30d".to_string()
}

fn default_retention_5m() -> String {
    "180d".to_string()
}

fn default_retention_1h() -> String {
    "0d".to_string()
}

fn default_block_duration() -> String {
    "2h".to_string()
}

fn default_delete_delay() -> String {
    "48h".to_string()
}

fn default_retention_in_local() -> String {
    "24h".to_string()
}

/// Replica and resource overrides for a single component.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirementsSpec>,
}

/// Resource requests and limits for a component's main container.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    #[serde(default)]
    pub requests: ResourceSpec,

    #[serde(default)]
    pub limits: ResourceSpec,
}

/// CPU and memory quantities. Unset values are left to the defaults.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Toleration for pod scheduling.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Toleration operator (Equal or Exists).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Toleration effect (NoSchedule, PreferNoSchedule, or NoExecute).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub toleration_seconds: Option<i64>,
}

/// Status of a MultiClusterObservability.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MultiClusterObservabilityStatus {
    /// Conditions describing the current state.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// The generation most recently observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Condition describes the state of the stack at a certain point.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Ready", ready, reason, message, generation)
    }

    /// Create a "Progressing" condition.
    pub fn progressing(
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self::new("Progressing", progressing, reason, message, generation)
    }

    /// Create a "Failed" condition.
    pub fn failed(failed: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Failed", failed, reason, message, generation)
    }
}

impl MultiClusterObservability {
    /// Retention settings, falling back to defaults.
    pub fn retention(&self) -> RetentionConfig {
        self.spec
            .advanced
            .as_ref()
            .and_then(|a| a.retention_config.clone())
            .unwrap_or_default()
    }
}
