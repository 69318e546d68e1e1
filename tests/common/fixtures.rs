//! Test fixtures and builder patterns for MultiClusterObservability.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use observability_operator::crd::{
    AdvancedConfig, ComponentOverrides, MultiClusterObservability, MultiClusterObservabilitySpec,
    PreConfiguredStorage, StorageConfig, Toleration,
};
use std::collections::BTreeMap;

/// Secret and key referenced by default for Thanos object storage.
pub const OBJECT_STORAGE_SECRET: &str = "thanos-object-storage";
pub const OBJECT_STORAGE_KEY: &str = "thanos.yaml";

/// Builder for creating MultiClusterObservability test fixtures.
///
/// # Example
/// ```
/// let mco = MultiClusterObservabilityBuilder::new("observability")
///     .storage_class("standard")
///     .image_pull_policy("IfNotPresent")
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct MultiClusterObservabilityBuilder {
    name: String,
    spec: MultiClusterObservabilitySpec,
    annotations: BTreeMap<String, String>,
    generation: Option<i64>,
    uid: Option<String>,
}

impl MultiClusterObservabilityBuilder {
    /// Create a builder with object storage configured.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spec: MultiClusterObservabilitySpec {
                storage_config: Some(StorageConfig {
                    metric_object_storage: Some(PreConfiguredStorage {
                        name: OBJECT_STORAGE_SECRET.to_string(),
                        key: OBJECT_STORAGE_KEY.to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            annotations: BTreeMap::new(),
            generation: None,
            uid: None,
        }
    }

    /// Drop the storage config entirely.
    pub fn without_storage(mut self) -> Self {
        self.spec.storage_config = None;
        self
    }

    fn storage(&mut self) -> &mut StorageConfig {
        self.spec.storage_config.get_or_insert_with(StorageConfig::default)
    }

    pub fn storage_class(mut self, class: impl Into<String>) -> Self {
        self.storage().storage_class = class.into();
        self
    }

    pub fn store_storage_size(mut self, size: impl Into<String>) -> Self {
        self.storage().store_storage_size = size.into();
        self
    }

    pub fn receive_storage_size(mut self, size: impl Into<String>) -> Self {
        self.storage().receive_storage_size = size.into();
        self
    }

    /// Mount a TLS Secret for object storage.
    pub fn object_storage_tls(mut self, secret: impl Into<String>) -> Self {
        if let Some(object_storage) = self.storage().metric_object_storage.as_mut() {
            object_storage.tls_secret_name = Some(secret.into());
        }
        self
    }

    pub fn image_pull_policy(mut self, policy: impl Into<String>) -> Self {
        self.spec.image_pull_policy = policy.into();
        self
    }

    pub fn image_pull_secret(mut self, secret: impl Into<String>) -> Self {
        self.spec.image_pull_secret = secret.into();
        self
    }

    pub fn node_selector(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.node_selector.insert(key.into(), value.into());
        self
    }

    pub fn toleration(mut self, key: impl Into<String>, effect: impl Into<String>) -> Self {
        self.spec.tolerations.push(Toleration {
            key: Some(key.into()),
            operator: Some("Exists".to_string()),
            effect: Some(effect.into()),
            ..Default::default()
        });
        self
    }

    pub fn enable_downsampling(mut self, enabled: bool) -> Self {
        self.spec.enable_downsampling = enabled;
        self
    }

    /// Override replicas for the Thanos receiver.
    pub fn receive_replicas(mut self, replicas: i32) -> Self {
        self.spec
            .advanced
            .get_or_insert_with(AdvancedConfig::default)
            .receive = Some(ComponentOverrides {
            replicas: Some(replicas),
            resources: None,
        });
        self
    }

    /// Add an annotation to the resource.
    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Set the generation (for testing status updates).
    pub fn generation(mut self, generation: i64) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Set the UID (for testing owner references).
    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn build(self) -> MultiClusterObservability {
        MultiClusterObservability {
            metadata: ObjectMeta {
                name: Some(self.name),
                annotations: if self.annotations.is_empty() {
                    None
                } else {
                    Some(self.annotations)
                },
                generation: self.generation,
                uid: self.uid,
                ..Default::default()
            },
            spec: self.spec,
            status: None,
        }
    }
}

impl Default for MultiClusterObservabilityBuilder {
    fn default() -> Self {
        Self::new("observability")
    }
}

/// Create a MultiClusterObservability with common test defaults.
pub fn test_observability(name: &str) -> MultiClusterObservability {
    MultiClusterObservabilityBuilder::new(name)
        .generation(1)
        .uid(format!("test-uid-{}", name))
        .build()
}
