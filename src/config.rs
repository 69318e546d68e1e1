//! Operator configuration and image resolution.
//!
//! Holds the well-known object names the operator depends on, the
//! environment-driven `OperatorConfig`, and the helpers that decide which
//! container image each rendered component runs.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use tracing::{debug, error, warn};

use crate::client::ImageStreamReader;

/// Name used for field management, events and the managed-by label.
pub const OPERATOR_NAME: &str = "multicluster-observability-operator";

/// Namespace the observability stack is rendered into.
pub const DEFAULT_NAMESPACE: &str = "open-cluster-management-observability";

/// Namespace the operator itself runs in when `POD_NAMESPACE` is unset.
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "open-cluster-management";

/// ConfigMap published by the API server with the client CA bundle.
pub const CLIENT_CA_CONFIGMAP_NAME: &str = "extension-apiserver-authentication";
pub const CLIENT_CA_CONFIGMAP_NAMESPACE: &str = "kube-system";
pub const CLIENT_CA_CONFIGMAP_KEY: &str = "client-ca-file";

/// ImageStream that carries the cluster's oauth-proxy image.
pub const OAUTH_PROXY_IMAGE_STREAM_NAME: &str = "oauth-proxy";
pub const OAUTH_PROXY_IMAGE_STREAM_NAMESPACE: &str = "openshift";
pub const OAUTH_PROXY_IMAGE_STREAM_TAG: &str = "v4.4";

/// CR annotations that redirect every component image to another registry.
pub const IMAGE_REPOSITORY_ANNOTATION: &str = "mco-imageRepository";
pub const IMAGE_TAG_SUFFIX_ANNOTATION: &str = "mco-imageTagSuffix";

/// Label selector of ConfigMaps that pin component images for a release.
pub const IMAGE_MANIFEST_LABEL_SELECTOR: &str = "ocm-configmap-type=image-manifest";

/// Registry and tag used when nothing else pins an image.
pub const DEFAULT_IMAGE_REGISTRY: &str = "quay.io/stolostron";
pub const DEFAULT_IMAGE_TAG: &str = "2.10.0";

/// Fallback oauth-proxy image for clusters without the ImageStream.
pub const DEFAULT_OAUTH_PROXY_IMAGE: &str = "quay.io/stolostron/origin-oauth-proxy:4.9";

/// Operator-wide settings read from the environment at start-up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace for every rendered object (`MCO_NAMESPACE`).
    pub namespace: String,
    /// Namespace the operator runs in (`POD_NAMESPACE`). Image manifests
    /// and the leader election lease live here.
    pub operator_namespace: String,
    /// Registry for default images (`MCO_DEFAULT_REGISTRY`).
    pub default_registry: String,
    /// Tag for default images (`MCO_DEFAULT_IMAGE_TAG`).
    pub default_image_tag: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            operator_namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            default_registry: DEFAULT_IMAGE_REGISTRY.to_string(),
            default_image_tag: DEFAULT_IMAGE_TAG.to_string(),
        }
    }
}

impl OperatorConfig {
    /// Build the configuration from `MCO_*` and `POD_NAMESPACE` environment
    /// variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    /// Empty values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str, fallback: String| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(fallback)
        };
        Self {
            namespace: get("MCO_NAMESPACE", defaults.namespace),
            operator_namespace: get("POD_NAMESPACE", defaults.operator_namespace),
            default_registry: get("MCO_DEFAULT_REGISTRY", defaults.default_registry),
            default_image_tag: get("MCO_DEFAULT_IMAGE_TAG", defaults.default_image_tag),
        }
    }
}

/// Components whose image can be resolved independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImageComponent {
    Alertmanager,
    ConfigmapReloader,
    Grafana,
    GrafanaDashboardLoader,
    OauthProxy,
    RbacQueryProxy,
    Thanos,
}

impl ImageComponent {
    pub const ALL: [ImageComponent; 7] = [
        ImageComponent::Alertmanager,
        ImageComponent::ConfigmapReloader,
        ImageComponent::Grafana,
        ImageComponent::GrafanaDashboardLoader,
        ImageComponent::OauthProxy,
        ImageComponent::RbacQueryProxy,
        ImageComponent::Thanos,
    ];

    /// Image name within a registry.
    pub fn image_name(self) -> &'static str {
        match self {
            ImageComponent::Alertmanager => "prometheus-alertmanager",
            ImageComponent::ConfigmapReloader => "configmap-reloader",
            ImageComponent::Grafana => "grafana",
            ImageComponent::GrafanaDashboardLoader => "grafana-dashboard-loader",
            ImageComponent::OauthProxy => "origin-oauth-proxy",
            ImageComponent::RbacQueryProxy => "rbac-query-proxy",
            ImageComponent::Thanos => "thanos",
        }
    }

    /// Key of this component in an image manifest ConfigMap.
    pub fn manifest_key(self) -> String {
        self.image_name().replace('-', "_")
    }
}

impl std::fmt::Display for ImageComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.image_name())
    }
}

/// Image override from the CR annotations.
///
/// When `mco-imageRepository` is set, every component is pulled from that
/// repository, tagged with `mco-imageTagSuffix` if present.
pub fn replace_image(
    annotations: &BTreeMap<String, String>,
    component: ImageComponent,
) -> Option<String> {
    let repository = annotations
        .get(IMAGE_REPOSITORY_ANNOTATION)
        .map(|r| r.trim().trim_end_matches('/'))
        .filter(|r| !r.is_empty())?;

    let image = match annotations
        .get(IMAGE_TAG_SUFFIX_ANNOTATION)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
    {
        Some(suffix) => format!("{}/{}:{}", repository, component.image_name(), suffix),
        None => format!("{}/{}", repository, component.image_name()),
    };
    Some(image)
}

/// Component images pinned by the release image manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageManifest {
    images: BTreeMap<String, String>,
}

impl ImageManifest {
    /// Merge the data of every manifest ConfigMap. ConfigMaps are applied
    /// in name order so the result does not depend on list ordering.
    pub fn from_config_maps(config_maps: &[ConfigMap]) -> Self {
        let mut sorted: Vec<&ConfigMap> = config_maps.iter().collect();
        sorted.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

        let mut images = BTreeMap::new();
        for cm in sorted {
            if let Some(data) = &cm.data {
                images.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        Self { images }
    }

    pub fn get(&self, component: ImageComponent) -> Option<&str> {
        self.images
            .get(&component.manifest_key())
            .map(String::as_str)
            .filter(|image| !image.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Look up the oauth-proxy pull spec from the `openshift/oauth-proxy`
/// ImageStream.
///
/// Returns the source of the `v4.4` tag when found. A failed lookup is
/// logged and reported as not found; without an image client (e.g. on a
/// non-OpenShift cluster) the image is never found.
pub async fn get_oauth_proxy_image<I>(image_client: Option<&I>) -> Option<String>
where
    I: ImageStreamReader,
{
    let client = image_client?;

    let stream = match client
        .get_image_stream(
            OAUTH_PROXY_IMAGE_STREAM_NAMESPACE,
            OAUTH_PROXY_IMAGE_STREAM_NAME,
        )
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            error!(
                namespace = OAUTH_PROXY_IMAGE_STREAM_NAMESPACE,
                name = OAUTH_PROXY_IMAGE_STREAM_NAME,
                error = %e,
                "Failed to get the oauth-proxy imagestream"
            );
            return None;
        }
    };

    match stream.tag_source(OAUTH_PROXY_IMAGE_STREAM_TAG) {
        Some(image) => {
            debug!(image = %image, "Resolved oauth-proxy image from imagestream");
            Some(image.to_string())
        }
        None => {
            warn!(
                tag = OAUTH_PROXY_IMAGE_STREAM_TAG,
                "oauth-proxy imagestream has no usable tag"
            );
            None
        }
    }
}
