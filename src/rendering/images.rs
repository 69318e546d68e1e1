//! Resolved container images for one render.

use kube::ResourceExt;

use crate::config::{
    DEFAULT_OAUTH_PROXY_IMAGE, ImageComponent, ImageManifest, OperatorConfig, replace_image,
};
use crate::crd::MultiClusterObservability;

/// Pull spec for every component image used by the rendered workloads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageSet {
    pub alertmanager: String,
    pub configmap_reloader: String,
    pub grafana: String,
    pub grafana_dashboard_loader: String,
    pub oauth_proxy: String,
    pub rbac_query_proxy: String,
    pub thanos: String,
}

impl ImageSet {
    /// Built-in images from the configured registry and tag.
    pub fn defaults(config: &OperatorConfig) -> Self {
        Self::from_fn(|component| default_image(config, component))
    }

    /// Resolve every image for `mco`.
    ///
    /// Precedence per component: CR annotation override, then the release
    /// image manifest, then the built-in default. For oauth-proxy the image
    /// found in the cluster's ImageStream comes before the manifest, since it
    /// matches the running OpenShift release.
    pub fn resolve(
        mco: &MultiClusterObservability,
        manifest: &ImageManifest,
        oauth_proxy_from_stream: Option<&str>,
        config: &OperatorConfig,
    ) -> Self {
        let annotations = mco.annotations();
        Self::from_fn(|component| {
            if let Some(image) = replace_image(annotations, component) {
                return image;
            }
            if component == ImageComponent::OauthProxy {
                if let Some(image) = oauth_proxy_from_stream {
                    return image.to_string();
                }
            }
            manifest
                .get(component)
                .map(str::to_string)
                .unwrap_or_else(|| default_image(config, component))
        })
    }

    fn from_fn(mut image: impl FnMut(ImageComponent) -> String) -> Self {
        Self {
            alertmanager: image(ImageComponent::Alertmanager),
            configmap_reloader: image(ImageComponent::ConfigmapReloader),
            grafana: image(ImageComponent::Grafana),
            grafana_dashboard_loader: image(ImageComponent::GrafanaDashboardLoader),
            oauth_proxy: image(ImageComponent::OauthProxy),
            rbac_query_proxy: image(ImageComponent::RbacQueryProxy),
            thanos: image(ImageComponent::Thanos),
        }
    }

    /// Image for a single component.
    pub fn get(&self, component: ImageComponent) -> &str {
        match component {
            ImageComponent::Alertmanager => &self.alertmanager,
            ImageComponent::ConfigmapReloader => &self.configmap_reloader,
            ImageComponent::Grafana => &self.grafana,
            ImageComponent::GrafanaDashboardLoader => &self.grafana_dashboard_loader,
            ImageComponent::OauthProxy => &self.oauth_proxy,
            ImageComponent::RbacQueryProxy => &self.rbac_query_proxy,
            ImageComponent::Thanos => &self.thanos,
        }
    }
}

fn default_image(config: &OperatorConfig, component: ImageComponent) -> String {
    if component == ImageComponent::OauthProxy
        && config.default_registry == crate::config::DEFAULT_IMAGE_REGISTRY
    {
        return DEFAULT_OAUTH_PROXY_IMAGE.to_string();
    }
    format!(
        "{}/{}:{}",
        config.default_registry,
        component.image_name(),
        config.default_image_tag
    )
}
