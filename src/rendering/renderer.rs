//! Turns a MultiClusterObservability into the full set of manifests.

use kube::api::DynamicObject;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::client::{ConfigMapReader, ImageStreamReader};
use crate::config::{
    CLIENT_CA_CONFIGMAP_KEY, CLIENT_CA_CONFIGMAP_NAME, CLIENT_CA_CONFIGMAP_NAMESPACE,
    IMAGE_MANIFEST_LABEL_SELECTOR, ImageManifest, OperatorConfig, get_oauth_proxy_image,
};
use crate::controller::error::Error;
use crate::crd::{MultiClusterObservability, PreConfiguredStorage, StorageConfig};
use crate::rendering::common::{RenderContext, to_dynamic};
use crate::rendering::images::ImageSet;
use crate::rendering::{alertmanager, grafana, proxy, thanos};

/// Renders the manifests for one MultiClusterObservability.
///
/// `K` reads ConfigMaps (client CA, image manifests). `I` reads OpenShift
/// ImageStreams and is optional: without it the oauth-proxy image falls back
/// to the image manifest or the built-in default.
pub struct Renderer<'a, K, I> {
    mco: &'a MultiClusterObservability,
    kube_client: &'a K,
    image_client: Option<&'a I>,
    config: OperatorConfig,
}

impl<'a, K, I> Renderer<'a, K, I>
where
    K: ConfigMapReader + Sync,
    I: ImageStreamReader + Sync,
{
    pub fn new(
        mco: &'a MultiClusterObservability,
        kube_client: &'a K,
        image_client: Option<&'a I>,
    ) -> Self {
        Self {
            mco,
            kube_client,
            image_client,
            config: OperatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OperatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Render every manifest. The first failure aborts the render.
    pub async fn render(&self) -> Result<Vec<DynamicObject>, Error> {
        let name = self.mco.name_any();
        let (storage, object_storage) = validate_storage(self.mco)?;

        let images = self.resolve_images().await?;
        let client_ca = self.read_client_ca().await?;

        let ctx = RenderContext {
            mco: self.mco,
            namespace: self.config.namespace.clone(),
            images,
            storage,
            object_storage,
            client_ca,
        };

        let mut manifests = Vec::new();

        let proxy = proxy::generate(&ctx);
        manifests.push(to_dynamic(&proxy.client_ca)?);

        let alertmanager = alertmanager::generate(&ctx);
        manifests.push(to_dynamic(&alertmanager.service_account)?);
        manifests.push(to_dynamic(&alertmanager.service)?);
        manifests.push(to_dynamic(&alertmanager.governing_service)?);
        manifests.push(to_dynamic(&alertmanager.statefulset)?);

        let grafana = grafana::generate(&ctx)?;
        manifests.push(to_dynamic(&grafana.service_account)?);
        manifests.push(to_dynamic(&grafana.datasources)?);
        manifests.push(to_dynamic(&grafana.service)?);
        manifests.push(to_dynamic(&grafana.deployment)?);

        manifests.push(to_dynamic(&proxy.service_account)?);
        manifests.push(to_dynamic(&proxy.service)?);
        manifests.push(to_dynamic(&proxy.deployment)?);

        let thanos = thanos::generate(&ctx)?;
        manifests.push(to_dynamic(&thanos.service_account)?);
        manifests.push(to_dynamic(&thanos.receive_hashrings)?);
        manifests.push(to_dynamic(&thanos.rule_default_rules)?);
        for service in &thanos.services {
            manifests.push(to_dynamic(service)?);
        }
        for statefulset in [&thanos.compact, &thanos.receive, &thanos.rule, &thanos.store] {
            manifests.push(to_dynamic(statefulset)?);
        }
        manifests.push(to_dynamic(&thanos.query)?);
        manifests.push(to_dynamic(&thanos.query_frontend)?);

        info!(
            name = %name,
            namespace = %ctx.namespace,
            count = manifests.len(),
            "Rendered manifests"
        );
        Ok(manifests)
    }

    async fn resolve_images(&self) -> Result<ImageSet, Error> {
        let config_maps = self
            .kube_client
            .list_config_maps(&self.config.operator_namespace, IMAGE_MANIFEST_LABEL_SELECTOR)
            .await?;
        let manifest = ImageManifest::from_config_maps(&config_maps);
        if manifest.is_empty() {
            debug!(
                namespace = %self.config.operator_namespace,
                "No image manifest found, using default images"
            );
        }

        let oauth_proxy = get_oauth_proxy_image(self.image_client).await;
        Ok(ImageSet::resolve(
            self.mco,
            &manifest,
            oauth_proxy.as_deref(),
            &self.config,
        ))
    }

    async fn read_client_ca(&self) -> Result<String, Error> {
        let config_map = self
            .kube_client
            .get_config_map(CLIENT_CA_CONFIGMAP_NAMESPACE, CLIENT_CA_CONFIGMAP_NAME)
            .await?
            .ok_or_else(|| {
                Error::Transient(format!(
                    "ConfigMap {}/{} not found",
                    CLIENT_CA_CONFIGMAP_NAMESPACE, CLIENT_CA_CONFIGMAP_NAME
                ))
            })?;

        config_map
            .data
            .and_then(|mut data| data.remove(CLIENT_CA_CONFIGMAP_KEY))
            .filter(|ca| !ca.is_empty())
            .ok_or_else(|| {
                Error::Transient(format!(
                    "ConfigMap {}/{} has no {}",
                    CLIENT_CA_CONFIGMAP_NAMESPACE, CLIENT_CA_CONFIGMAP_NAME, CLIENT_CA_CONFIGMAP_KEY
                ))
            })
    }
}

/// Check the storage config before anything is generated.
pub fn validate_storage(
    mco: &MultiClusterObservability,
) -> Result<(&StorageConfig, &PreConfiguredStorage), Error> {
    let storage = mco
        .spec
        .storage_config
        .as_ref()
        .ok_or_else(|| Error::MissingField("spec.storageConfig".to_string()))?;
    let object_storage = storage
        .metric_object_storage
        .as_ref()
        .ok_or_else(|| Error::MissingField("spec.storageConfig.metricObjectStorage".to_string()))?;

    if object_storage.name.is_empty() {
        return Err(Error::MissingField(
            "spec.storageConfig.metricObjectStorage.name".to_string(),
        ));
    }
    if object_storage.key.is_empty() {
        return Err(Error::MissingField(
            "spec.storageConfig.metricObjectStorage.key".to_string(),
        ));
    }

    for (field, size) in [
        ("alertmanagerStorageSize", &storage.alertmanager_storage_size),
        ("compactStorageSize", &storage.compact_storage_size),
        ("ruleStorageSize", &storage.rule_storage_size),
        ("receiveStorageSize", &storage.receive_storage_size),
        ("storeStorageSize", &storage.store_storage_size),
    ] {
        if !is_valid_quantity(size) {
            return Err(Error::Validation(format!(
                "spec.storageConfig.{} '{}' is not a valid quantity",
                field, size
            )));
        }
    }

    Ok((storage, object_storage))
}

/// Kubernetes resource quantity, e.g. `10Gi`, `500M`, `1.5`.
pub fn is_valid_quantity(value: &str) -> bool {
    use std::sync::LazyLock;
    static QUANTITY_RE: LazyLock<Option<regex::Regex>> = LazyLock::new(|| {
        regex::Regex::new(r"^[+-]?([0-9]+(\.[0-9]*)?|\.[0-9]+)(Ki|Mi|Gi|Ti|Pi|Ei|m|k|M|G|T|P|E|[eE][+-]?[0-9]+)?$")
            .ok()
    });
    QUANTITY_RE.as_ref().is_some_and(|re| re.is_match(value))
}
