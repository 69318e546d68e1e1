//! `kube::Client` implementation of the cluster seams.

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{
    Api, Client, ResourceExt,
    api::{ListParams, PostParams},
};
use tracing::debug;

use crate::client::readers::{ConfigMapReader, ImageStreamReader};
use crate::client::secrets::SecretWriter;
use crate::controller::error::Error;
use crate::crd::ImageStream;

/// Reads ConfigMaps and ImageStreams and seeds Secrets through the API server.
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
}

impl ClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl ConfigMapReader for ClusterClient {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_config_maps(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ConfigMap>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default().labels(label_selector)).await?;
        debug!(
            namespace = %namespace,
            selector = %label_selector,
            count = list.items.len(),
            "Listed ConfigMaps"
        );
        Ok(list.items)
    }
}

impl ImageStreamReader for ClusterClient {
    async fn get_image_stream(&self, namespace: &str, name: &str) -> Result<ImageStream, Error> {
        let api: Api<ImageStream> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }
}

impl SecretWriter for ClusterClient {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<bool, Error> {
        let namespace = secret.namespace().unwrap_or_default();
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        match api.create(&PostParams::default(), secret).await {
            Ok(_) => Ok(true),
            // Lost a race with another reconcile
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
