//! Read seams used by the renderer.

use k8s_openapi::api::core::v1::ConfigMap;

use crate::controller::error::Error;
use crate::crd::ImageStream;

/// Read-only access to ConfigMaps.
pub trait ConfigMapReader {
    /// Fetch a ConfigMap, returning `None` when it does not exist.
    fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<ConfigMap>, Error>> + Send;

    /// List ConfigMaps in a namespace matching a label selector
    /// (`key=value[,key=value]`).
    fn list_config_maps(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ConfigMap>, Error>> + Send;
}

/// Read-only access to OpenShift ImageStreams.
pub trait ImageStreamReader {
    /// Fetch an ImageStream. A missing stream is an error, as with any
    /// other failed API call.
    fn get_image_stream(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl std::future::Future<Output = Result<ImageStream, Error>> + Send;
}
