//! OpenShift ImageStream type (image.openshift.io/v1).
//!
//! Only the fields needed to resolve a tag to a pull spec are modelled.
//! The operator never installs this CRD; it is served by OpenShift.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ImageStream maps named tags to container image pull specs.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "image.openshift.io",
    version = "v1",
    kind = "ImageStream",
    plural = "imagestreams",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamSpec {
    #[serde(default)]
    pub tags: Vec<TagReference>,
}

/// A named tag and the image it points at.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TagReference {
    /// Tag name, e.g. "v4.4".
    pub name: String,

    /// Source of the tag. Absent for tags that are only tracked in status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<TagSource>,
}

/// Object a tag is imported from, typically `DockerImage`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TagSource {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ImageStream {
    /// Pull spec of the first tag named `tag` that has a source.
    pub fn tag_source(&self, tag: &str) -> Option<&str> {
        self.spec
            .tags
            .iter()
            .find(|t| t.name == tag)
            .and_then(|t| t.from.as_ref())
            .map(|from| from.name.as_str())
    }
}
