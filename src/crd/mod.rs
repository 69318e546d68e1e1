//! Custom Resource Definitions used by the operator.
//!
//! - `MultiClusterObservability`: the resource this operator owns and reconciles
//! - `ImageStream`: OpenShift type read to resolve the oauth-proxy image

mod image_stream;
mod multicluster_observability;

pub use image_stream::*;
pub use multicluster_observability::*;
