//! Cluster access outside of server-side apply.
//!
//! The renderer only ever reads two kinds of objects from the cluster:
//! ConfigMaps (client CA bundle, image manifests) and OpenShift ImageStreams.
//! The controller additionally seeds a few Secrets. Each is reached through
//! a small trait so the code can run against a live `kube::Client` or an
//! in-memory store in tests.
//!
//! ## Architecture
//!
//! - `readers`: the `ConfigMapReader` and `ImageStreamReader` traits
//! - `secrets`: the `SecretWriter` trait for Secrets created once and then
//!   left to their owners
//! - `cluster_client`: implementation of every trait over `kube::Client`

pub mod cluster_client;
pub mod readers;
pub mod secrets;

pub use cluster_client::ClusterClient;
pub use readers::{ConfigMapReader, ImageStreamReader};
pub use secrets::{SecretWriter, create_if_missing};
