//! observability-operator library crate
//!
//! This module exports the controller, CRD definitions, configuration, the
//! read seams used by the renderer and the manifest renderer itself.

pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod rendering;

pub use config::{OperatorConfig, get_oauth_proxy_image};
pub use health::HealthState;
pub use rendering::Renderer;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::api::ListParams;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, predicates, reflector, watcher};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use config::OAUTH_PROXY_IMAGE_STREAM_NAMESPACE;
use controller::{context::Context, reconciler::reconcile};
use crd::{ImageStream, MultiClusterObservability};

/// Create the default watcher configuration for all controllers.
///
/// `any_semantic()` gives more reliable resource discovery in test environments.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Converts watch events to objects (Added/Modified only)
/// - Filters out status-only updates via generation predicate
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Map an owned object back to the cluster-scoped MultiClusterObservability
/// that controls it.
///
/// `Controller::owns` would look the owner up in the child's namespace,
/// which never matches a cluster-scoped owner.
fn owning_observability<K: Resource>(obj: K) -> Option<ObjectRef<MultiClusterObservability>> {
    let kind = MultiClusterObservability::kind(&());
    obj.owner_references()
        .iter()
        .find(|owner| owner.kind == kind && owner.controller == Some(true))
        .map(|owner| ObjectRef::new(&owner.name))
}

/// Whether the cluster serves OpenShift ImageStreams.
pub async fn image_streams_available(client: Client) -> bool {
    let api: Api<ImageStream> = Api::namespaced(client, OAUTH_PROXY_IMAGE_STREAM_NAMESPACE);
    match api.list(&ListParams::default().limit(1)).await {
        Ok(_) => true,
        Err(e) => {
            info!(error = %e, "ImageStreams not available, oauth-proxy image will not be looked up");
            false
        }
    }
}

/// Run the operator controller.
///
/// Watches MultiClusterObservability resources cluster-wide and the
/// workloads, Services and ConfigMaps rendered into `config.namespace`.
/// It can be called from main.rs or spawned as a background task during
/// integration tests.
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
) {
    info!(
        namespace = %config.namespace,
        "Starting controller for MultiClusterObservability resources"
    );

    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let image_streams = image_streams_available(client.clone()).await;
    let namespace = config.namespace.clone();
    let ctx = Arc::new(Context::new(
        client.clone(),
        config,
        image_streams,
        health_state,
    ));

    let observabilities: Api<MultiClusterObservability> = Api::all(client.clone());
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), &namespace);
    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), &namespace);

    let watcher_config = default_watcher_config();
    let (reader, resource_stream) =
        create_filtered_stream(observabilities, watcher_config.clone());

    Controller::for_stream(resource_stream, reader)
        .watches(deployments, watcher_config.clone(), owning_observability::<Deployment>)
        .watches(statefulsets, watcher_config.clone(), owning_observability::<StatefulSet>)
        .watches(services, watcher_config.clone(), owning_observability::<Service>)
        .watches(configmaps, watcher_config, owning_observability::<ConfigMap>)
        .run(reconcile, controller::reconciler::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Related watch events can trigger reconciliation of an
                    // object that was just deleted.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    error!("Controller stream ended unexpectedly");
}
