//! Watch-based condition waiting utilities.
//!
//! Provides functions to wait for resources to reach specific states
//! using Kubernetes watch API for efficiency.

use futures::StreamExt;
use kube::Resource;
use kube::api::Api;
use kube::runtime::watcher::{self, Event};
use std::fmt::Debug;
use std::time::Duration;
use tokio::time::timeout;

use observability_operator::controller::reconciler::FINALIZER;
use observability_operator::crd::MultiClusterObservability;

/// Error type for wait operations.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("Timeout waiting for condition after {0:?}")]
    Timeout(Duration),

    #[error("Resource was deleted while waiting")]
    ResourceDeleted,

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Watcher error: {0}")]
    WatcherError(#[from] watcher::Error),

    #[error("Watch stream ended unexpectedly")]
    StreamEnded,
}

/// Wait for a resource to satisfy a condition.
///
/// # Arguments
/// * `api` - API client for the resource type
/// * `name` - Name of the resource to watch
/// * `condition` - Closure that returns true when the condition is met
/// * `timeout_duration` - Maximum time to wait
///
/// # Returns
/// The resource when the condition is satisfied, or an error on timeout.
pub async fn wait_for_condition<K, F>(
    api: &Api<K>,
    name: &str,
    condition: F,
    timeout_duration: Duration,
) -> Result<K, WaitError>
where
    K: Resource + Clone + Debug + Send + 'static,
    K: serde::de::DeserializeOwned,
    <K as Resource>::DynamicType: Default,
    F: Fn(&K) -> bool,
{
    let watch_future = async {
        let mut stream = watcher::watcher(
            api.clone(),
            watcher::Config::default().fields(&format!("metadata.name={}", name)),
        )
        .boxed();

        // First, check the current state
        if let Ok(resource) = api.get(name).await
            && condition(&resource)
        {
            return Ok(resource);
        }

        // Watch for changes
        while let Some(event) = stream.next().await {
            match event {
                Ok(Event::Apply(resource)) | Ok(Event::InitApply(resource)) => {
                    if condition(&resource) {
                        return Ok(resource);
                    }
                }
                Ok(Event::Delete(_)) => {
                    return Err(WaitError::ResourceDeleted);
                }
                Ok(Event::Init) | Ok(Event::InitDone) => {
                    // Continue watching
                }
                Err(e) => {
                    return Err(WaitError::WatcherError(e));
                }
            }
        }

        Err(WaitError::StreamEnded)
    };

    timeout(timeout_duration, watch_future)
        .await
        .map_err(|_| WaitError::Timeout(timeout_duration))?
}

/// Wait for a resource to exist.
pub async fn wait_for_resource<K>(
    api: &Api<K>,
    name: &str,
    timeout_duration: Duration,
) -> Result<K, WaitError>
where
    K: Resource + Clone + Debug + Send + 'static,
    K: serde::de::DeserializeOwned,
    <K as Resource>::DynamicType: Default,
{
    wait_for_condition(api, name, |_| true, timeout_duration).await
}

/// Wait for a resource to be deleted.
pub async fn wait_for_deletion<K>(
    api: &Api<K>,
    name: &str,
    timeout_duration: Duration,
) -> Result<(), WaitError>
where
    K: Resource + Clone + Debug + Send + 'static,
    K: serde::de::DeserializeOwned,
    <K as Resource>::DynamicType: Default,
{
    let wait_future = async {
        // First check if already deleted
        match api.get(name).await {
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Ok(());
            }
            Err(e) => return Err(WaitError::KubeError(e)),
            Ok(_) => {}
        }

        // Watch for deletion
        let mut stream = watcher::watcher(
            api.clone(),
            watcher::Config::default().fields(&format!("metadata.name={}", name)),
        )
        .boxed();

        while let Some(event) = stream.next().await {
            match event {
                Ok(Event::Delete(_)) => {
                    return Ok(());
                }
                Ok(_) => continue,
                Err(e) => {
                    // Watcher errors don't provide 404 details like kube::Error::Api.
                    // The initial api.get() check above handles the already-deleted case.
                    return Err(WaitError::WatcherError(e));
                }
            }
        }

        Err(WaitError::StreamEnded)
    };

    timeout(timeout_duration, wait_future)
        .await
        .map_err(|_| WaitError::Timeout(timeout_duration))?
}

/// Convenience function to wait with default timeout (30 seconds).
pub async fn wait_for<K, F>(api: &Api<K>, name: &str, condition: F) -> Result<K, WaitError>
where
    K: Resource + Clone + Debug + Send + 'static,
    K: serde::de::DeserializeOwned,
    <K as Resource>::DynamicType: Default,
    F: Fn(&K) -> bool,
{
    wait_for_condition(api, name, condition, Duration::from_secs(30)).await
}

// ============================================================
// MultiClusterObservability-specific wait helpers
// ============================================================

/// Check whether a condition of `condition_type` has `status` ("True"/"False").
pub fn has_condition(
    resource: &MultiClusterObservability,
    condition_type: &str,
    status: &str,
) -> bool {
    resource.status.as_ref().is_some_and(|s| {
        s.conditions
            .iter()
            .any(|c| c.r#type == condition_type && c.status == status)
    })
}

/// Check if a MultiClusterObservability's generation has been observed.
pub fn generation_observed(resource: &MultiClusterObservability) -> bool {
    match (resource.metadata.generation, &resource.status) {
        (Some(current_gen), Some(status)) => status.observed_generation == Some(current_gen),
        _ => false,
    }
}

/// Check if the operator finalizer is present.
pub fn has_finalizer(resource: &MultiClusterObservability) -> bool {
    resource
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|f| f == FINALIZER))
}

/// Wait for a condition to reach a status.
pub async fn wait_for_condition_status(
    api: &Api<MultiClusterObservability>,
    name: &str,
    condition_type: &str,
    status: &str,
    timeout_duration: Duration,
) -> Result<MultiClusterObservability, WaitError> {
    wait_for_condition(
        api,
        name,
        |r| has_condition(r, condition_type, status),
        timeout_duration,
    )
    .await
}

/// Wait for a MultiClusterObservability to have its generation observed.
pub async fn wait_for_generation_observed(
    api: &Api<MultiClusterObservability>,
    name: &str,
    timeout_duration: Duration,
) -> Result<MultiClusterObservability, WaitError> {
    wait_for_condition(api, name, generation_observed, timeout_duration).await
}
