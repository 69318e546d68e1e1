//! Reconciliation loop for MultiClusterObservability.
//!
//! Every pass renders the full manifest set, applies it with server-side
//! apply, then reports readiness of the rendered workloads in status.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::{
    Api, ResourceExt,
    api::{ApiResource, DynamicObject, GroupVersionKind, Patch, PatchParams},
    runtime::controller::Action,
};
use tracing::{debug, error, info, warn};

use crate::{
    client::ClusterClient,
    controller::{
        common::{add_finalizer, describe, remove_finalizer},
        context::{Context, FIELD_MANAGER},
        error::Error,
        status::{CONDITION_READY, ConditionBuilder, is_condition_true},
    },
    crd::{MultiClusterObservability, MultiClusterObservabilityStatus},
    rendering::{Renderer, ensure_seed_secrets},
};

/// Finalizer name for graceful deletion
pub const FINALIZER: &str = "observability.open-cluster-management.io/res-cleanup";

const READY_REQUEUE: Duration = Duration::from_secs(60);
const PROGRESSING_REQUEUE: Duration = Duration::from_secs(10);

/// Reconcile a MultiClusterObservability
pub async fn reconcile(
    obj: Arc<MultiClusterObservability>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();

    debug!(name = %name, "Reconciling MultiClusterObservability");

    let api: Api<MultiClusterObservability> = Api::all(ctx.client.clone());

    if obj.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&obj, &ctx).await;
    }

    if !obj.finalizers().iter().any(|f| f == FINALIZER) {
        info!(name = %name, "Adding finalizer");
        add_finalizer(&api, &name, FINALIZER).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    match apply_stack(&obj, &ctx, &api).await {
        Ok(ready) => {
            if let Some(ref health_state) = ctx.health_state {
                health_state
                    .metrics
                    .record_reconcile(&name, start_time.elapsed().as_secs_f64());
                health_state.touch_reconcile();
            }
            Ok(Action::requeue(requeue_for(ready)))
        }
        // Children map their 404s to Transient, so this is the resource itself
        Err(e) if e.is_not_found() => Err(e),
        Err(e) => {
            error!(name = %name, error = %e, "Reconciliation failed");
            ctx.publish_warning_event(&obj, e.reason(), "Reconciling", Some(e.to_string()))
                .await;
            if let Err(status_err) = record_failure(&api, &obj, &e).await {
                warn!(name = %name, error = %status_err, "Failed to record failure in status");
            }
            Err(e)
        }
    }
}

/// Render, apply and report. Returns whether every workload is ready.
async fn apply_stack(
    obj: &MultiClusterObservability,
    ctx: &Context,
    api: &Api<MultiClusterObservability>,
) -> Result<bool, Error> {
    let name = obj.name_any();
    let generation = obj.metadata.generation;

    let image_reader: Option<&ClusterClient> = if ctx.image_streams_available {
        Some(&ctx.cluster)
    } else {
        None
    };
    let manifests = Renderer::new(obj, &ctx.cluster, image_reader)
        .with_config(ctx.config.clone())
        .render()
        .await?;

    let created = ensure_seed_secrets(&ctx.cluster, obj, &ctx.config.namespace).await?;
    if !created.is_empty() {
        debug!(name = %name, secrets = ?created, "Seeded secrets");
    }

    for manifest in &manifests {
        apply_manifest(ctx, manifest).await?;
    }
    debug!(name = %name, count = manifests.len(), "Applied manifests");

    let (desired, ready) = check_workloads(ctx, &manifests).await?;
    let all_ready = desired == ready;

    if let Some(ref health_state) = ctx.health_state {
        let count = i64::try_from(manifests.len()).unwrap_or(i64::MAX);
        health_state.metrics.set_rendered_manifests(&name, count);
        health_state
            .metrics
            .set_workloads(&name, i64::from(desired), i64::from(ready));
    }

    let existing = obj
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    let was_ready = is_condition_true(&existing, CONDITION_READY);

    let mut conditions = ConditionBuilder::from_existing(&existing);
    if all_ready {
        conditions
            .ready(true, "AllComponentsReady", "All components are ready", generation)
            .progressing(false, "Reconciled", "All manifests applied", generation)
            .failed(false, "Reconciled", "", generation);
    } else {
        let message = format!("{}/{} workloads ready", ready, desired);
        conditions
            .ready(false, "WaitingForComponents", &message, generation)
            .progressing(true, "WaitingForComponents", &message, generation)
            .failed(false, "Reconciled", "", generation);
    }
    update_status(api, &name, conditions.build(), generation).await?;

    if all_ready && !was_ready {
        ctx.publish_normal_event(
            obj,
            "Ready",
            "Reconciling",
            Some(format!("{} workloads ready", desired)),
        )
        .await;
    }

    Ok(all_ready)
}

/// Error policy for the controller
pub fn error_policy(
    obj: Arc<MultiClusterObservability>,
    error: &Error,
    ctx: Arc<Context>,
) -> Action {
    let name = obj.name_any();

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&name, error.reason());
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}

/// Owned objects are garbage-collected through their owner references, so
/// deletion only releases the finalizer.
async fn handle_deletion(obj: &MultiClusterObservability, ctx: &Context) -> Result<Action, Error> {
    let name = obj.name_any();
    info!(name = %name, "Handling deletion");

    ctx.publish_normal_event(obj, "Deleting", "Deleting", None)
        .await;

    let api: Api<MultiClusterObservability> = Api::all(ctx.client.clone());
    remove_finalizer(&api, &name, FINALIZER).await?;

    Ok(Action::await_change())
}

/// Group/version/kind of a rendered object.
pub fn gvk_of(obj: &DynamicObject) -> Result<GroupVersionKind, Error> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| Error::Permanent(format!("{} has no type information", obj.name_any())))?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), types.api_version.clone()),
    };
    Ok(GroupVersionKind {
        group,
        version,
        kind: types.kind.clone(),
    })
}

/// Server-side apply one rendered object.
async fn apply_manifest(ctx: &Context, obj: &DynamicObject) -> Result<(), Error> {
    let ar = ApiResource::from_gvk(&gvk_of(obj)?);
    let namespace = obj
        .namespace()
        .unwrap_or_else(|| ctx.config.namespace.clone());
    let api: Api<DynamicObject> = Api::namespaced_with(ctx.client.clone(), &namespace, &ar);

    api.patch(
        &obj.name_any(),
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(obj),
    )
    .await
    .map_err(|e| {
        debug!(object = %describe(obj), error = %e, "Apply failed");
        Error::from(e).not_found_as_transient(&describe(obj))
    })?;
    Ok(())
}

/// Count rendered Deployments/StatefulSets and how many of them are ready.
async fn check_workloads(ctx: &Context, manifests: &[DynamicObject]) -> Result<(i32, i32), Error> {
    let mut desired = 0;
    let mut ready = 0;

    for manifest in manifests {
        let kind = manifest.types.as_ref().map(|t| t.kind.as_str());
        let namespace = manifest
            .namespace()
            .unwrap_or_else(|| ctx.config.namespace.clone());
        let name = manifest.name_any();

        let replicas = match kind {
            Some("Deployment") => {
                let api: Api<Deployment> = Api::namespaced(ctx.client.clone(), &namespace);
                api.get_opt(&name).await?.map(|d| {
                    let wanted = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                    let have = d.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
                    (wanted, have)
                })
            }
            Some("StatefulSet") => {
                let api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), &namespace);
                api.get_opt(&name).await?.map(|s| {
                    let wanted = s.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                    let have = s.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
                    (wanted, have)
                })
            }
            _ => continue,
        };

        desired += 1;
        if let Some((wanted, have)) = replicas {
            if workload_ready(wanted, have) {
                ready += 1;
            }
        }
    }

    Ok((desired, ready))
}

/// A workload is ready once every wanted replica is ready.
pub fn workload_ready(wanted: i32, ready: i32) -> bool {
    ready >= wanted
}

pub fn requeue_for(ready: bool) -> Duration {
    if ready { READY_REQUEUE } else { PROGRESSING_REQUEUE }
}

async fn record_failure(
    api: &Api<MultiClusterObservability>,
    obj: &MultiClusterObservability,
    error: &Error,
) -> Result<(), Error> {
    let generation = obj.metadata.generation;
    let existing = obj
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    let message = error.to_string();

    let mut conditions = ConditionBuilder::from_existing(&existing);
    conditions
        .ready(false, error.reason(), &message, generation)
        .progressing(false, error.reason(), &message, generation)
        .failed(true, error.reason(), &message, generation);
    update_status(api, &obj.name_any(), conditions.build(), generation).await
}

async fn update_status(
    api: &Api<MultiClusterObservability>,
    name: &str,
    conditions: Vec<crate::crd::Condition>,
    generation: Option<i64>,
) -> Result<(), Error> {
    let status = MultiClusterObservabilityStatus {
        conditions,
        observed_generation: generation,
    };
    let patch = serde_json::json!({
        "status": status
    });

    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
