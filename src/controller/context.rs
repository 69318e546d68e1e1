//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler,
//! including the Kubernetes client, operator configuration and event recorder.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::client::ClusterClient;
use crate::config::{OPERATOR_NAME, OperatorConfig};
use crate::crd::MultiClusterObservability;
use crate::health::HealthState;

/// Field manager name for server-side apply
pub const FIELD_MANAGER: &str = OPERATOR_NAME;

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    /// ConfigMap and ImageStream reads for the renderer, Secret seeding
    pub cluster: ClusterClient,
    pub config: OperatorConfig,
    /// Whether ImageStreams can be read (OpenShift clusters only)
    pub image_streams_available: bool,
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    pub fn new(
        client: Client,
        config: OperatorConfig,
        image_streams_available: bool,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            cluster: ClusterClient::new(client.clone()),
            client,
            config,
            image_streams_available,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
        }
    }

    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    async fn publish(
        &self,
        resource: &MultiClusterObservability,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let object_ref = resource.object_ref(&());
        if let Err(e) = self
            .recorder()
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a normal event for a resource
    pub async fn publish_normal_event(
        &self,
        resource: &MultiClusterObservability,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(resource, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a resource
    pub async fn publish_warning_event(
        &self,
        resource: &MultiClusterObservability,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(resource, EventType::Warning, reason, action, note)
            .await;
    }
}
