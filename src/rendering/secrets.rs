//! Secrets seeded once per namespace.
//!
//! These are not part of the rendered set: server-side apply would reset
//! them on every pass, rotating oauth-proxy sessions and discarding the
//! user's Alertmanager configuration.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tracing::info;

use crate::client::{SecretWriter, create_if_missing};
use crate::controller::error::Error;
use crate::crd::MultiClusterObservability;
use crate::rendering::alertmanager;
use crate::rendering::common::{
    OAUTH_COOKIE_SECRET_KEY, OAUTH_COOKIE_SECRET_NAME, object_metadata,
};

/// The oauth-proxy cookie secret, with a fresh random value.
pub fn cookie_secret(mco: &MultiClusterObservability, namespace: &str) -> Secret {
    let mut string_data = BTreeMap::new();
    string_data.insert(
        OAUTH_COOKIE_SECRET_KEY.to_string(),
        uuid::Uuid::new_v4().simple().to_string(),
    );
    Secret {
        metadata: object_metadata(mco, namespace, OAUTH_COOKIE_SECRET_NAME, "oauth-proxy"),
        type_: Some("Opaque".to_string()),
        string_data: Some(string_data),
        ..Default::default()
    }
}

/// Every Secret the operator seeds in `namespace`.
pub fn seed_secrets(mco: &MultiClusterObservability, namespace: &str) -> Result<Vec<Secret>, Error> {
    Ok(vec![
        cookie_secret(mco, namespace),
        alertmanager::default_config_secret(mco, namespace)?,
    ])
}

/// Create the seeded Secrets that do not exist yet. Existing ones are left
/// untouched. Returns the names of the Secrets created.
pub async fn ensure_seed_secrets<W>(
    writer: &W,
    mco: &MultiClusterObservability,
    namespace: &str,
) -> Result<Vec<String>, Error>
where
    W: SecretWriter + Sync,
{
    let mut created = Vec::new();
    for secret in seed_secrets(mco, namespace)? {
        if create_if_missing(writer, &secret).await? {
            info!(namespace = %namespace, name = %secret.name_any(), "Created secret");
            created.push(secret.name_any());
        }
    }
    Ok(created)
}
