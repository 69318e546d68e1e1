//! Create-once Secrets.
//!
//! Some Secrets are seeded by the operator and afterwards owned by users or
//! by running sessions. They are created when missing and never updated.

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tracing::debug;

use crate::controller::error::Error;

/// Read and create access to Secrets.
pub trait SecretWriter {
    /// Fetch a Secret, returning `None` when it does not exist.
    fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<Secret>, Error>> + Send;

    /// Create a Secret. Returns `false` when one with the same name exists.
    fn create_secret(
        &self,
        secret: &Secret,
    ) -> impl std::future::Future<Output = Result<bool, Error>> + Send;
}

/// Create `secret` unless a Secret with its name already exists.
///
/// Returns whether it was created. A 404 (usually a missing namespace) is
/// reported as a transient error.
pub async fn create_if_missing<W>(writer: &W, secret: &Secret) -> Result<bool, Error>
where
    W: SecretWriter + Sync,
{
    let name = secret.name_any();
    let namespace = secret
        .namespace()
        .ok_or_else(|| Error::Permanent(format!("Secret {} has no namespace", name)))?;
    let what = format!("Secret/{}", name);

    if writer
        .get_secret(&namespace, &name)
        .await
        .map_err(|e| e.not_found_as_transient(&what))?
        .is_some()
    {
        debug!(namespace = %namespace, name = %name, "Secret exists, leaving it alone");
        return Ok(false);
    }
    writer
        .create_secret(secret)
        .await
        .map_err(|e| e.not_found_as_transient(&what))
}
