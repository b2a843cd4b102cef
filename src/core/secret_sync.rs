//! Ordered publish and best-effort delete of repository secrets.

use crate::error::{LifecycleError, ProviderError};
use crate::models::secrets::RepoRef;
use crate::providers::SecretStore;
use tracing::{info, warn};

/// Result of deleting one secret during a best-effort sweep.
#[derive(Debug)]
pub struct SecretDeletion {
    pub name: String,
    pub result: Result<(), ProviderError>,
    pub already_absent: bool,
}

impl SecretDeletion {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Write `entries` in order, stopping at the first failure.
///
/// Secrets written before the failure stay in place; the error lists them.
pub fn publish_ordered<S: SecretStore + ?Sized>(
    store: &S,
    repo: &RepoRef,
    entries: &[(&str, &str)],
) -> Result<Vec<String>, LifecycleError> {
    let mut published = Vec::with_capacity(entries.len());
    for (name, value) in entries {
        match store.create_secret(repo, name, value) {
            Ok(()) => {
                info!(repo = %repo, secret = %name, "created repository secret");
                published.push(name.to_string());
            }
            Err(source) => {
                warn!(
                    repo = %repo,
                    secret = %name,
                    error = %source,
                    "failed to create repository secret"
                );
                return Err(LifecycleError::PublishIncomplete {
                    failed: name.to_string(),
                    published,
                    total: entries.len(),
                    source,
                });
            }
        }
    }
    Ok(published)
}

/// Delete every name, continuing past failures.
pub fn delete_best_effort<S: SecretStore + ?Sized>(
    store: &S,
    repo: &RepoRef,
    names: &[&str],
) -> Vec<SecretDeletion> {
    names
        .iter()
        .map(|name| {
            let (result, already_absent) = match store.delete_secret(repo, name) {
                Ok(()) => {
                    info!(repo = %repo, secret = %name, "deleted repository secret");
                    (Ok(()), false)
                }
                Err(ProviderError::NotFound { .. }) => {
                    info!(repo = %repo, secret = %name, "repository secret already absent");
                    (Ok(()), true)
                }
                Err(e) => {
                    warn!(
                        repo = %repo,
                        secret = %name,
                        error = %e,
                        "failed to delete repository secret"
                    );
                    (Err(e), false)
                }
            };
            SecretDeletion {
                name: name.to_string(),
                result,
                already_absent,
            }
        })
        .collect()
}
