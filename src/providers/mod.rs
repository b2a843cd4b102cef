//! Collaborator interfaces for the identity provider and the secret store,
//! plus their AWS and GitHub implementations.

use crate::error::ProviderError;
use crate::models::access_key::AccessKeyPair;
use crate::models::secrets::RepoRef;
use std::collections::BTreeMap;

pub mod aws_iam;
pub mod github;
#[cfg(test)]
pub mod memory;

/// The identity/access-management operations the lifecycle consumes.
///
/// Every call is blocking. Implementations map provider error codes onto
/// [`ProviderError`] and never retry.
pub trait IdentityProvider {
    fn create_user(&self, name: &str, tags: &BTreeMap<String, String>) -> Result<(), ProviderError>;

    fn put_user_policy(
        &self,
        user: &str,
        policy_name: &str,
        document: &str,
    ) -> Result<(), ProviderError>;

    /// Live access key ids, in the order the provider lists them.
    fn list_access_keys(&self, user: &str) -> Result<Vec<String>, ProviderError>;

    fn create_access_key(&self, user: &str) -> Result<AccessKeyPair, ProviderError>;

    fn delete_access_key(&self, user: &str, access_key_id: &str) -> Result<(), ProviderError>;

    fn delete_user_policy(&self, user: &str, policy_name: &str) -> Result<(), ProviderError>;

    fn delete_user(&self, name: &str) -> Result<(), ProviderError>;
}

/// Repository-scoped secret storage.
pub trait SecretStore {
    fn create_secret(&self, repo: &RepoRef, name: &str, value: &str) -> Result<(), ProviderError>;

    /// `NotFound` only when the repository is reachable and holds no secret
    /// called `name`. An unreachable repository is `Fatal`.
    fn delete_secret(&self, repo: &RepoRef, name: &str) -> Result<(), ProviderError>;
}
