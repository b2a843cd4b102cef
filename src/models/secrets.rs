//! Repository references and the mirrored secret names.

use crate::constants;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A GitHub repository whose Actions secrets are managed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Settings page listing the repository's Actions secrets.
    pub fn secrets_url(&self) -> String {
        format!(
            "https://github.com/{}/{}/settings/secrets/actions",
            self.owner, self.repo
        )
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Names of the three secrets mirroring an issued access key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretNames {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_access_key_id")]
    pub access_key_id: String,
    #[serde(default = "default_secret_access_key")]
    pub secret_access_key: String,
}

impl Default for SecretNames {
    fn default() -> Self {
        Self {
            region: default_region(),
            access_key_id: default_access_key_id(),
            secret_access_key: default_secret_access_key(),
        }
    }
}

impl SecretNames {
    /// Names in publish order: region, access key id, secret key.
    pub fn ordered(&self) -> [&str; 3] {
        [
            self.region.as_str(),
            self.access_key_id.as_str(),
            self.secret_access_key.as_str(),
        ]
    }
}

fn default_region() -> String {
    constants::DEFAULT_SECRET_REGION.to_string()
}

fn default_access_key_id() -> String {
    constants::DEFAULT_SECRET_ACCESS_KEY_ID.to_string()
}

fn default_secret_access_key() -> String {
    constants::DEFAULT_SECRET_SECRET_ACCESS_KEY.to_string()
}

/// Check a GitHub Actions secret name: `[A-Za-z0-9_]`, no leading digit,
/// no `GITHUB_` prefix.
pub fn validate_secret_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("secret name cannot be empty".into());
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("secret name '{}': only [A-Za-z0-9_] allowed", name));
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(format!("secret name '{}' cannot start with a digit", name));
    }
    if name.to_ascii_uppercase().starts_with("GITHUB_") {
        return Err(format!("secret name '{}' cannot start with GITHUB_", name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names_in_order() {
        let names = SecretNames::default();
        assert_eq!(
            names.ordered(),
            ["AWS_DEFAULT_REGION", "AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"]
        );
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let names: SecretNames = toml::from_str(r#"region = "DEV_ACC_AWS_REGION""#).unwrap();
        assert_eq!(names.region, "DEV_ACC_AWS_REGION");
        assert_eq!(names.access_key_id, "AWS_ACCESS_KEY_ID");
    }

    #[test]
    fn test_secrets_url() {
        let repo = RepoRef::new("octo", "widgets");
        assert_eq!(
            repo.secrets_url(),
            "https://github.com/octo/widgets/settings/secrets/actions"
        );
        assert_eq!(repo.to_string(), "octo/widgets");
    }

    #[test]
    fn test_validate_secret_name() {
        assert!(validate_secret_name("DEV_ACC_AWS_REGION").is_ok());
        assert!(validate_secret_name("").is_err());
        assert!(validate_secret_name("1ST").is_err());
        assert!(validate_secret_name("GITHUB_TOKEN").is_err());
        assert!(validate_secret_name("has-dash").is_err());
    }
}
