//! Configuration file model.

use crate::constants;
use crate::models::policy::PolicyDocument;
use crate::models::secrets::{RepoRef, SecretNames};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, rename = "project")]
    pub projects: Vec<ProjectConfig>,
    #[serde(default, rename = "secret_set")]
    pub secret_sets: Vec<SecretSetConfig>,
}

/// One IAM user and the repository that receives its credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    /// Named profile from the shared AWS config; default chain when absent.
    #[serde(default)]
    pub aws_profile: Option<String>,
    pub aws_region: String,
    pub iam_user_name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub policy: Option<PolicyDocument>,
    /// JSON policy file, relative to the state root.
    #[serde(default)]
    pub policy_file: Option<PathBuf>,
    /// Local access key record, relative to the state root.
    pub access_key_record: PathBuf,
    pub github: ProjectGithub,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubRepoConfig {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// REST API root of a GitHub Enterprise Server; api.github.com when absent.
    #[serde(default)]
    pub api_base: Option<String>,
}

impl GithubRepoConfig {
    pub fn repo_ref(&self) -> RepoRef {
        RepoRef::new(&self.owner, &self.repo)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectGithub {
    #[serde(flatten)]
    pub repo: GithubRepoConfig,
    #[serde(default)]
    pub secret_names: SecretNames,
}

/// A fixed list of repository secrets sourced from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretSetConfig {
    pub name: String,
    pub github: GithubRepoConfig,
    #[serde(default)]
    pub secrets: Vec<SecretEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretEntry {
    pub name: String,
    pub value_env: String,
}

fn default_token_env() -> String {
    constants::DEFAULT_TOKEN_ENV.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_project_with_defaults() {
        let cfg: ConfigFile = toml::from_str(
            r#"
[[project]]
name = "dev"
aws_region = "us-east-1"
iam_user_name = "gh-ci-demo"
access_key_record = "dev_access_key.json"

[project.github]
owner = "octo"
repo = "widgets"

[project.github.secret_names]
region = "DEV_ACC_AWS_REGION"
"#,
        )
        .unwrap();
        let project = &cfg.projects[0];
        assert_eq!(project.github.repo.token_env, "GITHUB_TOKEN");
        assert_eq!(project.github.secret_names.region, "DEV_ACC_AWS_REGION");
        assert_eq!(project.github.secret_names.secret_access_key, "AWS_SECRET_ACCESS_KEY");
        assert!(project.tags.is_empty());
        assert!(project.aws_profile.is_none());
        assert!(project.github.repo.api_base.is_none());
        assert!(cfg.secret_sets.is_empty());
    }

    #[test]
    fn test_parse_secret_set() {
        let cfg: ConfigFile = toml::from_str(
            r#"
[[secret_set]]
name = "r2"

[secret_set.github]
owner = "octo"
repo = "widgets"
token_env = "GH_PAT"
api_base = "https://ghe.example.com/api/v3"

[[secret_set.secrets]]
name = "CLOUDFLARE_R2_ENDPOINT"
value_env = "R2_ENDPOINT"
"#,
        )
        .unwrap();
        let set = &cfg.secret_sets[0];
        assert_eq!(set.github.token_env, "GH_PAT");
        assert_eq!(set.github.api_base.as_deref(), Some("https://ghe.example.com/api/v3"));
        assert_eq!(set.secrets[0].value_env, "R2_ENDPOINT");
        assert_eq!(set.github.repo_ref().to_string(), "octo/widgets");
    }
}
