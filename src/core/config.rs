use crate::constants;
use crate::error::ConfigError;
use crate::models::config::{ConfigFile, GithubRepoConfig, ProjectConfig, SecretSetConfig};
use crate::models::policy::PolicyDocument;
use crate::models::secrets::validate_secret_name;
use crate::util::fs as fs_util;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub const SAMPLE_CONFIG: &str = r#"# gha-aws-creds configuration.
#
# Each [[project]] is one IAM user whose access key is mirrored into the
# Actions secrets of one GitHub repository. Relative paths are resolved
# against the directory holding this file.

[[project]]
name = "dev"
# aws_profile = "default"
aws_region = "us-east-1"
iam_user_name = "gh-ci-dev"
access_key_record = "dev_access_key.json"

[project.tags]
managed-by = "gha-aws-creds"

[project.github]
owner = "your-org"
repo = "your-repo"
token_env = "GITHUB_TOKEN"
# api_base = "https://ghe.example.com/api/v3"

[project.github.secret_names]
region = "AWS_DEFAULT_REGION"
access_key_id = "AWS_ACCESS_KEY_ID"
secret_access_key = "AWS_SECRET_ACCESS_KEY"

# Inline policy; use policy_file = "policy.json" to load it from disk instead.
[project.policy]
Version = "2012-10-17"

[[project.policy.Statement]]
Effect = "Allow"
Action = ["dynamodb:GetItem", "dynamodb:PutItem", "dynamodb:Query"]
Resource = ["arn:aws:dynamodb:${aws_region}:${aws_account_id}:table/example_*"]

[[project.policy.Statement]]
Effect = "Allow"
Action = "dynamodb:ListTables"
Resource = "*"

# Static secrets copied from environment variables with `secrets push`.
# [[secret_set]]
# name = "r2"
# github = { owner = "your-org", repo = "your-repo" }
#
# [[secret_set.secrets]]
# name = "CLOUDFLARE_R2_ENDPOINT"
# value_env = "R2_ENDPOINT"
"#;

/// Read and parse without validating.
pub fn load(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Read, parse and reject configs with any problem.
pub fn load_validated(path: &Path) -> Result<ConfigFile, ConfigError> {
    let config = load(path)?;
    let problems = validate(&config);
    if !problems.is_empty() {
        return Err(ConfigError::Invalid { problems });
    }
    Ok(config)
}

/// Every problem found, empty when the config is usable.
pub fn validate(config: &ConfigFile) -> Vec<String> {
    let mut problems = Vec::new();

    let mut names = BTreeSet::new();
    for project in &config.projects {
        if !names.insert(project.name.as_str()) {
            problems.push(format!("duplicate project '{}'", project.name));
        }
        validate_project(project, &mut problems);
    }

    let mut set_names = BTreeSet::new();
    for set in &config.secret_sets {
        if !set_names.insert(set.name.as_str()) {
            problems.push(format!("duplicate secret_set '{}'", set.name));
        }
        validate_secret_set(set, &mut problems);
    }
    problems
}

fn validate_project(project: &ProjectConfig, problems: &mut Vec<String>) {
    let at = format!("project '{}'", project.name);
    if project.name.trim().is_empty() {
        problems.push("project name cannot be empty".into());
    }
    if let Err(e) = validate_iam_user_name(&project.iam_user_name) {
        problems.push(format!("{}: {}", at, e));
    }
    if project.aws_region.trim().is_empty() {
        problems.push(format!("{}: aws_region cannot be empty", at));
    }
    match (&project.policy, &project.policy_file) {
        (Some(_), Some(_)) => problems.push(format!("{}: set policy or policy_file, not both", at)),
        (None, None) => problems.push(format!("{}: one of policy or policy_file is required", at)),
        (Some(doc), None) => {
            if let Err(e) = doc.validate() {
                problems.push(format!("{}: {}", at, e));
            }
        }
        (None, Some(_)) => {}
    }
    if project.access_key_record.as_os_str().is_empty() {
        problems.push(format!("{}: access_key_record cannot be empty", at));
    }
    validate_github(&at, &project.github.repo, problems);

    let ordered = project.github.secret_names.ordered();
    for name in ordered {
        if let Err(e) = validate_secret_name(name) {
            problems.push(format!("{}: {}", at, e));
        }
    }
    let distinct: BTreeSet<&str> = ordered.into_iter().collect();
    if distinct.len() != ordered.len() {
        problems.push(format!("{}: secret names must be distinct", at));
    }
}

fn validate_secret_set(set: &SecretSetConfig, problems: &mut Vec<String>) {
    let at = format!("secret_set '{}'", set.name);
    validate_github(&at, &set.github, problems);
    if set.secrets.is_empty() {
        problems.push(format!("{}: no secrets listed", at));
    }
    let mut seen = BTreeSet::new();
    for entry in &set.secrets {
        if let Err(e) = validate_secret_name(&entry.name) {
            problems.push(format!("{}: {}", at, e));
        }
        if !seen.insert(entry.name.as_str()) {
            problems.push(format!("{}: duplicate secret '{}'", at, entry.name));
        }
        if entry.value_env.is_empty() {
            problems.push(format!("{}: secret '{}' has no value_env", at, entry.name));
        }
    }
}

fn validate_github(at: &str, github: &GithubRepoConfig, problems: &mut Vec<String>) {
    if github.owner.is_empty() || github.repo.is_empty() {
        problems.push(format!("{}: github owner and repo are required", at));
    }
    if let Some(api_base) = &github.api_base {
        if !api_base.starts_with("https://") && !api_base.starts_with("http://") {
            problems.push(format!(
                "{}: github api_base '{}' must be an http(s) URL",
                at, api_base
            ));
        }
    }
}

/// IAM user names: `[A-Za-z0-9+=,.@_-]`, 1 to 64 characters.
pub fn validate_iam_user_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > constants::MAX_IAM_USER_NAME_LEN {
        return Err(format!(
            "iam_user_name '{}' must be 1-{} characters",
            name,
            constants::MAX_IAM_USER_NAME_LEN
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || "+=,.@_-".contains(*c)))
    {
        return Err(format!("iam_user_name '{}' contains invalid character '{}'", name, bad));
    }
    Ok(())
}

pub fn find_project<'a>(
    config: &'a ConfigFile,
    name: &str,
) -> Result<&'a ProjectConfig, ConfigError> {
    config
        .projects
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| ConfigError::UnknownProject(name.to_string()))
}

pub fn find_secret_set<'a>(
    config: &'a ConfigFile,
    name: &str,
) -> Result<&'a SecretSetConfig, ConfigError> {
    config
        .secret_sets
        .iter()
        .find(|s| s.name == name)
        .ok_or_else(|| ConfigError::UnknownSecretSet(name.to_string()))
}

/// The project's policy, inline or read from `policy_file` under `root`.
pub fn load_policy(root: &Path, project: &ProjectConfig) -> Result<PolicyDocument> {
    if let Some(doc) = &project.policy {
        return Ok(doc.clone());
    }
    let Some(file) = &project.policy_file else {
        anyhow::bail!("project '{}' has no policy", project.name);
    };
    let path = if file.is_absolute() {
        file.clone()
    } else {
        root.join(file)
    };
    let content = fs::read_to_string(&path)
        .with_context(|| format!("read policy file {}", path.display()))?;
    let doc: PolicyDocument = serde_json::from_str(&content)
        .with_context(|| format!("parse policy file {}", path.display()))?;
    doc.validate()
        .with_context(|| format!("policy file {}", path.display()))?;
    Ok(doc)
}

/// Write the commented sample config, refusing to clobber unless `force`.
pub fn write_sample(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    fs_util::write_atomic(path, SAMPLE_CONFIG.as_bytes(), constants::CONFIG_FILE_MODE)
}
