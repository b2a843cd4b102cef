use crate::cli::project;
use crate::cli::CliContext;
use crate::core::audit_log::AuditContext;
use crate::core::config;
use crate::core::secret_sync;
use crate::error::ConfigError;
use crate::models::config::SecretSetConfig;
use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use std::env;
use zeroize::Zeroizing;

#[derive(Subcommand, Debug)]
pub enum SecretsCommand {
    /// Publish every secret of a set, in order
    Push(SecretSetArgs),
    /// Delete every secret of a set (best-effort)
    Delete(SecretSetArgs),
}

#[derive(Args, Debug)]
pub struct SecretSetArgs {
    /// Secret set name from gha-aws-creds.toml
    pub name: String,
}

pub fn run(ctx: &CliContext, cmd: SecretsCommand) -> Result<()> {
    match cmd {
        SecretsCommand::Push(args) => run_push(ctx, args),
        SecretsCommand::Delete(args) => run_delete(ctx, args),
    }
}

/// Values for every entry, or the first missing variable.
fn collect_values(set: &SecretSetConfig) -> Result<Vec<(String, Zeroizing<String>)>, ConfigError> {
    set.secrets
        .iter()
        .map(|entry| match env::var(&entry.value_env) {
            Ok(value) => Ok((entry.name.clone(), Zeroizing::new(value))),
            Err(_) => Err(ConfigError::MissingEnv {
                var: entry.value_env.clone(),
                secret: entry.name.clone(),
            }),
        })
        .collect()
}

fn run_push(ctx: &CliContext, args: SecretSetArgs) -> Result<()> {
    let config = project::load_config(ctx)?;
    let set = config::find_secret_set(&config, &args.name)?;
    let values = collect_values(set)?;

    let store = project::secret_store(ctx, &set.github, true)?;
    let repo = set.github.repo_ref();
    println!("Secrets: push '{}' to {}", set.name, repo);
    println!("  repository secrets: {}", repo.secrets_url());

    let entries: Vec<(&str, &str)> = values
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();
    let result = secret_sync::publish_ordered(&store, &repo, &entries);

    let audit = AuditContext::new("secrets-push", &set.name).detail(repo.to_string());
    match result {
        Ok(published) => {
            for name in &published {
                println!("  [done] {}", name);
            }
            ctx.audit(audit, Ok(()));
            println!("\n{} secrets published", published.len());
            Ok(())
        }
        Err(e) => {
            ctx.audit(audit, Err(e.to_string()));
            Err(e.into())
        }
    }
}

fn run_delete(ctx: &CliContext, args: SecretSetArgs) -> Result<()> {
    let config = project::load_config(ctx)?;
    let set = config::find_secret_set(&config, &args.name)?;

    let store = project::secret_store(ctx, &set.github, true)?;
    let repo = set.github.repo_ref();
    println!("Secrets: delete '{}' from {}", set.name, repo);
    println!("  repository secrets: {}", repo.secrets_url());

    let names: Vec<&str> = set.secrets.iter().map(|s| s.name.as_str()).collect();
    let deletions = secret_sync::delete_best_effort(&store, &repo, &names);

    let mut failed = Vec::new();
    for deletion in &deletions {
        match &deletion.result {
            Ok(()) if deletion.already_absent => {
                println!("  [ok] {} (already absent)", deletion.name)
            }
            Ok(()) => println!("  [done] {}", deletion.name),
            Err(e) => {
                println!("  [fail] {}: {}", deletion.name, e);
                failed.push(deletion.name.as_str());
            }
        }
    }

    let audit = AuditContext::new("secrets-delete", &set.name).detail(repo.to_string());
    if failed.is_empty() {
        ctx.audit(audit, Ok(()));
        Ok(())
    } else {
        let message = format!("failed to delete: {}", failed.join(", "));
        ctx.audit(audit, Err(message.clone()));
        bail!(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::{GithubRepoConfig, SecretEntry};

    fn set(vars: &[(&str, &str)]) -> SecretSetConfig {
        SecretSetConfig {
            name: "r2".into(),
            github: GithubRepoConfig {
                owner: "octo".into(),
                repo: "widgets".into(),
                token_env: "GITHUB_TOKEN".into(),
                api_base: None,
            },
            secrets: vars
                .iter()
                .map(|(name, var)| SecretEntry {
                    name: name.to_string(),
                    value_env: var.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_missing_env_names_the_variable() {
        let set = set(&[("CLOUDFLARE_R2_ENDPOINT", "GHA_AWS_CREDS_TEST_UNSET_R2_ENDPOINT")]);
        match collect_values(&set) {
            Err(ConfigError::MissingEnv { var, secret }) => {
                assert_eq!(var, "GHA_AWS_CREDS_TEST_UNSET_R2_ENDPOINT");
                assert_eq!(secret, "CLOUDFLARE_R2_ENDPOINT");
            }
            other => panic!("unexpected result: {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn test_collect_values_in_order() {
        env::set_var("GHA_AWS_CREDS_TEST_R2_A", "a-value");
        env::set_var("GHA_AWS_CREDS_TEST_R2_B", "b-value");
        let set = set(&[("A", "GHA_AWS_CREDS_TEST_R2_A"), ("B", "GHA_AWS_CREDS_TEST_R2_B")]);
        let values = collect_values(&set).unwrap();
        assert_eq!(values[0].0, "A");
        assert_eq!(values[1].1.as_str(), "b-value");
    }
}
