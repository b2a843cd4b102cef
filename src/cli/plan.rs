//! Read-only preview of what setup would do for a project.

use crate::cli::project;
use crate::cli::CliContext;
use crate::core::config;
use crate::core::key_record::KeyRecordStore;
use crate::error::ProviderError;
use crate::providers::IdentityProvider;
use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;
use std::env;

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Project name from gha-aws-creds.toml
    pub project: String,
    /// Output format (text|json)
    #[arg(long, default_value = "text")]
    pub format: String,
    /// Skip the live IAM lookup
    #[arg(long)]
    pub offline: bool,
}

/// What step 1.3 would do, given the live keys and the local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyAction {
    Create,
    Reuse,
    FailMissingRecord,
    FailStaleRecord,
    Unknown,
}

impl KeyAction {
    fn describe(self) -> &'static str {
        match self {
            KeyAction::Create => "create a new access key",
            KeyAction::Reuse => "reuse the recorded access key",
            KeyAction::FailMissingRecord => "fail: a live key exists but there is no local record",
            KeyAction::FailStaleRecord => "fail: the local record names a key that is not live",
            KeyAction::Unknown => "unknown (live keys not checked)",
        }
    }
}

pub fn predict_key_action(live: Option<&[String]>, recorded: Option<&str>) -> KeyAction {
    let Some(live) = live else {
        return KeyAction::Unknown;
    };
    if live.is_empty() {
        return KeyAction::Create;
    }
    match recorded {
        None => KeyAction::FailMissingRecord,
        Some(id) if live.iter().any(|k| k == id) => KeyAction::Reuse,
        Some(_) => KeyAction::FailStaleRecord,
    }
}

#[derive(Debug, Serialize)]
struct ProjectPlan {
    action: &'static str,
    project: String,
    iam_user: String,
    aws_region: String,
    policy_name: String,
    policy_source: String,
    policy_needs_account_id: bool,
    user_exists: Option<bool>,
    live_access_keys: Option<Vec<String>>,
    record_path: String,
    recorded_access_key: Option<String>,
    key_action: KeyAction,
    repository: String,
    secrets_url: String,
    secret_names: [String; 3],
    token_env: String,
    token_present: bool,
    issues: Vec<String>,
}

pub fn run(ctx: &CliContext, args: PlanArgs) -> Result<()> {
    if args.format != "text" && args.format != "json" {
        bail!("unknown format '{}' (expected text or json)", args.format);
    }
    let config = project::load_config(ctx)?;
    let project = config::find_project(&config, &args.project)?;
    let mut issues = Vec::new();

    let policy_source = match &project.policy_file {
        Some(file) => ctx.paths.resolve_relative(file).display().to_string(),
        None => "inline".to_string(),
    };
    let policy_needs_account_id = match config::load_policy(&ctx.paths.root, project) {
        Ok(policy) => policy.needs_account_id(),
        Err(e) => {
            issues.push(format!("policy: {:#}", e));
            false
        }
    };

    let record = project::key_record(ctx, project);
    let recorded_access_key = match record.load() {
        Ok(pair) => pair.map(|p| p.access_key_id),
        Err(e) => {
            issues.push(e.to_string());
            None
        }
    };

    let (user_exists, live_access_keys) = if args.offline {
        (None, None)
    } else {
        let aws = project::connect_aws(project)?;
        match aws.list_access_keys(&project.iam_user_name) {
            Ok(keys) => (Some(true), Some(keys)),
            Err(ProviderError::NotFound { .. }) => (Some(false), Some(Vec::new())),
            Err(e) => {
                issues.push(format!("cannot list access keys: {}", e));
                (None, None)
            }
        }
    };

    let key_action =
        predict_key_action(live_access_keys.as_deref(), recorded_access_key.as_deref());
    if matches!(key_action, KeyAction::FailMissingRecord | KeyAction::FailStaleRecord) {
        issues.push(format!("step 1.3 would {}", key_action.describe()));
    }

    let token_env = project.github.repo.token_env.clone();
    let token_present = env::var(&token_env).map(|v| !v.is_empty()).unwrap_or(false);
    if !token_present {
        issues.push(format!("{} is not set", token_env));
    }

    let repo = project.github.repo.repo_ref();
    let names = project.github.secret_names.ordered().map(str::to_string);
    let plan = ProjectPlan {
        action: "setup",
        project: project.name.clone(),
        iam_user: project.iam_user_name.clone(),
        aws_region: project.aws_region.clone(),
        policy_name: crate::models::identity::policy_name_for(&project.iam_user_name),
        policy_source,
        policy_needs_account_id,
        user_exists,
        live_access_keys,
        record_path: record.location().display().to_string(),
        recorded_access_key,
        key_action,
        repository: repo.to_string(),
        secrets_url: repo.secrets_url(),
        secret_names: names,
        token_env,
        token_present,
        issues,
    };

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_text(&plan);
    }
    Ok(())
}

fn print_text(plan: &ProjectPlan) {
    println!("Plan: setup '{}'", plan.project);
    println!("  iam user: {} ({})", plan.iam_user, plan.aws_region);
    match plan.user_exists {
        Some(true) => println!("  user exists: yes"),
        Some(false) => println!("  user exists: no (will create)"),
        None => println!("  user exists: unknown"),
    }
    println!("  inline policy: {} from {}", plan.policy_name, plan.policy_source);
    if plan.policy_needs_account_id {
        println!("  account id: looked up via STS at setup");
    }
    if let Some(keys) = &plan.live_access_keys {
        println!("  live access keys: {}", keys.len());
    }
    println!(
        "  local record: {} ({})",
        plan.record_path,
        plan.recorded_access_key.as_deref().unwrap_or("absent")
    );
    println!("  access key: {}", plan.key_action.describe());
    println!("  repository: {}", plan.repository);
    for name in &plan.secret_names {
        println!("    - {}", name);
    }
    println!("  secrets page: {}", plan.secrets_url);
    if plan.issues.is_empty() {
        println!("  status: ready");
    } else {
        for issue in &plan.issues {
            println!("  issue: {}", issue);
        }
    }
    println!("\nNo changes made (dry-run).");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_predict_create_when_no_live_keys() {
        assert_eq!(predict_key_action(Some(&[]), None), KeyAction::Create);
        assert_eq!(predict_key_action(Some(&[]), Some("AKIAOLD")), KeyAction::Create);
    }

    #[test]
    fn test_predict_reuse_and_failures() {
        let live = keys(&["AKIA1"]);
        assert_eq!(predict_key_action(Some(&live), Some("AKIA1")), KeyAction::Reuse);
        assert_eq!(predict_key_action(Some(&live), None), KeyAction::FailMissingRecord);
        assert_eq!(predict_key_action(Some(&live), Some("AKIA2")), KeyAction::FailStaleRecord);
    }

    #[test]
    fn test_predict_offline() {
        assert_eq!(predict_key_action(None, Some("AKIA1")), KeyAction::Unknown);
    }

    #[test]
    fn test_key_action_json() {
        assert_eq!(
            serde_json::to_string(&KeyAction::FailMissingRecord).unwrap(),
            r#""fail-missing-record""#
        );
    }
}
