//! Turns a `[[project]]` entry into the collaborators a lifecycle run needs.

use crate::cli::CliContext;
use crate::core::config;
use crate::core::key_record::JsonKeyRecord;
use crate::core::lifecycle::{Phase, Step, StepOutcome, StepReport};
use crate::models::config::{ConfigFile, GithubRepoConfig, ProjectConfig};
use crate::models::identity::ManagedIdentity;
use crate::models::policy::PolicyContext;
use crate::providers::aws_iam::AwsIamProvider;
use crate::providers::github::GithubSecretStore;
use anyhow::{bail, Context, Result};
use dialoguer::Password;
use std::env;
use tracing::debug;
use zeroize::Zeroizing;

pub fn load_config(ctx: &CliContext) -> Result<ConfigFile> {
    config::load_validated(&ctx.paths.config)
        .with_context(|| format!("load config for {}", ctx.paths))
}

pub fn connect_aws(project: &ProjectConfig) -> Result<AwsIamProvider> {
    AwsIamProvider::connect(project.aws_profile.as_deref(), &project.aws_region)
        .with_context(|| format!("connect to AWS for project '{}'", project.name))
}

/// Identity with tags and, when `with_policy`, the rendered inline policy.
///
/// The account id is fetched from STS only if the policy references it.
pub fn managed_identity(
    ctx: &CliContext,
    project: &ProjectConfig,
    aws: &AwsIamProvider,
    with_policy: bool,
) -> Result<ManagedIdentity> {
    let identity = ManagedIdentity::new(&project.iam_user_name).with_tags(project.tags.clone());
    if !with_policy {
        return Ok(identity);
    }
    let policy = config::load_policy(&ctx.paths.root, project)?;
    let mut policy_ctx = PolicyContext {
        aws_region: project.aws_region.clone(),
        aws_account_id: None,
    };
    if policy.needs_account_id() {
        let account = aws
            .caller_account_id()
            .context("look up AWS account id for policy")?;
        debug!(account = %account, "resolved caller account");
        policy_ctx.aws_account_id = Some(account);
    }
    let document = policy
        .render(&policy_ctx)
        .with_context(|| format!("render policy for project '{}'", project.name))?;
    Ok(identity.with_policy_document(document))
}

pub fn key_record(ctx: &CliContext, project: &ProjectConfig) -> JsonKeyRecord {
    JsonKeyRecord::new(ctx.paths.resolve_relative(&project.access_key_record))
}

/// Token from the configured variable, or a hidden prompt when interactive.
pub fn github_token(ctx: &CliContext, github: &GithubRepoConfig) -> Result<Zeroizing<String>> {
    match env::var(&github.token_env) {
        Ok(token) if !token.is_empty() => return Ok(Zeroizing::new(token)),
        _ => {}
    }
    if ctx.non_interactive {
        bail!(
            "{} is not set; export a GitHub token with repository secrets write access",
            github.token_env
        );
    }
    let token = Password::new()
        .with_prompt(format!("GitHub token for {}/{}", github.owner, github.repo))
        .allow_empty_password(false)
        .interact()
        .context("read GitHub token from prompt")?;
    Ok(Zeroizing::new(token))
}

/// Store for `github`, authenticated only when `needed`.
pub fn secret_store(
    ctx: &CliContext,
    github: &GithubRepoConfig,
    needed: bool,
) -> Result<GithubSecretStore> {
    let token = if needed {
        Some(github_token(ctx, github)?)
    } else {
        None
    };
    let store = GithubSecretStore::new(token)?;
    Ok(match &github.api_base {
        Some(api_base) => store.with_api_base(api_base),
        None => store,
    })
}

/// One progress line per finished step.
pub fn print_step(report: &StepReport) {
    let status = match report.outcome {
        StepOutcome::Applied => "done",
        StepOutcome::AlreadySatisfied => "ok",
        StepOutcome::Degraded => "partial",
    };
    println!(
        "  [{}] {} {}: {}",
        status,
        report.step,
        report.step.title(),
        report.detail
    );
}

/// clap parser for `--step`, restricted to one phase.
pub fn step_parser(
    phase: Phase,
) -> impl Fn(&str) -> Result<Step, String> + Clone + Send + Sync + 'static {
    move |s: &str| {
        let step: Step = s.parse()?;
        if step.phase() != phase {
            return Err(format!("step {} is not a {} step", step, phase));
        }
        Ok(step)
    }
}
