use crate::cli::project::{self, print_step};
use crate::cli::CliContext;
use crate::core::audit_log::AuditContext;
use crate::core::config;
use crate::core::key_record::{JsonKeyRecord, KeyRecordStore};
use crate::core::lifecycle::{CredentialLifecycleManager, Phase, Step, StepReport};
use crate::core::secret_sync::SecretDeletion;
use crate::models::config::ProjectConfig;
use crate::providers::{IdentityProvider, SecretStore};
use anyhow::{bail, Context, Result};
use clap::Args;
use dialoguer::Confirm;

#[derive(Args, Debug)]
pub struct TeardownArgs {
    /// Project name from gha-aws-creds.toml
    pub project: String,
    /// Run one step (2.1-2.4) instead of the whole phase
    #[arg(long, value_parser = project::step_parser(Phase::Teardown))]
    pub step: Option<Step>,
    /// Skip the confirmation prompt
    #[arg(long, short)]
    pub yes: bool,
}

pub fn run(ctx: &CliContext, args: TeardownArgs) -> Result<()> {
    let config = project::load_config(ctx)?;
    let project = config::find_project(&config, &args.project)?;
    let identity = project.iam_user_name.as_str();

    confirm(ctx, &args, project)?;

    let needs_github = matches!(args.step, None | Some(Step::DeleteSecrets));
    let aws = project::connect_aws(project)?;
    let store = project::secret_store(ctx, &project.github.repo, needs_github)?;
    let record = project::key_record(ctx, project);
    let manager = CredentialLifecycleManager::new(aws, store);

    println!("Teardown: project '{}' (IAM user {})", project.name, identity);
    if needs_github {
        println!("  repository secrets: {}", project.github.repo.repo_ref().secrets_url());
    }

    match args.step {
        Some(step) => run_single(ctx, &manager, project, &record, step)?,
        None => run_phase(ctx, &manager, project, &record)?,
    }

    if record.exists().unwrap_or(true) {
        println!("  local record kept: {}", record.location().display());
    }
    Ok(())
}

fn confirm(ctx: &CliContext, args: &TeardownArgs, project: &ProjectConfig) -> Result<()> {
    if args.yes {
        return Ok(());
    }
    if ctx.non_interactive {
        bail!(
            "teardown deletes IAM user {}; pass --yes to run non-interactively",
            project.iam_user_name
        );
    }
    let what = match args.step {
        Some(step) => format!("step {} ({})", step, step.title()),
        None => "all teardown steps".to_string(),
    };
    let proceed = Confirm::new()
        .with_prompt(format!(
            "Run {} for IAM user {} and {}?",
            what,
            project.iam_user_name,
            project.github.repo.repo_ref()
        ))
        .default(false)
        .interact()
        .context("read confirmation")?;
    if !proceed {
        bail!("teardown cancelled");
    }
    Ok(())
}

fn run_phase<I: IdentityProvider, S: SecretStore>(
    ctx: &CliContext,
    manager: &CredentialLifecycleManager<I, S>,
    project: &ProjectConfig,
    record: &JsonKeyRecord,
) -> Result<()> {
    let result = manager.run_teardown(
        &project.iam_user_name,
        record,
        &project.github.repo.repo_ref(),
        &project.github.secret_names,
        |report| {
            print_step(report);
            audit_step(ctx, project, report);
        },
    );

    match result {
        Ok(summary) => {
            print_failed_deletions(&summary.secret_deletions);
            println!("\nTeardown complete: IAM user {} removed", project.iam_user_name);
            Ok(())
        }
        Err(abort) => {
            ctx.audit(
                AuditContext::new("teardown", &project.name).step(abort.step),
                Err(abort.source.to_string()),
            );
            Err(abort.into())
        }
    }
}

fn run_single<I: IdentityProvider, S: SecretStore>(
    ctx: &CliContext,
    manager: &CredentialLifecycleManager<I, S>,
    project: &ProjectConfig,
    record: &JsonKeyRecord,
    step: Step,
) -> Result<()> {
    let identity = project.iam_user_name.as_str();
    let result: Result<StepReport> = match step {
        Step::DeleteSecrets => {
            let (report, deletions) = manager
                .delete_secrets(&project.github.repo.repo_ref(), &project.github.secret_names);
            print_failed_deletions(&deletions);
            Ok(report)
        }
        Step::DeleteAccessKey => manager.delete_access_key(identity, record).map_err(Into::into),
        Step::DeleteInlinePolicy => manager.delete_inline_policy(identity).map_err(Into::into),
        Step::DeleteIdentity => manager.delete_identity(identity).map_err(Into::into),
        other => bail!("step {} is not a teardown step", other),
    };

    match result {
        Ok(report) => {
            print_step(&report);
            audit_step(ctx, project, &report);
            Ok(())
        }
        Err(e) => {
            ctx.audit(
                AuditContext::new("teardown", &project.name).step(step),
                Err(format!("{:#}", e)),
            );
            Err(e.context(format!("step {} {}", step, step.title())))
        }
    }
}

fn audit_step(ctx: &CliContext, project: &ProjectConfig, report: &StepReport) {
    ctx.audit(
        AuditContext::new("teardown", &project.name)
            .step(report.step)
            .detail(&report.detail),
        Ok(()),
    );
}

fn print_failed_deletions(deletions: &[SecretDeletion]) {
    for deletion in deletions {
        if let Err(e) = &deletion.result {
            eprintln!("warning: secret {} was not deleted: {}", deletion.name, e);
        }
    }
}
