use crate::cli::project::{self, print_step};
use crate::cli::CliContext;
use crate::core::audit_log::AuditContext;
use crate::core::config;
use crate::core::key_record::{JsonKeyRecord, KeyRecordStore};
use crate::core::lifecycle::{CredentialLifecycleManager, Phase, Step, StepReport};
use crate::error::LifecycleError;
use crate::models::config::ProjectConfig;
use crate::models::identity::ManagedIdentity;
use crate::providers::{IdentityProvider, SecretStore};
use anyhow::{bail, Result};
use clap::Args;

#[derive(Args, Debug)]
pub struct SetupArgs {
    /// Project name from gha-aws-creds.toml
    pub project: String,
    /// Run one step (1.1-1.4) instead of the whole phase
    #[arg(long, value_parser = project::step_parser(Phase::Setup))]
    pub step: Option<Step>,
}

pub fn run(ctx: &CliContext, args: SetupArgs) -> Result<()> {
    let config = project::load_config(ctx)?;
    let project = config::find_project(&config, &args.project)?;

    let needs_policy = matches!(args.step, None | Some(Step::PutInlinePolicy));
    let needs_github = matches!(args.step, None | Some(Step::PublishSecrets));

    let aws = project::connect_aws(project)?;
    let identity = project::managed_identity(ctx, project, &aws, needs_policy)?;
    let store = project::secret_store(ctx, &project.github.repo, needs_github)?;
    let record = project::key_record(ctx, project);
    let manager = CredentialLifecycleManager::new(aws, store);

    println!("Setup: project '{}' (IAM user {})", project.name, identity.name);
    if needs_github {
        println!("  repository secrets: {}", project.github.repo.repo_ref().secrets_url());
    }

    match args.step {
        Some(step) => run_single(ctx, &manager, project, &identity, &record, step),
        None => run_phase(ctx, &manager, project, &identity, &record),
    }
}

fn run_phase<I: IdentityProvider, S: SecretStore>(
    ctx: &CliContext,
    manager: &CredentialLifecycleManager<I, S>,
    project: &ProjectConfig,
    identity: &ManagedIdentity,
    record: &JsonKeyRecord,
) -> Result<()> {
    let result = manager.run_setup(
        identity,
        record,
        &project.github.repo.repo_ref(),
        &project.github.secret_names,
        &project.aws_region,
        |report| {
            print_step(report);
            audit_step(ctx, project, report);
        },
    );

    match result {
        Ok(summary) => {
            println!(
                "\nSetup complete: access key {} published to {}",
                summary.access_key_id,
                project.github.repo.repo_ref()
            );
            println!("  local record: {}", record.location().display());
            Ok(())
        }
        Err(abort) => {
            ctx.audit(
                AuditContext::new("setup", &project.name).step(abort.step),
                Err(abort.source.to_string()),
            );
            print_hint(&abort.source);
            Err(abort.into())
        }
    }
}

fn run_single<I: IdentityProvider, S: SecretStore>(
    ctx: &CliContext,
    manager: &CredentialLifecycleManager<I, S>,
    project: &ProjectConfig,
    identity: &ManagedIdentity,
    record: &JsonKeyRecord,
    step: Step,
) -> Result<()> {
    let result: Result<StepReport> = match step {
        Step::CreateIdentity => manager.create_identity(identity).map_err(Into::into),
        Step::PutInlinePolicy => manager.put_inline_policy(identity).map_err(Into::into),
        Step::EnsureAccessKey => manager
            .ensure_access_key(&identity.name, record)
            .map(|issued| issued.report())
            .map_err(|e| {
                print_hint(&e);
                e.into()
            }),
        Step::PublishSecrets => publish_current_key(ctx, manager, project, identity, record),
        other => bail!("step {} is not a setup step", other),
    };

    match result {
        Ok(report) => {
            print_step(&report);
            audit_step(ctx, project, &report);
            Ok(())
        }
        Err(e) => {
            ctx.audit(
                AuditContext::new("setup", &project.name).step(step),
                Err(format!("{:#}", e)),
            );
            Err(e.context(format!("step {} {}", step, step.title())))
        }
    }
}

/// Step 1.4 alone. A key minted on the way is reported and audited as 1.3.
fn publish_current_key<I: IdentityProvider, S: SecretStore>(
    ctx: &CliContext,
    manager: &CredentialLifecycleManager<I, S>,
    project: &ProjectConfig,
    identity: &ManagedIdentity,
    record: &JsonKeyRecord,
) -> Result<StepReport> {
    let result = manager.publish_current_key(
        &identity.name,
        record,
        &project.github.repo.repo_ref(),
        &project.github.secret_names,
        &project.aws_region,
    );
    match result {
        Ok((issued, report)) => {
            if issued.minted {
                let minted = issued.report();
                print_step(&minted);
                audit_step(ctx, project, &minted);
            }
            Ok(report)
        }
        Err(e) => {
            print_hint(&e);
            Err(e.into())
        }
    }
}

fn audit_step(ctx: &CliContext, project: &ProjectConfig, report: &StepReport) {
    ctx.audit(
        AuditContext::new("setup", &project.name)
            .step(report.step)
            .detail(&report.detail),
        Ok(()),
    );
}

fn print_hint(err: &LifecycleError) {
    match err {
        LifecycleError::MissingLocalRecord { identity, .. } => {
            eprintln!(
                "hint: the secret key of the live access key cannot be recovered; \
                 delete it with `gha-aws-creds teardown <project> --step 2.2` \
                 and rerun setup for {}",
                identity
            );
        }
        LifecycleError::StaleLocalRecord { .. } => {
            eprintln!(
                "hint: the local record is out of date; remove it, \
                 delete the live key with step 2.2, then rerun setup"
            );
        }
        LifecycleError::PublishIncomplete { published, .. } if !published.is_empty() => {
            eprintln!(
                "hint: already written: {}; rerunning setup overwrites them",
                published.join(", ")
            );
        }
        _ => {}
    }
}
