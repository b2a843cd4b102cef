//! CLI routing and command dispatch.

use crate::core::audit_log::{self, AuditContext};
use crate::core::paths::StatePaths;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::warn;

pub mod audit;
pub mod doctor;
pub mod init;
pub mod node;
pub mod plan;
pub mod project;
pub mod secrets;
pub mod setup;
pub mod teardown;

/// Shared context passed to all command handlers.
pub struct CliContext {
    pub paths: StatePaths,
    pub non_interactive: bool,
}

impl CliContext {
    /// Append to the audit log. A failing audit write never fails the command.
    pub fn audit(&self, ctx: AuditContext, result: Result<(), String>) {
        let (success, error) = match result {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e)),
        };
        if let Err(e) = audit_log::log_with_result(&self.paths, ctx, success, error) {
            warn!(error = %e, "audit log write failed");
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "gha-aws-creds",
    version,
    about = "Provision IAM users and mirror their access keys into GitHub Actions secrets"
)]
pub struct Cli {
    /// State directory holding gha-aws-creds.toml, key records and the audit log
    #[arg(long, global = true, value_name = "PATH")]
    pub root: Option<PathBuf>,

    /// Run in non-interactive mode (no prompts, suitable for automation)
    #[arg(long, global = true, env = "GHA_AWS_CREDS_NON_INTERACTIVE")]
    pub non_interactive: bool,

    /// Log provider calls (same as RUST_LOG=gha_aws_creds=debug)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let ctx = CliContext {
            paths: StatePaths::resolve(self.root)?,
            non_interactive: self.non_interactive,
        };

        match self.command {
            Commands::Init(args) => init::run(&ctx, args),
            Commands::Setup(args) => setup::run(&ctx, args),
            Commands::Teardown(args) => teardown::run(&ctx, args),
            Commands::Plan(args) => plan::run(&ctx, args),
            Commands::Secrets { command } => secrets::run(&ctx, command),
            Commands::Node { command } => node::run(&ctx, command),
            Commands::Audit { command } => audit::run(&ctx, command),
            Commands::Doctor(args) => doctor::run(&ctx, args),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a sample gha-aws-creds.toml into the state directory
    Init(init::InitArgs),
    /// Create the IAM user, policy and access key, then publish the secrets
    Setup(setup::SetupArgs),
    /// Delete the secrets, access key, policy and IAM user
    Teardown(teardown::TeardownArgs),
    /// Preview what setup would do (read-only)
    Plan(plan::PlanArgs),
    /// Push or delete a static secret set
    Secrets {
        #[command(subcommand)]
        command: secrets::SecretsCommand,
    },
    /// Round-robin node ids for launchers
    Node {
        #[command(subcommand)]
        command: node::NodeCommand,
    },
    /// View the audit trail
    Audit {
        #[command(subcommand)]
        command: audit::AuditCommand,
    },
    /// Diagnose configuration and local state (safe, read-only)
    Doctor(doctor::DoctorArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lifecycle::Step;

    #[test]
    fn test_parse_setup_step() {
        let cli = Cli::try_parse_from(["gha-aws-creds", "setup", "dev", "--step", "1.3"]).unwrap();
        match cli.command {
            Commands::Setup(args) => {
                assert_eq!(args.project, "dev");
                assert_eq!(args.step, Some(Step::EnsureAccessKey));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_setup_rejects_teardown_step() {
        assert!(Cli::try_parse_from(["gha-aws-creds", "setup", "dev", "--step", "2.1"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "gha-aws-creds",
            "teardown",
            "dev",
            "--yes",
            "--root",
            "/tmp/state",
            "--non-interactive",
        ])
        .unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/state")));
        assert!(cli.non_interactive);
    }

    #[test]
    fn test_node_next_requires_nodes() {
        assert!(Cli::try_parse_from(["gha-aws-creds", "node", "next", "crawler"]).is_err());
        assert!(Cli::try_parse_from([
            "gha-aws-creds",
            "node",
            "next",
            "crawler",
            "--nodes",
            "3"
        ])
        .is_ok());
    }
}
