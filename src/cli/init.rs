use crate::cli::CliContext;
use crate::core::audit_log::AuditContext;
use crate::core::config;
use anyhow::Result;
use clap::Args;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

pub fn run(ctx: &CliContext, args: InitArgs) -> Result<()> {
    let path = &ctx.paths.config;
    config::write_sample(path, args.force)?;
    ctx.audit(
        AuditContext::new("init", path.display().to_string()),
        Ok(()),
    );
    println!("sample config written to {}", path.display());
    println!("edit the [[project]] entries, then run `gha-aws-creds plan <project>`");
    Ok(())
}
