use crate::cli::CliContext;
use crate::core::audit_log::AuditContext;
use crate::core::node_counter::{FileCounter, SharedCounter};
use anyhow::Result;
use clap::{Args, Subcommand};

#[derive(Subcommand, Debug)]
pub enum NodeCommand {
    /// Print the next node id and advance the counter
    Next(NodeNextArgs),
    /// Reset a counter to zero
    Reset(NodeResetArgs),
}

#[derive(Args, Debug)]
pub struct NodeNextArgs {
    /// Counter name, shared by launchers of one fleet
    pub counter: String,
    /// Number of nodes in the fleet
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub nodes: u32,
    /// Reset to zero before drawing
    #[arg(long)]
    pub reset: bool,
}

#[derive(Args, Debug)]
pub struct NodeResetArgs {
    pub counter: String,
}

pub fn run(ctx: &CliContext, cmd: NodeCommand) -> Result<()> {
    match cmd {
        NodeCommand::Next(args) => {
            let counter = FileCounter::open(&ctx.paths.counters, &args.counter)?;
            if args.reset {
                reset(ctx, &counter)?;
            }
            let id = counter.next_node_id(args.nodes)?;
            // Bare id on stdout so launchers can capture it.
            println!("{}", id);
            Ok(())
        }
        NodeCommand::Reset(args) => {
            let counter = FileCounter::open(&ctx.paths.counters, &args.counter)?;
            reset(ctx, &counter)?;
            println!("counter '{}' reset", counter.name());
            Ok(())
        }
    }
}

fn reset(ctx: &CliContext, counter: &FileCounter) -> Result<()> {
    let result = counter.reset();
    ctx.audit(
        AuditContext::new("node-reset", counter.name()),
        result.as_ref().map(|_| ()).map_err(|e| format!("{:#}", e)),
    );
    result
}
