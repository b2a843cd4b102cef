//! Read-only diagnostics for the config and local state.

use crate::cli::CliContext;
use crate::constants;
use crate::core::audit_log;
use crate::core::config;
use crate::core::key_record::{JsonKeyRecord, KeyRecordStore};
use crate::util::fs as fs_util;
use anyhow::Result;
use clap::Args;
use std::collections::BTreeSet;
use std::env;

#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Also verify the audit chain
    #[arg(long)]
    pub audit: bool,
}

#[derive(Default)]
struct Tally {
    pass: u32,
    warn: u32,
    fail: u32,
}

impl Tally {
    fn pass(&mut self, msg: impl AsRef<str>) {
        println!("  [PASS] {}", msg.as_ref());
        self.pass += 1;
    }

    fn warn(&mut self, msg: impl AsRef<str>) {
        println!("  [WARN] {}", msg.as_ref());
        self.warn += 1;
    }

    fn fail(&mut self, msg: impl AsRef<str>) {
        println!("  [FAIL] {}", msg.as_ref());
        self.fail += 1;
    }
}

pub fn run(ctx: &CliContext, args: DoctorArgs) -> Result<()> {
    let paths = &ctx.paths;
    let mut t = Tally::default();

    println!("Doctor: {}", paths);
    if paths.root.is_dir() {
        t.pass(format!("state root exists: {}", paths.root.display()));
    } else {
        t.fail(format!("state root missing: {}", paths.root.display()));
    }

    let config = match config::load(&paths.config) {
        Ok(config) => {
            t.pass(format!("config parses: {}", paths.config.display()));
            Some(config)
        }
        Err(e) => {
            t.fail(e.to_string());
            None
        }
    };

    if let Some(config) = &config {
        let problems = config::validate(config);
        if problems.is_empty() {
            t.pass(format!(
                "config valid: {} projects, {} secret sets",
                config.projects.len(),
                config.secret_sets.len()
            ));
        } else {
            for problem in &problems {
                t.fail(problem);
            }
        }

        for project in &config.projects {
            let record = JsonKeyRecord::new(paths.resolve_relative(&project.access_key_record));
            check_record(&mut t, &project.name, &record);
        }

        let token_envs: BTreeSet<&str> = config
            .projects
            .iter()
            .map(|p| p.github.repo.token_env.as_str())
            .chain(config.secret_sets.iter().map(|s| s.github.token_env.as_str()))
            .collect();
        for var in token_envs {
            if env::var(var).map(|v| !v.is_empty()).unwrap_or(false) {
                t.pass(format!("{} is set", var));
            } else {
                t.warn(format!("{} is not set (setup will prompt or fail)", var));
            }
        }

        for set in &config.secret_sets {
            let missing: Vec<&str> = set
                .secrets
                .iter()
                .filter(|s| env::var(&s.value_env).is_err())
                .map(|s| s.value_env.as_str())
                .collect();
            if missing.is_empty() {
                t.pass(format!("secret set '{}': all values present", set.name));
            } else {
                t.warn(format!("secret set '{}': unset {}", set.name, missing.join(", ")));
            }
        }
    }

    if paths.counters.is_dir() {
        match fs_util::mode_of(&paths.counters) {
            Ok(Some(mode)) if mode != constants::COUNTERS_DIR_MODE => t.warn(format!(
                "counters dir mode: {:04o} (expected {:04o})",
                mode,
                constants::COUNTERS_DIR_MODE
            )),
            Ok(_) => t.pass("counters dir mode ok"),
            Err(e) => t.warn(format!("{:#}", e)),
        }
    }

    if args.audit {
        match audit_log::verify_chain(paths) {
            Ok((total, errors)) if errors.is_empty() => {
                t.pass(format!("audit chain: {} entries verified", total))
            }
            Ok((total, errors)) => t.fail(format!(
                "audit chain: {} entries, {} errors",
                total,
                errors.len()
            )),
            Err(e) => t.fail(format!("audit chain unreadable: {:#}", e)),
        }
    }

    println!();
    println!("Doctor summary: {} pass, {} warn, {} fail", t.pass, t.warn, t.fail);
    if t.fail > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn check_record(t: &mut Tally, project: &str, record: &JsonKeyRecord) {
    let path = record.location();
    if !path.exists() {
        t.warn(format!(
            "project '{}': no key record at {} (created by setup)",
            project,
            path.display()
        ));
        return;
    }
    match record.load() {
        Ok(Some(pair)) => t.pass(format!(
            "project '{}': record holds {}",
            project, pair.access_key_id
        )),
        Ok(None) => {}
        Err(e) => t.fail(format!("project '{}': {}", project, e)),
    }
    match fs_util::mode_of(path) {
        Ok(Some(mode)) if mode & 0o077 != 0 => t.warn(format!(
            "project '{}': record mode {:04o} (expected {:04o})",
            project,
            mode,
            constants::RECORD_FILE_MODE
        )),
        Ok(_) => {}
        Err(e) => t.warn(format!("{:#}", e)),
    }
}
