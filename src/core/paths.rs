//! State root resolution and the files kept under it.

use crate::constants;
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StatePaths {
    pub root: PathBuf,
    pub config: PathBuf,
    pub audit_log: PathBuf,
    pub audit_lock: PathBuf,
    pub counters: PathBuf,
}

impl StatePaths {
    /// Resolve the state root from CLI arg, env var, the nearest ancestor
    /// holding a config file, or the current directory.
    pub fn resolve(root_arg: Option<PathBuf>) -> Result<Self> {
        if let Some(root) = root_arg {
            return Ok(Self::from_root(root));
        }
        if let Ok(root) = env::var(constants::ROOT_ENV) {
            if !root.is_empty() {
                return Ok(Self::from_root(PathBuf::from(root)));
            }
        }
        let cwd = env::current_dir().context("resolve current directory")?;
        if let Some(found) = find_root(&cwd) {
            return Ok(Self::from_root(found));
        }
        Ok(Self::from_root(cwd))
    }

    pub fn from_root(root: PathBuf) -> Self {
        let config = root.join(constants::CONFIG_FILE_NAME);
        let audit_log = root.join("audit.log");
        let audit_lock = root.join("audit.lock");
        let counters = root.join("counters");
        Self {
            root,
            config,
            audit_log,
            audit_lock,
            counters,
        }
    }

    /// Config-relative paths are anchored at the root; absolute ones pass through.
    pub fn resolve_relative(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

fn find_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(constants::CONFIG_FILE_NAME).is_file())
        .map(Path::to_path_buf)
}

impl std::fmt::Display for StatePaths {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "state@{}", self.root.display())
    }
}
