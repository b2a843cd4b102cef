//! Round-robin node ids for launchers sharing one host.
//!
//! Each launcher draws an id in `0..node_count` from a named counter. Draws
//! are serialised by an exclusive flock, so two launchers never get the same
//! id from one draw sequence.

use crate::constants;
use crate::core::file_lock::FileLock;
use crate::util::fs as fs_util;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

pub trait SharedCounter {
    /// Return the current id and advance the counter, both modulo `node_count`.
    fn next_node_id(&self, node_count: u32) -> Result<u32>;

    /// Start the sequence over at zero.
    fn reset(&self) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CounterState {
    next: u32,
    updated_at: DateTime<Utc>,
}

/// Counter persisted as `<dir>/<name>.json`, locked via `<dir>/<name>.lock`.
#[derive(Debug, Clone)]
pub struct FileCounter {
    name: String,
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl FileCounter {
    pub fn open(dir: &Path, name: &str) -> Result<Self> {
        validate_counter_name(name)?;
        fs_util::ensure_dir(dir, constants::COUNTERS_DIR_MODE)?;
        Ok(Self {
            name: name.to_string(),
            state_path: dir.join(format!("{}.json", name)),
            lock_path: dir.join(format!("{}.lock", name)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn read_next(&self) -> Result<u32> {
        let content = match fs::read_to_string(&self.state_path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(e).with_context(|| format!("read counter {}", self.state_path.display()))
            }
        };
        let state: CounterState = serde_json::from_str(&content)
            .with_context(|| format!("parse counter {}", self.state_path.display()))?;
        Ok(state.next)
    }

    fn write_next(&self, next: u32) -> Result<()> {
        let state = CounterState {
            next,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&state).context("serialize counter")?;
        fs_util::write_atomic(&self.state_path, &json, constants::RECORD_FILE_MODE)
    }
}

impl SharedCounter for FileCounter {
    fn next_node_id(&self, node_count: u32) -> Result<u32> {
        if node_count == 0 {
            bail!("node count must be at least 1");
        }
        let _lock = FileLock::exclusive(&self.lock_path)?;
        let id = self.read_next()? % node_count;
        self.write_next((id + 1) % node_count)?;
        debug!(counter = %self.name, id, node_count, "drew node id");
        Ok(id)
    }

    fn reset(&self) -> Result<()> {
        let _lock = FileLock::exclusive(&self.lock_path)?;
        self.write_next(0)?;
        debug!(counter = %self.name, "reset node counter");
        Ok(())
    }
}

fn validate_counter_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('.') {
        bail!("invalid counter name '{}'", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        bail!("counter name '{}': only [A-Za-z0-9_.-] allowed", name);
    }
    Ok(())
}
