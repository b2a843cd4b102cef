//! Append-only, hash-chained audit trail of provisioning actions.
//!
//! Each JSONL entry stores the sha256 of its predecessor and of its own
//! canonical form, so edits and deletions inside the log break the chain.
//! No secret values are ever written here.

use crate::constants;
use crate::core::file_lock::FileLock;
use crate::core::paths::StatePaths;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::warn;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const HASH_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub actor: String,
    /// Project, secret set or counter the action touched.
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AuditResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_version: Option<u8>,
}

/// What is being recorded, before the outcome is known.
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub action: String,
    pub subject: String,
    pub step: Option<String>,
    pub detail: Option<String>,
}

impl AuditContext {
    pub fn new(action: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            subject: subject.into(),
            step: None,
            detail: None,
        }
    }

    pub fn step(mut self, step: impl ToString) -> Self {
        self.step = Some(step.to_string());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

fn detect_actor() -> String {
    if let Ok(user) = std::env::var("SUDO_USER") {
        if !user.is_empty() {
            return format!("{}(sudo)", user);
        }
    }
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}

/// Append an entry with its outcome, chained to the current tail.
pub fn log_with_result(
    paths: &StatePaths,
    ctx: AuditContext,
    success: bool,
    error: Option<String>,
) -> Result<()> {
    let _lock = FileLock::exclusive(&paths.audit_lock)?;
    let prev_hash = last_entry_hash(&paths.audit_log)?;

    let mut entry = AuditEntry {
        timestamp: Utc::now(),
        action: ctx.action,
        actor: detect_actor(),
        subject: ctx.subject,
        step: ctx.step,
        detail: ctx.detail,
        result: Some(AuditResult { success, error }),
        prev_hash,
        entry_hash: None,
        hash_version: Some(HASH_VERSION),
    };
    entry.entry_hash = Some(compute_entry_hash(&entry)?);

    let line = serde_json::to_string(&entry).context("serialize audit entry")?;
    append_line(&paths.audit_log, &line)
}

/// sha256 over the canonical JSON of the entry minus `entry_hash`.
fn compute_entry_hash(entry: &AuditEntry) -> Result<String> {
    let mut value = serde_json::to_value(entry).context("serialize for hash")?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("entry_hash");
    }
    let canonical = serde_json::to_string(&canonicalize_value(&value))
        .context("serialize canonical json")?;
    Ok(format!("{:064x}", Sha256::digest(canonical.as_bytes())))
}

/// Recursively sort object keys so hashing is independent of field order.
fn canonicalize_value(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), canonicalize_value(&map[k]));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(canonicalize_value).collect())
        }
        other => other.clone(),
    }
}

fn append_line(audit_path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = audit_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(audit_path)
        .with_context(|| format!("open audit log {}", audit_path.display()))?;
    writeln!(file, "{}", line).context("write audit entry")?;

    #[cfg(unix)]
    {
        let perm = fs::Permissions::from_mode(constants::AUDIT_LOG_MODE);
        fs::set_permissions(audit_path, perm).context("set audit log permissions")?;
    }
    Ok(())
}

/// Hash of the last non-blank line, read backwards in chunks.
fn last_entry_hash(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let len = file
        .metadata()
        .with_context(|| format!("stat {}", path.display()))?
        .len();

    const CHUNK: u64 = 8192;
    let mut offset = len;
    let mut buf = Vec::new();

    while offset > 0 {
        let read_size = std::cmp::min(CHUNK, offset);
        offset -= read_size;
        file.seek(SeekFrom::Start(offset))
            .with_context(|| format!("seek {}", path.display()))?;
        let mut tmp = vec![0u8; read_size as usize];
        file.read_exact(&mut tmp)
            .with_context(|| format!("read {}", path.display()))?;
        buf.splice(0..0, tmp);

        let has_full_line = buf
            .split(|b| *b == b'\n')
            .skip(1)
            .any(|line| !line.iter().all(u8::is_ascii_whitespace));
        if has_full_line || offset == 0 {
            let last = buf
                .split(|b| *b == b'\n')
                .rev()
                .find(|line| !line.iter().all(u8::is_ascii_whitespace));
            return Ok(last.map(line_hash));
        }
    }
    Ok(None)
}

fn line_hash(line: &[u8]) -> String {
    match serde_json::from_slice::<AuditEntry>(line) {
        Ok(AuditEntry {
            entry_hash: Some(hash),
            ..
        }) => hash,
        _ => format!("{:064x}", Sha256::digest(line)),
    }
}

/// Entries in file order; `limit` keeps the most recent N.
pub fn read_log(paths: &StatePaths, limit: Option<usize>) -> Result<Vec<AuditEntry>> {
    if !paths.audit_log.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(&paths.audit_log)
        .with_context(|| format!("open audit log {}", paths.audit_log.display()))?;
    let mut entries = Vec::new();
    let mut malformed = 0usize;

    for line in BufReader::new(file).lines() {
        let line = line.context("read audit log line")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditEntry>(trimmed) {
            Ok(entry) => entries.push(entry),
            Err(_) => malformed += 1,
        }
    }
    if malformed > 0 {
        warn!(malformed, "skipped malformed audit entries");
    }

    if let Some(limit) = limit {
        if entries.len() > limit {
            entries = entries.split_off(entries.len() - limit);
        }
    }
    Ok(entries)
}

/// Check hashes and links. Returns (entries checked, problems found).
pub fn verify_chain(paths: &StatePaths) -> Result<(usize, Vec<String>)> {
    let entries = read_log(paths, None)?;
    let mut errors = Vec::new();
    let mut prev: Option<&String> = None;

    for (i, entry) in entries.iter().enumerate() {
        let n = i + 1;
        if i > 0 && entry.prev_hash.as_ref() != prev {
            errors.push(format!(
                "entry {}: prev_hash mismatch (expected {:?}, got {:?})",
                n, prev, entry.prev_hash
            ));
        }
        match &entry.entry_hash {
            Some(stored) => match compute_entry_hash(entry) {
                Ok(computed) if &computed == stored => {}
                Ok(_) => errors.push(format!("entry {}: entry_hash mismatch (tampered?)", n)),
                Err(e) => errors.push(format!("entry {}: cannot compute hash: {}", n, e)),
            },
            None => errors.push(format!("entry {}: missing entry_hash", n)),
        }
        prev = entry.entry_hash.as_ref();
    }
    Ok((entries.len(), errors))
}
