//! Local mirror of the currently issued access key.
//!
//! The record is plain JSON with no encryption; callers are responsible for
//! where it lives. Files are written with mode 0600 on unix.

use crate::constants;
use crate::error::RecordError;
use crate::models::access_key::AccessKeyPair;
use crate::util::fs as fs_util;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub trait KeyRecordStore {
    /// Where the record lives, for error messages.
    fn location(&self) -> &Path;

    /// Read the record. `Ok(None)` when no record exists.
    fn load(&self) -> Result<Option<AccessKeyPair>, RecordError>;

    /// Replace the record with `pair`.
    fn save(&self, pair: &AccessKeyPair) -> Result<(), RecordError>;

    fn exists(&self) -> Result<bool, RecordError> {
        Ok(self.load()?.is_some())
    }
}

#[derive(Debug, Clone)]
pub struct JsonKeyRecord {
    path: PathBuf,
}

impl JsonKeyRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl KeyRecordStore for JsonKeyRecord {
    fn location(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Option<AccessKeyPair>, RecordError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(RecordError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let pair = serde_json::from_str(&content).map_err(|source| RecordError::Malformed {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(pair))
    }

    fn save(&self, pair: &AccessKeyPair) -> Result<(), RecordError> {
        let content = serde_json::to_vec_pretty(pair).map_err(|source| RecordError::Serialize {
            path: self.path.clone(),
            source,
        })?;
        fs_util::persist_atomic(&self.path, &content, constants::RECORD_FILE_MODE).map_err(
            |source| RecordError::Write {
                path: self.path.clone(),
                source,
            },
        )
    }
}
