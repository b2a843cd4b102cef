use crate::core::lifecycle::{LifecycleState, Phase, Step};
use std::path::PathBuf;
use thiserror::Error;

/// Closed set of outcomes a collaborator adapter reports on failure.
///
/// `AlreadyExists` and `NotFound` are the only kinds the lifecycle absorbs;
/// everything else is `Fatal`.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{resource} already exists")]
    AlreadyExists { resource: String },

    #[error("{resource} does not exist")]
    NotFound { resource: String },

    #[error("{operation} failed: {message}")]
    Fatal { operation: String, message: String },
}

impl ProviderError {
    pub fn fatal(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ProviderError::Fatal {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

/// Local access key record failures.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to read key record {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write key record {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize key record {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed key record {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {path} not found (run `gha-aws-creds init`)")]
    Missing { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration:\n  - {}", .problems.join("\n  - "))]
    Invalid { problems: Vec<String> },

    #[error("no project named '{0}' in config")]
    UnknownProject(String),

    #[error("no secret set named '{0}' in config")]
    UnknownSecretSet(String),

    #[error("environment variable {var} for secret {secret} is not set")]
    MissingEnv { var: String, secret: String },
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("step {step} failed: {source}")]
    Provider {
        step: Step,
        #[source]
        source: ProviderError,
    },

    #[error("identity {identity} has a live access key but no local record at {path}")]
    MissingLocalRecord { identity: String, path: PathBuf },

    #[error("local record {path} holds key {recorded}, which is not a live key of {identity}")]
    StaleLocalRecord {
        identity: String,
        path: PathBuf,
        recorded: String,
    },

    #[error(
        "secret {failed} could not be written after {} of {total} succeeded: {source}",
        .published.len()
    )]
    PublishIncomplete {
        failed: String,
        published: Vec<String>,
        total: usize,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Record(#[from] RecordError),
}

impl LifecycleError {
    pub(crate) fn provider(step: Step, source: ProviderError) -> Self {
        LifecycleError::Provider { step, source }
    }
}

/// A setup or teardown run stopped at `step`.
///
/// `reached` is the last state the completed steps guarantee, if any step
/// completed at all.
#[derive(Debug, Error)]
#[error("{phase} aborted at step {step} (reached: {}): {source}", reached_label(.reached))]
pub struct PhaseAbort {
    pub phase: Phase,
    pub step: Step,
    pub reached: Option<LifecycleState>,
    #[source]
    pub source: LifecycleError,
}

fn reached_label(reached: &Option<LifecycleState>) -> String {
    match reached {
        Some(state) => state.to_string(),
        None => "nothing".to_string(),
    }
}
