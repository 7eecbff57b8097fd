use std::{path::PathBuf, time::Duration};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The command ran, but exited unsuccessfully.
    #[error("command `{command}` failed ({code:?}): {stderr}")]
    Cli {
        command: String,
        stderr: String,
        code: Option<i32>,
    },

    /// The queried object, or the queried field of it, does not exist.
    #[error("{resource} not found: {stderr}")]
    NotFound { resource: String, stderr: String },

    #[error("patch of {resource} rejected: {stderr}")]
    PatchRejected { resource: String, stderr: String },

    #[error("timed out after {timeout:?} waiting for {description}{}", last_seen(.last))]
    Timeout {
        description: String,
        timeout: Duration,
        last: Option<String>,
    },

    #[error("probe for {description} failed: {source}")]
    ProbeFailed {
        description: String,
        #[source]
        source: Box<Error>,
    },

    /// A degraded rollout does not recover on its own, so this is never retried.
    #[error("pool {pool} is degraded: {degraded} degraded machine(s)")]
    Degraded { pool: String, degraded: u32 },

    #[error("pool {pool} has {updating} nodes updating at once, more than maxUnavailable {max_unavailable}")]
    MaxUnavailableExceeded {
        pool: String,
        updating: usize,
        max_unavailable: usize,
    },

    #[error("invalid maxUnavailable value {0:?}")]
    InvalidMaxUnavailable(String),

    #[error("failed to spawn command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The manifest lacks `kind` or `metadata.name`.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("failed to parse command output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("command output is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

fn last_seen(last: &Option<String>) -> String {
    match last {
        Some(last) => format!(" (last: {last})"),
        None => String::new(),
    }
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
