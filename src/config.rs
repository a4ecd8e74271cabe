//! Per-call configuration.
//!
//! Every behaviour switch (container format, restore policies, network deadlines,
//! URL grace window) is an explicit value handed to the operation that needs it.
//! A `Config` can be deserialized from a JSON file; every field has a default so a
//! partial file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compress::Compression;
use crate::error::{ConfsyncError, Result};

pub const DEFAULT_GRACE_SECS: u64 = 60;
pub const DEFAULT_PIPE_CAPACITY: usize = 8;
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
pub const DEFAULT_LEVEL: i32 = 3;

/// What to do when a restore target already exists.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Truncate and replace the existing file.
    #[default]
    Overwrite,
    /// Leave the existing file untouched.
    SkipIfExists,
}

/// What to do when writing a single restore entry fails.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WriteErrorPolicy {
    /// Abort the restore on the first failed entry.
    Propagate,
    /// Record the failure, log a warning and carry on.
    #[default]
    LogAndContinue,
}

/// Options for a single restore job.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct RestoreOptions {
    pub conflict: ConflictPolicy,
    pub on_write_error: WriteErrorPolicy,
    /// When set, entries must resolve under this directory.
    pub confine_to: Option<PathBuf>,
}

impl RestoreOptions {
    pub fn with_conflict(mut self, conflict: ConflictPolicy) -> Self {
        self.conflict = conflict;
        self
    }

    pub fn with_write_error(mut self, policy: WriteErrorPolicy) -> Self {
        self.on_write_error = policy;
        self
    }

    pub fn confined_to(mut self, root: impl Into<PathBuf>) -> Self {
        self.confine_to = Some(root.into());
        self
    }
}

/// Network and pipe settings for uploads and downloads.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TransferConfig {
    pub connect_timeout_secs: u64,
    /// Overall deadline for one request, body included. Unset means no deadline.
    pub timeout_secs: Option<u64>,
    /// Number of chunks the upload pipe holds before the pack worker blocks.
    pub pipe_capacity: usize,
    pub chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            timeout_secs: None,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl TransferConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Top-level configuration, as read from a JSON file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub compression: Compression,
    /// Codec level for gzip (clamped to 0..=9) or zstd.
    pub level: i32,
    pub restore: RestoreOptions,
    pub transfer: TransferConfig,
    pub grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            level: DEFAULT_LEVEL,
            restore: RestoreOptions::default(),
            transfer: TransferConfig::default(),
            grace_secs: DEFAULT_GRACE_SECS,
        }
    }
}

impl Config {
    /// Reads a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfsyncError::Config(format!("cannot read '{}': {e}", path.display()))
        })?;
        Self::from_json(&raw)
            .map_err(|e| ConfsyncError::Config(format!("'{}': {e}", path.display())))
    }

    pub fn from_json(raw: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.transfer.pipe_capacity == 0 {
            return Err(ConfsyncError::Config(
                "transfer.pipe_capacity must be at least 1".into(),
            ));
        }
        if self.transfer.chunk_size == 0 {
            return Err(ConfsyncError::Config(
                "transfer.chunk_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
