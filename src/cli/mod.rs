use std::path::{Path, PathBuf};

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::compress::Compression;
use crate::config::{Config, ConflictPolicy, WriteErrorPolicy};
use crate::error::{ConfsyncError, Result};

/// Environment variable consulted when `--url` is omitted.
pub const URL_ENV: &str = "CONFSYNC_URL";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Pack files matching the patterns and upload them to a pre-signed URL.
    Backup {
        /// Pre-signed PUT URL. Falls back to CONFSYNC_URL.
        #[arg(long)]
        url: Option<String>,

        /// Glob patterns selecting the files to back up (`**` recurses).
        #[arg(required = true)]
        patterns: Vec<String>,

        #[command(flatten)]
        common: CommonOpts,
    },

    /// Download an archive from a pre-signed URL and restore it.
    Restore {
        /// Pre-signed GET URL. Falls back to CONFSYNC_URL.
        #[arg(long)]
        url: Option<String>,

        #[command(flatten)]
        common: CommonOpts,

        #[command(flatten)]
        restore: RestoreOpts,
    },

    /// Pack files into a local archive file.
    #[command(alias = "c")]
    Pack {
        /// The path for the output archive.
        #[arg(short, long)]
        output: PathBuf,

        #[arg(required = true)]
        patterns: Vec<String>,

        #[command(flatten)]
        common: CommonOpts,
    },

    /// Restore a local archive file.
    #[command(alias = "x")]
    Unpack {
        #[arg(required = true)]
        archive: PathBuf,

        #[command(flatten)]
        common: CommonOpts,

        #[command(flatten)]
        restore: RestoreOpts,
    },

    /// List the entries of a local archive file.
    #[command(alias = "l")]
    List {
        #[arg(required = true)]
        archive: PathBuf,

        /// Container format. Detected from the file when omitted.
        #[arg(long, value_enum)]
        compression: Option<Compression>,
    },

    /// Show when a pre-signed URL expires; exits non-zero when it is stale.
    CheckUrl {
        /// The URL to inspect. Falls back to CONFSYNC_URL.
        url: Option<String>,

        /// JSON configuration file supplying `grace_secs`.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Seconds before expiry at which the URL stops counting as valid.
        /// Overrides the configured grace window.
        #[arg(long)]
        grace_secs: Option<u64>,
    },
}

/// Options shared by every command that reads or writes an archive.
#[derive(ClapArgs, Clone, Debug, Default)]
pub struct CommonOpts {
    /// JSON configuration file; flags override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Container format of the archive stream.
    #[arg(long, value_enum)]
    pub compression: Option<Compression>,

    /// Codec level for gzip or zstd.
    #[arg(long)]
    pub level: Option<i32>,
}

/// Restore policy flags.
#[derive(ClapArgs, Clone, Debug, Default)]
pub struct RestoreOpts {
    /// Leave files that already exist untouched.
    #[arg(long)]
    pub skip_existing: bool,

    /// Abort on the first entry that cannot be written.
    #[arg(long)]
    pub fail_fast: bool,

    /// Refuse entries that resolve outside this directory.
    #[arg(long)]
    pub root: Option<PathBuf>,
}

impl CommonOpts {
    /// Loads the configuration file, if any, and applies the flags on top.
    pub fn resolve_config(&self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(c) = self.compression {
            cfg.compression = c;
        }
        if let Some(level) = self.level {
            cfg.level = level;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

impl RestoreOpts {
    pub fn apply(&self, cfg: &mut Config) {
        if self.skip_existing {
            cfg.restore.conflict = ConflictPolicy::SkipIfExists;
        }
        if self.fail_fast {
            cfg.restore.on_write_error = WriteErrorPolicy::Propagate;
        }
        if let Some(root) = &self.root {
            cfg.restore.confine_to = Some(root.clone());
        }
    }
}

/// Picks the URL from the command line, then from `CONFSYNC_URL`.
pub fn url_from_opt_or_env(url: Option<String>) -> Result<String> {
    if let Some(url) = url {
        return Ok(url);
    }
    std::env::var(URL_ENV)
        .map_err(|_| ConfsyncError::Config(format!("no URL given and {URL_ENV} is not set")))
}

/// Reads the first bytes of a file to guess its container format.
pub fn detect_compression(path: &Path) -> Result<Compression> {
    use std::io::Read;
    let mut prefix = [0u8; 4];
    let mut file = std::fs::File::open(path).map_err(|e| ConfsyncError::io(path, e))?;
    let mut filled = 0;
    while filled < prefix.len() {
        let n = file
            .read(&mut prefix[filled..])
            .map_err(|e| ConfsyncError::io(path, e))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(Compression::detect(&prefix[..filled]))
}

/// Parses command-line arguments using `clap` and returns the command to execute.
pub fn run() -> Commands {
    Args::parse().command
}
