//! # Remote Transfer
//!
//! Moves archive streams to and from a blob store through pre-signed URLs. The
//! URLs are bearer credentials, so only their host ever reaches a log line.

mod download;
mod upload;

pub use download::Downloader;
pub use upload::Uploader;

use url::Url;

use crate::archive::PackSummary;
use crate::config::{Config, TransferConfig};
use crate::error::Result;
use crate::extract::RestoreReport;

pub(crate) fn build_agent(cfg: &TransferConfig) -> ureq::Agent {
    let mut builder = ureq::AgentBuilder::new().timeout_connect(cfg.connect_timeout());
    if let Some(timeout) = cfg.timeout() {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

/// Host part of a URL, safe to log.
pub(crate) fn redact(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "<unparsable url>".to_string())
}

/// Packs the files matched by `patterns` and uploads them to `url`.
pub fn backup<S: AsRef<str>>(url: &str, patterns: &[S], config: &Config) -> Result<PackSummary> {
    config.validate()?;
    Uploader::new(config).upload(url, patterns)
}

/// Downloads the archive at `url` and restores it per `config.restore`.
pub fn restore(url: &str, config: &Config) -> Result<RestoreReport> {
    config.validate()?;
    Downloader::new(config).restore(url, &config.restore)
}
