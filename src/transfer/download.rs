use std::io::Read;

use crate::compress::Compression;
use crate::config::{Config, RestoreOptions};
use crate::error::{ConfsyncError, Result};
use crate::extract::{self, RestoreReport};

use super::{build_agent, redact};

/// Fetches an archive from a pre-signed URL.
pub struct Downloader {
    agent: ureq::Agent,
    compression: Compression,
}

impl Downloader {
    pub fn new(config: &Config) -> Self {
        Self {
            agent: build_agent(&config.transfer),
            compression: config.compression,
        }
    }

    /// Issues the GET and returns the decoded tar stream.
    ///
    /// Anything but `200 OK` is an error, other 2xx codes included.
    pub fn download(&self, url: &str) -> Result<Box<dyn Read + Send>> {
        tracing::debug!(host = %redact(url), "downloading archive");
        let resp = self.agent.get(url).call()?;
        let status = resp.status();
        if status != 200 {
            return Err(ConfsyncError::HttpStatus { status });
        }
        Ok(self.compression.decoder(resp.into_reader())?)
    }

    /// Downloads and unpacks in one pass.
    pub fn restore(&self, url: &str, options: &RestoreOptions) -> Result<RestoreReport> {
        let stream = self.download(url)?;
        extract::unpack(stream, options)
    }
}
