use std::io;

use crate::archive::{PackOptions, PackSummary};
use crate::compress::Compression;
use crate::config::{Config, TransferConfig};
use crate::error::{ConfsyncError, Result};
use crate::workers::pipe::{pipe, PipeReader};
use crate::workers::{spawn_pack_worker, CancelToken};

use super::{build_agent, redact};

/// Streams a freshly packed archive into an HTTP PUT.
///
/// Memory use is bounded by the pipe (`pipe_capacity * chunk_size`), whatever
/// the size of the archive.
pub struct Uploader {
    agent: ureq::Agent,
    transfer: TransferConfig,
    compression: Compression,
    level: i32,
}

impl Uploader {
    pub fn new(config: &Config) -> Self {
        Self {
            agent: build_agent(&config.transfer),
            transfer: config.transfer.clone(),
            compression: config.compression,
            level: config.level,
        }
    }

    pub fn upload<S: AsRef<str>>(&self, url: &str, patterns: &[S]) -> Result<PackSummary> {
        self.upload_with_cancel(url, patterns, &CancelToken::new())
    }

    /// Like [`Uploader::upload`], with a token that stops the pack worker.
    pub fn upload_with_cancel<S: AsRef<str>>(
        &self,
        url: &str,
        patterns: &[S],
        cancel: &CancelToken,
    ) -> Result<PackSummary> {
        let (writer, reader) = pipe(self.transfer.pipe_capacity, self.transfer.chunk_size);
        let options = PackOptions {
            compression: self.compression,
            level: self.level,
            cancel: Some(cancel.clone()),
        };
        let patterns = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        let worker = spawn_pack_worker(patterns, options, writer)?;

        tracing::debug!(host = %redact(url), "uploading archive");
        let sent = self.put(url, reader);
        let cancelled_by_caller = cancel.is_cancelled();
        if sent.is_err() {
            // Unblock the worker; it may be mid-file.
            cancel.cancel();
        }
        let packed = worker.join();

        let summary = merge_outcomes(packed, sent, cancelled_by_caller)?;
        tracing::info!(
            entries = summary.entries,
            bytes = summary.bytes,
            host = %redact(url),
            "backup uploaded"
        );
        Ok(summary)
    }

    fn put(&self, url: &str, body: PipeReader) -> Result<()> {
        let resp = self
            .agent
            .put(url)
            .set("Content-Type", content_type(self.compression))
            .send(body)?;
        let status = resp.status();
        io::copy(&mut resp.into_reader(), &mut io::sink())?;
        if !(200..300).contains(&status) {
            return Err(ConfsyncError::HttpStatus { status });
        }
        Ok(())
    }
}

fn content_type(compression: Compression) -> &'static str {
    match compression {
        Compression::None => "application/x-tar",
        Compression::Gzip => "application/gzip",
        Compression::Zstd => "application/zstd",
    }
}

/// Folds the worker's and the HTTP leg's results into one.
///
/// A real pack failure outranks the HTTP error it caused. A worker that only
/// saw its pipe close, or was cancelled because the HTTP leg failed, defers to
/// the HTTP error.
fn merge_outcomes(
    packed: Result<PackSummary>,
    sent: Result<()>,
    cancelled_by_caller: bool,
) -> Result<PackSummary> {
    match (packed, sent) {
        (Ok(summary), Ok(())) => Ok(summary),
        (Ok(_), Err(http)) => Err(http),
        (Err(pack), Ok(())) => Err(pack),
        (Err(ConfsyncError::Cancelled), Err(http)) => {
            if cancelled_by_caller {
                Err(ConfsyncError::Cancelled)
            } else {
                Err(http)
            }
        }
        (Err(pack), Err(http)) => {
            if pack.is_broken_pipe() {
                Err(http)
            } else {
                Err(pack)
            }
        }
    }
}
