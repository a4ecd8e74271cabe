//! Background pack worker.
//!
//! An upload runs two sides at once: the pack worker writes the archive into a
//! bounded pipe while the calling thread streams the other end into an HTTP body.
//! The worker's outcome comes back through its join handle, and a failed pack also
//! poisons the pipe so the body can never be completed with a truncated archive.

pub mod pipe;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::archive::{self, PackOptions, PackSummary};
use crate::error::{ConfsyncError, Result};
use pipe::PipeWriter;

/// Cooperative cancellation flag shared between a caller and a worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Handle to a running pack worker.
pub struct PackWorker {
    handle: JoinHandle<Result<PackSummary>>,
}

/// Starts packing `patterns` into `writer` on a dedicated thread.
pub fn spawn_pack_worker(
    patterns: Vec<String>,
    options: PackOptions,
    writer: PipeWriter,
) -> Result<PackWorker> {
    let handle = thread::Builder::new()
        .name("confsync-pack".into())
        .spawn(move || run_pack(&patterns, &options, writer))?;
    Ok(PackWorker { handle })
}

fn run_pack(patterns: &[String], options: &PackOptions, mut writer: PipeWriter) -> Result<PackSummary> {
    match archive::pack(&mut writer, patterns, options) {
        Ok(summary) => {
            writer.close()?;
            Ok(summary)
        }
        Err(e) => {
            let kind = match &e {
                ConfsyncError::Io { source, .. } | ConfsyncError::Stream(source) => source.kind(),
                _ => io::ErrorKind::Other,
            };
            writer.abort(kind, e.to_string());
            Err(e)
        }
    }
}

impl PackWorker {
    /// Waits for the worker and returns what it produced.
    pub fn join(self) -> Result<PackSummary> {
        self.handle.join().unwrap_or_else(|_| {
            Err(ConfsyncError::Stream(io::Error::new(
                io::ErrorKind::Other,
                "pack worker panicked",
            )))
        })
    }
}
