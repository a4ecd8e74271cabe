use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::presign::UrlError;

pub type Result<T> = std::result::Result<T, ConfsyncError>;

/// The primary error type for all operations in the `confsync` crate.
#[derive(Debug, Error)]
pub enum ConfsyncError {
    /// A glob pattern could not be compiled.
    #[error("invalid glob pattern '{pattern}': {source}")]
    Glob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// An I/O error on a specific file, during pack or unpack.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The archive stream itself failed (corrupt header, truncated body, closed pipe).
    #[error("archive stream error: {0}")]
    Stream(#[from] io::Error),

    /// The remote store answered with a status we do not accept.
    #[error("HTTP request failed with status {status}")]
    HttpStatus { status: u16 },

    /// The request never produced a status (DNS, connect, timeout, body error).
    #[error("HTTP transport error: {0}")]
    Transport(String),

    /// A pre-signed URL could not be interpreted.
    #[error(transparent)]
    Url(#[from] UrlError),

    /// An archive entry resolved outside the configured restore root.
    #[error("entry '{}' escapes restore root '{}'", path.display(), root.display())]
    UnsafePath { path: PathBuf, root: PathBuf },

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

impl ConfsyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ConfsyncError::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the error only reports that the other end of a pipe went away.
    pub(crate) fn is_broken_pipe(&self) -> bool {
        match self {
            ConfsyncError::Stream(e) | ConfsyncError::Io { source: e, .. } => {
                e.kind() == io::ErrorKind::BrokenPipe
            }
            _ => false,
        }
    }
}

impl From<ureq::Error> for ConfsyncError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, _) => ConfsyncError::HttpStatus { status },
            // Transport's Display embeds the request URL, which carries the signature.
            ureq::Error::Transport(t) => ConfsyncError::Transport(match t.message() {
                Some(msg) => format!("{}: {}", t.kind(), msg),
                None => t.kind().to_string(),
            }),
        }
    }
}
