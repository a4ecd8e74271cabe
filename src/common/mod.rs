//! Common types shared by the packer and the unpacker.

use std::borrow::Cow;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

/// A regular file as observed on disk at pack time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
    /// Raw `st_mode`, file-type bits included.
    pub mode: u32,
    pub modified_time: u64, // Unix timestamp
}

impl FileEntry {
    /// Captures an entry from metadata taken on an open handle.
    pub fn from_metadata(path: PathBuf, meta: &Metadata) -> Self {
        let modified_time = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            path,
            size: meta.len(),
            mode: raw_mode(meta),
            modified_time,
        }
    }
}

#[cfg(unix)]
fn raw_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn raw_mode(meta: &Metadata) -> u32 {
    // S_IFREG plus rw for everyone, read-only drops the write bits.
    if meta.permissions().readonly() {
        0o100444
    } else {
        0o100666
    }
}

/// Raw bytes of a path, as stored in an archive header.
#[cfg(unix)]
pub fn path_to_bytes(path: &Path) -> io::Result<Cow<'_, [u8]>> {
    use std::os::unix::ffi::OsStrExt;
    Ok(Cow::Borrowed(path.as_os_str().as_bytes()))
}

#[cfg(not(unix))]
pub fn path_to_bytes(path: &Path) -> io::Result<Cow<'_, [u8]>> {
    path.to_str()
        .map(|s| Cow::Borrowed(s.as_bytes()))
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path is not valid unicode: {}", path.display()),
            )
        })
}

/// Inverse of [`path_to_bytes`].
#[cfg(unix)]
pub fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
pub fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}
