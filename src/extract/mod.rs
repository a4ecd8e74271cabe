//! # Extraction Module
//!
//! Restores an archive stream onto the filesystem, one entry at a time. Entry
//! names are used as target paths verbatim unless the caller confines the restore
//! to a root directory.
//!
//! Two kinds of failure are kept apart. A broken archive stream (bad header,
//! truncated content) always aborts. A failure to write one entry (cannot create a
//! directory, cannot open or write the file) follows the caller's write-error policy.
//!
//! File content is staged in a temporary file next to the target and renamed over
//! it only once the entry has been read in full, so an entry that fails halfway
//! leaves whatever was on disk before untouched.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use tar::EntryType;
use tempfile::NamedTempFile;

use crate::archive::ArchiveHeader;
use crate::common::bytes_to_path;
use crate::config::{ConflictPolicy, RestoreOptions, WriteErrorPolicy};
use crate::error::{ConfsyncError, Result};

const COPY_BUF_SIZE: usize = 64 * 1024;

/// An entry the restore gave up on under `log-and-continue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of a restore that did not abort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub skipped: usize,
    pub failed: Vec<EntryFailure>,
}

impl RestoreReport {
    /// True when every entry was either restored or deliberately skipped.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Outcome {
    Restored,
    Skipped,
}

enum EntryError {
    /// The archive stream failed; nothing after this point can be trusted.
    Stream(io::Error),
    /// Only this entry failed.
    Write(ConfsyncError),
}

/// Reads a decoded tar stream and restores each entry per `options`.
pub fn unpack<R: Read>(source: R, options: &RestoreOptions) -> Result<RestoreReport> {
    let mut archive = tar::Archive::new(source);
    let mut report = RestoreReport::default();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let header = read_header(&entry)?;
        let entry_type = entry.header().entry_type();

        let outcome = match entry_type {
            EntryType::Regular | EntryType::Continuous => {
                restore_file(&mut entry, &header, options)
            }
            EntryType::Directory => restore_dir(&header, options),
            other => {
                tracing::warn!(
                    path = %header.name.display(),
                    "skipping unsupported entry type {other:?}"
                );
                Ok(Outcome::Skipped)
            }
        };

        match outcome {
            Ok(Outcome::Restored) => report.restored += 1,
            Ok(Outcome::Skipped) => report.skipped += 1,
            Err(EntryError::Stream(e)) => return Err(ConfsyncError::Stream(e)),
            Err(EntryError::Write(e)) => match options.on_write_error {
                WriteErrorPolicy::Propagate => return Err(e),
                WriteErrorPolicy::LogAndContinue => {
                    tracing::warn!(path = %header.name.display(), "restoring failed: {e}");
                    report.failed.push(EntryFailure {
                        path: header.name.clone(),
                        error: e.to_string(),
                    });
                }
            },
        }
    }

    tracing::info!(
        restored = report.restored,
        skipped = report.skipped,
        failed = report.failed.len(),
        "restore finished"
    );
    Ok(report)
}

/// Lists the headers of a decoded tar stream without touching the filesystem.
pub fn list_entries<R: Read>(source: R) -> Result<Vec<ArchiveHeader>> {
    let mut archive = tar::Archive::new(source);
    let mut headers = Vec::new();
    for entry in archive.entries()? {
        headers.push(read_header(&entry?)?);
    }
    Ok(headers)
}

fn read_header<R: Read>(entry: &tar::Entry<'_, R>) -> Result<ArchiveHeader> {
    let h = entry.header();
    Ok(ArchiveHeader {
        name: bytes_to_path(&entry.path_bytes()),
        size: h.size()?,
        mode: h.mode()?,
        modified_time: h.mtime()?,
    })
}

/// Maps an entry name to the path it is restored to.
fn target_path(name: &Path, options: &RestoreOptions) -> Result<PathBuf> {
    let Some(root) = &options.confine_to else {
        return Ok(name.to_path_buf());
    };
    let root = normalize(root);
    let joined = if name.is_absolute() {
        name.to_path_buf()
    } else {
        root.join(name)
    };
    let target = normalize(&joined);
    if target.starts_with(&root) && target != root {
        Ok(target)
    } else {
        Err(ConfsyncError::UnsafePath {
            path: name.to_path_buf(),
            root,
        })
    }
}

/// Lexically resolves `.` and `..`; never touches the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn restore_dir(
    header: &ArchiveHeader,
    options: &RestoreOptions,
) -> std::result::Result<Outcome, EntryError> {
    let target = target_path(&header.name, options).map_err(EntryError::Write)?;
    fs::create_dir_all(&target).map_err(|e| EntryError::Write(ConfsyncError::io(&target, e)))?;
    Ok(Outcome::Restored)
}

fn restore_file<R: Read>(
    content: &mut R,
    header: &ArchiveHeader,
    options: &RestoreOptions,
) -> std::result::Result<Outcome, EntryError> {
    let target = target_path(&header.name, options).map_err(EntryError::Write)?;
    tracing::debug!(path = %target.display(), "restoring file");
    let write_err = |e: io::Error| EntryError::Write(ConfsyncError::io(&target, e));

    if options.conflict == ConflictPolicy::SkipIfExists && fs::symlink_metadata(&target).is_ok() {
        tracing::debug!(path = %target.display(), "skipping, already exists");
        return Ok(Outcome::Skipped);
    }

    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(write_err)?;

    let mut staged = NamedTempFile::new_in(parent).map_err(write_err)?;
    let written = copy_content(content, staged.as_file_mut(), &target)?;
    if written != header.size {
        return Err(EntryError::Stream(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("archive entry truncated: {written} of {} bytes", header.size),
        )));
    }
    staged.as_file_mut().flush().map_err(write_err)?;
    set_mode(staged.as_file(), header.mode).map_err(write_err)?;

    let persisted = match options.conflict {
        ConflictPolicy::Overwrite => staged.persist(&target),
        ConflictPolicy::SkipIfExists => staged.persist_noclobber(&target),
    };
    match persisted {
        Ok(_) => Ok(Outcome::Restored),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            tracing::debug!(path = %target.display(), "skipping, already exists");
            Ok(Outcome::Skipped)
        }
        Err(e) => Err(write_err(e.error)),
    }
}

/// Copies one entry's content, keeping stream failures apart from write failures.
fn copy_content<R: Read>(
    content: &mut R,
    file: &mut File,
    target: &Path,
) -> std::result::Result<u64, EntryError> {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut written = 0u64;
    loop {
        let n = match content.read(&mut buf) {
            Ok(0) => return Ok(written),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(EntryError::Stream(e)),
        };
        file.write_all(&buf[..n])
            .map_err(|e| EntryError::Write(ConfsyncError::io(target, e)))?;
        written += n as u64;
    }
}

#[cfg(unix)]
fn set_mode(file: &File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    // Permission bits only; type bits from the header mean nothing here.
    file.set_permissions(fs::Permissions::from_mode(mode & 0o777))
}

#[cfg(not(unix))]
fn set_mode(_file: &File, _mode: u32) -> io::Result<()> {
    Ok(())
}
