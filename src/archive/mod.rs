//! # Tarball Packing
//!
//! Writes matched files into a tar stream, optionally wrapped in one compression
//! stage. Each entry's header carries the file's absolute path verbatim, its size,
//! its raw mode bits and its mtime. Nothing is normalized.
//!
//! The stream is produced strictly sequentially: header, content, next header. The
//! first failure aborts the whole pack.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tar::{EntryType, Header};

use crate::common::{path_to_bytes, FileEntry};
use crate::compress::{Compression, Encoder};
use crate::config::DEFAULT_LEVEL;
use crate::error::{ConfsyncError, Result};
use crate::glob;
use crate::workers::CancelToken;

/// Size of the classic tar name field.
const NAME_FIELD_LEN: usize = 100;
const GNU_LONGLINK_NAME: &[u8] = b"././@LongLink";

/// What one archive entry says about its file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    /// Path exactly as captured at backup time.
    pub name: PathBuf,
    pub size: u64,
    pub mode: u32,
    pub modified_time: u64,
}

impl From<&FileEntry> for ArchiveHeader {
    fn from(entry: &FileEntry) -> Self {
        Self {
            name: entry.path.clone(),
            size: entry.size,
            mode: entry.mode,
            modified_time: entry.modified_time,
        }
    }
}

/// Holds the options for one pack.
#[derive(Debug, Clone)]
pub struct PackOptions {
    pub compression: Compression,
    /// Codec level, used by gzip and zstd.
    pub level: i32,
    pub cancel: Option<CancelToken>,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            level: DEFAULT_LEVEL,
            cancel: None,
        }
    }
}

impl PackOptions {
    pub fn new(compression: Compression) -> Self {
        Self {
            compression,
            ..Self::default()
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Totals for a finished pack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackSummary {
    pub entries: usize,
    pub bytes: u64,
}

/// Resolves `patterns` and writes every matched regular file into `sink`.
pub fn pack<W: Write, S: AsRef<str>>(
    sink: W,
    patterns: &[S],
    options: &PackOptions,
) -> Result<PackSummary> {
    let files = glob::resolve(patterns)?;
    let mut writer = TarballWriter::new(sink, options.compression, options.level)?;
    if let Some(cancel) = &options.cancel {
        writer = writer.with_cancel(cancel.clone());
    }
    for path in &files {
        writer.append_file(path)?;
    }
    let (_, summary) = writer.finish()?;
    tracing::debug!(entries = summary.entries, bytes = summary.bytes, "tarball complete");
    Ok(summary)
}

/// A writer that appends files to a tar stream one at a time.
pub struct TarballWriter<W: Write> {
    builder: tar::Builder<Encoder<W>>,
    cancel: Option<CancelToken>,
    summary: PackSummary,
}

impl<W: Write> TarballWriter<W> {
    pub fn new(sink: W, compression: Compression, level: i32) -> Result<Self> {
        let encoder = compression.encoder(sink, level)?;
        Ok(Self {
            builder: tar::Builder::new(encoder),
            cancel: None,
            summary: PackSummary::default(),
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(c) if c.is_cancelled() => Err(ConfsyncError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Appends one file: header first, then its full content.
    ///
    /// The file handle is held only for the duration of this call.
    pub fn append_file(&mut self, path: &Path) -> Result<ArchiveHeader> {
        self.check_cancelled()?;
        tracing::debug!(path = %path.display(), "adding file");

        let file = File::open(path).map_err(|e| ConfsyncError::io(path, e))?;
        let meta = file.metadata().map_err(|e| ConfsyncError::io(path, e))?;
        let entry = FileEntry::from_metadata(path.to_path_buf(), &meta);
        let header = ArchiveHeader::from(&entry);

        let content = SizedReader {
            inner: file.take(header.size),
            remaining: header.size,
            cancel: self.cancel.as_ref(),
        };
        let res = append_entry(&mut self.builder, &header, content);
        if let Err(e) = res {
            self.check_cancelled()?;
            return Err(ConfsyncError::io(path, e));
        }

        self.summary.entries += 1;
        self.summary.bytes += header.size;
        Ok(header)
    }

    /// Writes the end-of-archive marker, completes compression and returns the sink.
    pub fn finish(self) -> Result<(W, PackSummary)> {
        let encoder = self.builder.into_inner()?;
        let sink = encoder.finish()?;
        Ok((sink, self.summary))
    }
}

fn append_entry<W: Write, R: Read>(
    builder: &mut tar::Builder<W>,
    header: &ArchiveHeader,
    content: R,
) -> io::Result<()> {
    let name = path_to_bytes(&header.name)?;

    let mut tar_header = Header::new_gnu();
    if name.len() >= NAME_FIELD_LEN {
        let mut long = Header::new_gnu();
        long.as_old_mut().name[..GNU_LONGLINK_NAME.len()].copy_from_slice(GNU_LONGLINK_NAME);
        long.set_entry_type(EntryType::GNULongName);
        long.set_mode(0o644);
        long.set_mtime(0);
        long.set_size(name.len() as u64 + 1);
        long.set_cksum();
        builder.append(&long, name.as_ref().chain(io::repeat(0).take(1)))?;
    }
    let short = &name[..name.len().min(NAME_FIELD_LEN)];
    tar_header.as_old_mut().name[..short.len()].copy_from_slice(short);
    tar_header.set_entry_type(EntryType::Regular);
    tar_header.set_size(header.size);
    tar_header.set_mode(header.mode);
    tar_header.set_mtime(header.modified_time);
    tar_header.set_cksum();
    builder.append(&tar_header, content)
}

/// Yields exactly `remaining` bytes or fails, so a file that shrinks between stat
/// and read cannot desynchronize the stream. Also the cancellation point for
/// large files.
struct SizedReader<'a, R> {
    inner: io::Take<R>,
    remaining: u64,
    cancel: Option<&'a CancelToken>,
}

impl<R: Read> Read for SizedReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(io::Error::new(io::ErrorKind::Other, "pack cancelled"));
        }
        let n = self.inner.read(buf)?;
        if n == 0 && self.remaining > 0 && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file shrank while packing, {} bytes missing", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}
