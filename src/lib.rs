//! # confsync Core Library
//!
//! Backs up and restores a user's configuration files as one tar stream exchanged
//! with a blob store through pre-signed URLs.
//!
//! Backup resolves glob patterns, packs the matching regular files and streams the
//! archive into an HTTP PUT while it is being produced. Restore streams an HTTP GET
//! straight into the unpacker. Neither direction holds the archive in memory.
//!
//! ## Key Modules
//!
//! - [`glob`]: Expands glob patterns (with `**`) to absolute file paths.
//! - [`archive`]: Packs files into a tar stream.
//! - [`extract`]: Unpacks a tar stream under a conflict and write-error policy.
//! - [`compress`]: The single container-format switch (plain, gzip, zstd).
//! - [`transfer`]: Streaming upload and download against pre-signed URLs.
//! - [`presign`]: Computes when a pre-signed URL expires, offline.
//! - [`workers`]: The background pack worker and its bounded pipe.
//!
//! ## Examples
//!
//! ```no_run
//! use confsync::{config::Config, transfer};
//!
//! let cfg = Config::default();
//! let url = "https://bucket.example.com/cfg?X-Amz-Date=20240101T000000Z&X-Amz-Expires=3600";
//! if confsync::presign::is_valid(url)? {
//!     transfer::backup(url, &["/home/u/.bashrc", "/home/u/.config/**/*.toml"], &cfg)?;
//! }
//! # Ok::<(), confsync::ConfsyncError>(())
//! ```

pub mod archive;
pub mod cli;
pub mod common;
pub mod compress;
pub mod config;
pub mod error;
pub mod extract;
pub mod glob;
pub mod presign;
pub mod transfer;
pub mod workers;

pub use error::{ConfsyncError, Result};
