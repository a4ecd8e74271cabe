//! Main entry point for the confsync CLI app

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::process::ExitCode;

use confsync::archive::{self, PackOptions};
use confsync::cli::{self, Commands};
use confsync::config::Config;
use confsync::extract::{self, RestoreReport};
use confsync::presign::{self, UrlValidator};
use confsync::{transfer, ConfsyncError};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run_app() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_app() -> Result<ExitCode, ConfsyncError> {
    match cli::run() {
        Commands::Backup {
            url,
            patterns,
            common,
        } => {
            let url = cli::url_from_opt_or_env(url)?;
            let cfg = common.resolve_config()?;
            let summary = transfer::backup(&url, &patterns, &cfg)?;
            println!("uploaded {} files ({} bytes)", summary.entries, summary.bytes);
        }
        Commands::Restore {
            url,
            common,
            restore,
        } => {
            let url = cli::url_from_opt_or_env(url)?;
            let mut cfg = common.resolve_config()?;
            restore.apply(&mut cfg);
            let report = transfer::restore(&url, &cfg)?;
            return Ok(print_report(&report));
        }
        Commands::Pack {
            output,
            patterns,
            common,
        } => {
            let cfg = common.resolve_config()?;
            let file = File::create(&output).map_err(|e| ConfsyncError::Io {
                path: output.clone(),
                source: e,
            })?;
            let mut options = PackOptions::new(cfg.compression);
            options.level = cfg.level;
            let summary = archive::pack(BufWriter::new(file), &patterns, &options)?;
            println!(
                "packed {} files ({} bytes) into {}",
                summary.entries,
                summary.bytes,
                output.display()
            );
        }
        Commands::Unpack {
            archive,
            common,
            restore,
        } => {
            let mut cfg = common.resolve_config()?;
            restore.apply(&mut cfg);
            let compression = match common.compression {
                Some(c) => c,
                None => cli::detect_compression(&archive)?,
            };
            let file = File::open(&archive).map_err(|e| ConfsyncError::Io {
                path: archive.clone(),
                source: e,
            })?;
            let stream = compression.decoder(BufReader::new(file))?;
            let report = extract::unpack(stream, &cfg.restore)?;
            return Ok(print_report(&report));
        }
        Commands::List {
            archive,
            compression,
        } => {
            let compression = match compression {
                Some(c) => c,
                None => cli::detect_compression(&archive)?,
            };
            let file = File::open(&archive).map_err(|e| ConfsyncError::Io {
                path: archive.clone(),
                source: e,
            })?;
            let headers = extract::list_entries(compression.decoder(BufReader::new(file))?)?;
            println!("Archive ({} files):", headers.len());
            for h in headers {
                println!("- {} ({} bytes, mode {:o})", h.name.display(), h.size, h.mode);
            }
        }
        Commands::CheckUrl {
            url,
            config,
            grace_secs,
        } => {
            let url = cli::url_from_opt_or_env(url)?;
            let cfg = match &config {
                Some(path) => Config::load(path)?,
                None => Config::default(),
            };
            let validator = match grace_secs {
                Some(secs) => UrlValidator::with_grace(std::time::Duration::from_secs(secs)),
                None => UrlValidator::from_config(&cfg),
            };
            let expiration = presign::parse_expiration(&url)?;
            let valid = validator.is_valid(&url)?;
            println!("expires at {}", expiration.to_rfc3339());
            if !valid {
                println!("stale");
                return Ok(ExitCode::FAILURE);
            }
            println!("valid");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &RestoreReport) -> ExitCode {
    println!(
        "restored {} files, skipped {}, failed {}",
        report.restored,
        report.skipped,
        report.failed.len()
    );
    for failure in &report.failed {
        eprintln!("warning: {}: {}", failure.path.display(), failure.error);
    }
    ExitCode::SUCCESS
}
