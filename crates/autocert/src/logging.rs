//! Tracing subscriber setup
//!
//! Level precedence: `RUST_LOG`, then `--verbose` (debug), then the
//! configured `log_level`. Output goes to stderr unless `log_file` is set,
//! so command output on stdout stays clean.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::warn;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use autocert_config::{Config, LogFormat};

/// Filter directive used when `RUST_LOG` is unset
pub fn default_directive(config: &Config, verbose: bool) -> String {
    if verbose {
        "debug".to_string()
    } else {
        config.log_level.clone()
    }
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber
pub fn init(config: &Config, verbose: bool) -> Result<()> {
    let directive = default_directive(config, verbose);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let mut file_error = None;
    let (writer, ansi) = match &config.log_file {
        Some(path) => match open_log_file(path) {
            Ok(file) => (BoxMakeWriter::new(Mutex::new(file)), false),
            Err(e) => {
                file_error = Some((path.clone(), e));
                (BoxMakeWriter::new(std::io::stderr), true)
            }
        },
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.log_format {
        LogFormat::Text => fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(false)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .context("Failed to initialize logging")?;

    if let Some((path, error)) = file_error {
        warn!(
            path = %path.display(),
            error = %error,
            "Cannot open log file, logging to stderr"
        );
    }

    Ok(())
}
