//! Web-server configurators
//!
//! A [`Configurator`] wires a stored certificate into a web server: it
//! writes site configuration, checks it and asks the server to reload.
//!
//! - [`NginxConfigurator`] renders and enables a full HTTPS server block
//! - [`ApacheConfigurator`] and [`IisConfigurator`] only test and reload;
//!   their `configure` logs that SSL wiring is not implemented and changes
//!   nothing
//!
//! The concrete variant is chosen once with [`configurator_for`].

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use autocert_common::WebServerKind;

use crate::command::CommandRunner;

mod apache;
mod iis;
mod nginx;

pub use apache::ApacheConfigurator;
pub use iis::IisConfigurator;
pub use nginx::{NginxConfigurator, NginxLayout};

/// Errors from web-server configuration and control
#[derive(Debug, Error)]
pub enum WebServerError {
    /// The server's main configuration file was not found
    #[error("{server} configuration file not found (searched: {searched})")]
    ConfigNotFound { server: String, searched: String },

    /// Writing or linking a site file failed
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The server's configuration check rejected the configuration
    #[error("configuration test failed: {0}")]
    TestFailed(String),

    /// The reload command failed
    #[error("reload failed: {0}")]
    ReloadFailed(String),

    /// A control program could not be started
    #[error("failed to run {program}: {source}")]
    Command {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl WebServerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn command(program: &str, source: io::Error) -> Self {
        Self::Command {
            program: program.to_string(),
            source,
        }
    }
}

/// Parameters for configuring one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebServerConfig {
    pub kind: WebServerKind,
    pub domain: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Main configuration file of the server, when known
    pub config_path: Option<PathBuf>,
    /// Document root written into the site
    pub web_root: PathBuf,
}

/// Capability set shared by every web-server variant
pub trait Configurator: Send + Sync {
    fn kind(&self) -> WebServerKind;

    /// Write and enable SSL configuration for one domain
    fn configure(&self, config: &WebServerConfig) -> Result<(), WebServerError>;

    /// Run the server's configuration check
    fn test(&self) -> Result<(), WebServerError>;

    /// Ask the running server to pick up new configuration
    fn reload(&self) -> Result<(), WebServerError>;

    /// Main configuration file, if one was found
    fn config_path(&self) -> Option<PathBuf>;

    /// Whether any enabled site serves `domain` with a certificate
    fn is_ssl_enabled(&self, domain: &str) -> bool;
}

/// Build the configurator for `kind`
///
/// `config_override` replaces the probed main configuration file.
pub fn configurator_for(
    kind: WebServerKind,
    runner: Arc<dyn CommandRunner>,
    config_override: Option<PathBuf>,
) -> Arc<dyn Configurator> {
    match kind {
        WebServerKind::Nginx => {
            let mut layout = NginxLayout::platform_default();
            if let Some(path) = config_override {
                layout = layout.with_config_path(path);
            }
            Arc::new(NginxConfigurator::new(runner, layout))
        }
        WebServerKind::Apache => Arc::new(ApacheConfigurator::new(runner, config_override)),
        WebServerKind::Iis => Arc::new(IisConfigurator::new(runner, config_override)),
    }
}

/// First existing path among `candidates`
pub(crate) fn probe(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.is_file()).cloned()
}

pub(crate) fn display_list(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Run a control command, mapping a non-zero exit through `on_failure`
pub(crate) fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
    on_failure: fn(String) -> WebServerError,
) -> Result<(), WebServerError> {
    let output = runner
        .run(program, args, None)
        .map_err(|e| WebServerError::command(program, e))?;

    if output.success {
        Ok(())
    } else {
        Err(on_failure(output.combined()))
    }
}

pub(crate) fn to_paths(items: &[&str]) -> Vec<PathBuf> {
    items.iter().map(PathBuf::from).collect()
}
