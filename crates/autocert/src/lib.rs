//! AutoCert Library
//!
//! Issues, renews and deploys TLS certificates for one or more domains, then
//! wires them into the host's web server and schedules periodic renewal.
//!
//! This library provides:
//!
//! - **Certificate lifecycle**: challenge selection, key and request
//!   generation, issuance through a pluggable authority, on-disk storage
//! - **Web-server configuration**: Nginx site generation, test and reload
//! - **Renewal scheduling**: systemd timers, crontab, Windows Task Scheduler
//! - **Backup**: tar.gz export and import of the certificate store
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use autocert::acme::{manager_for, CertificateStore, ManagerContext, ManagerOptions, SelfSignedAuthority};
//! use autocert::command::SystemCommandRunner;
//! use autocert::webserver::configurator_for;
//! use autocert_common::{ChallengeType, DomainSet, WebServerKind};
//!
//! let config = autocert_config::Config::load(None)?;
//! let domains = DomainSet::new(["example.com", "www.example.com"])?;
//! let ctx = ManagerContext::new(
//!     CertificateStore::new(&config.cert_dir),
//!     Arc::new(SelfSignedAuthority::new()),
//!     configurator_for(WebServerKind::Nginx, Arc::new(SystemCommandRunner), None),
//! );
//! let options = ManagerOptions::from_config(&config, ChallengeType::Webroot, None);
//! manager_for(domains, options, ctx)?.install().await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod backup;
pub mod command;
pub mod logging;
pub mod scheduler;
pub mod system;
pub mod webserver;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Certificate lifecycle
pub use acme::{
    manager_for, CertificateAuthority, CertificateInfo, CertificateLifecycle, CertificateStore,
    ManagerContext, ManagerError, ManagerOptions, RenewOutcome, SelfSignedAuthority,
};

// Host integration
pub use command::{CommandRunner, SystemCommandRunner};
pub use scheduler::{native_scheduler, RenewalTask, TaskScheduler};
pub use webserver::{configurator_for, Configurator};

// Backup
pub use backup::{BackupManager, ExportOptions, ImportOptions};
