//! AutoCert configuration
//!
//! One [`Config`] value is built at process start and handed by reference to
//! every manager, configurator and scheduler. There is no global instance.
//!
//! # Sources
//!
//! In order of precedence (highest last):
//!
//! 1. Built-in defaults, chosen per host OS
//! 2. A configuration file: the explicit `--config` path, or the first of
//!    `$HOME/.autocert.yaml` and `./.autocert.yaml` that exists
//! 3. `AUTOCERT_*` environment variables
//!
//! # Example
//!
//! ```yaml
//! cert_dir: /etc/autocert/certs
//! log_level: debug
//! acme:
//!   email: admin@example.com
//!   key_size: 4096
//! webserver:
//!   type: nginx
//!   webroot: /srv/www
//! renewal:
//!   threshold_days: 21
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, trace};
use validator::{Validate, ValidateEmail};

pub use autocert_common::WebServerKind;

pub mod defaults;
mod env;

pub use env::EnvOverrides;

use defaults::*;

/// File name searched for in the home and working directories
pub const CONFIG_FILE_NAME: &str = ".autocert.yaml";

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid environment override: {0}")]
    Environment(String),

    #[error("Configuration validation failed: {0}")]
    Validation(String),

    #[error("A contact email is required: pass --email or set acme.email")]
    MissingEmail,
}

/// How a [`Config`] was assembled
///
/// `load` runs before the subscriber is installed, so it records what it
/// did here and [`Config::log_sources`] emits it afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Conventional locations probed when no `--config` was given
    pub searched: Vec<PathBuf>,
    /// `AUTOCERT_*` variables that replaced a file or default value
    pub overridden: Vec<&'static str>,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// ACME account and key settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AcmeConfig {
    /// Directory URL of the certificate authority
    #[serde(default = "default_acme_server")]
    #[validate(length(min = 1, message = "ACME server URL must not be empty"))]
    pub server: String,

    /// Contact address bound to the ACME account
    #[serde(default)]
    #[validate(email(message = "ACME contact email is not a valid address"))]
    pub email: Option<String>,

    /// Key algorithm; only `rsa` is supported
    #[serde(default = "default_key_type")]
    pub key_type: String,

    /// RSA modulus size in bits
    #[serde(default = "default_key_size")]
    #[validate(range(min = 2048, max = 4096, message = "key_size must be 2048, 3072 or 4096"))]
    pub key_size: u32,

    /// Upper bound on a single certificate authority exchange
    #[serde(default = "default_ca_timeout_secs")]
    #[validate(range(min = 1, message = "ca_timeout_secs must be positive"))]
    pub ca_timeout_secs: u64,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            server: default_acme_server(),
            email: None,
            key_type: default_key_type(),
            key_size: default_key_size(),
            ca_timeout_secs: default_ca_timeout_secs(),
        }
    }
}

/// Web server integration settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WebServerConfig {
    /// Web server to configure when no CLI flag picks one
    #[serde(rename = "type", default)]
    pub kind: WebServerKind,

    /// Main configuration file; probed from conventional paths when unset
    #[serde(default)]
    pub config_path: Option<PathBuf>,

    /// Document root written into generated server blocks
    #[serde(default = "default_webroot")]
    pub webroot: PathBuf,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            kind: WebServerKind::platform_default(),
            config_path: None,
            webroot: default_webroot(),
        }
    }
}

/// Renewal policy and scheduled task settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RenewalConfig {
    /// Renew when fewer than this many days of validity remain
    #[serde(default = "default_threshold_days")]
    #[validate(range(min = 1, max = 89, message = "threshold_days must be between 1 and 89"))]
    pub threshold_days: i64,

    /// Name of the scheduled renewal task
    #[serde(default = "default_task_name")]
    #[validate(length(min = 1, message = "task_name must not be empty"))]
    pub task_name: String,

    /// Cron expression for the renewal task
    #[serde(default = "default_schedule")]
    #[validate(length(min = 1, message = "schedule must not be empty"))]
    pub schedule: String,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            threshold_days: default_threshold_days(),
            task_name: default_task_name(),
            schedule: default_schedule(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Append logs to this file instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Root of the certificate store
    #[serde(default = "default_cert_dir")]
    pub cert_dir: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default)]
    #[validate(nested)]
    pub acme: AcmeConfig,

    #[serde(default)]
    #[validate(nested)]
    pub webserver: WebServerConfig,

    #[serde(default)]
    #[validate(nested)]
    pub renewal: RenewalConfig,

    /// File this configuration was read from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,

    #[serde(skip)]
    pub report: LoadReport,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            log_file: None,
            config_dir: default_config_dir(),
            cert_dir: default_cert_dir(),
            log_dir: default_log_dir(),
            acme: AcmeConfig::default(),
            webserver: WebServerConfig::default(),
            renewal: RenewalConfig::default(),
            source: None,
            report: LoadReport::default(),
        }
    }
}

impl Config {
    /// Load configuration from all sources and validate it
    ///
    /// `explicit` is the `--config` argument. When it is given the file must
    /// exist; otherwise the conventional locations are searched and a
    /// missing file just means defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut searched = Vec::new();
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let (found, probed) = Self::discover();
                searched = probed;
                match found {
                    Some(path) => Self::from_file(&path)?,
                    None => Self::default(),
                }
            }
        };

        let overrides = EnvOverrides::from_env()?;
        config.report = LoadReport {
            searched,
            overridden: overrides.names(),
        };
        config.apply_overrides(overrides);
        config.check()?;

        Ok(config)
    }

    /// Emit what `load` did; call once logging is initialised
    pub fn log_sources(&self) {
        for path in &self.report.searched {
            trace!(path = %path.display(), "Probed configuration file");
        }

        match &self.source {
            Some(path) => info!(path = %path.display(), "Loaded configuration file"),
            None => info!(
                searched = self.report.searched.len(),
                "No configuration file found, using defaults"
            ),
        }

        if !self.report.overridden.is_empty() {
            debug!(variables = ?self.report.overridden, "Applied environment overrides");
        }
    }

    /// Contact email for the ACME account: the flag, else `acme.email`
    pub fn contact_email(&self, flag: Option<&str>) -> Result<String, ConfigError> {
        let email = flag
            .map(str::to_string)
            .or_else(|| self.acme.email.clone())
            .filter(|e| !e.trim().is_empty())
            .ok_or(ConfigError::MissingEmail)?;

        if !email.validate_email() {
            return Err(ConfigError::Validation(format!(
                "'{}' is not a valid email address",
                email
            )));
        }
        Ok(email)
    }

    /// Parse a configuration file without applying environment overrides
    ///
    /// `.toml` files are read as TOML, everything else as YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let mut config = if is_toml {
            Self::from_toml_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
        .map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;

        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    fn from_yaml_str(content: &str) -> Result<Self, String> {
        // An empty YAML document deserializes as unit, not as an empty map
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| e.to_string())
    }

    fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// First existing file among the conventional locations, and every
    /// location probed on the way
    fn discover() -> (Option<PathBuf>, Vec<PathBuf>) {
        let mut candidates = Vec::new();
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(CONFIG_FILE_NAME));
        }
        candidates.push(PathBuf::from(".").join(CONFIG_FILE_NAME));

        let mut probed = Vec::new();
        for path in candidates {
            probed.push(path.clone());
            if path.is_file() {
                return (Some(path), probed);
            }
        }
        (None, probed)
    }

    /// Apply environment overrides on top of file values
    pub fn apply_overrides(&mut self, overrides: EnvOverrides) {
        if let Some(dir) = overrides.cert_dir {
            self.cert_dir = dir;
        }
        if let Some(dir) = overrides.config_dir {
            self.config_dir = dir;
        }
        if let Some(level) = overrides.log_level {
            self.log_level = level;
        }
        if let Some(email) = overrides.email {
            self.acme.email = Some(email);
        }
        if let Some(webroot) = overrides.webroot {
            self.webserver.webroot = webroot;
        }
    }

    /// Validate field ranges and cross-field rules
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if !self.acme.key_type.eq_ignore_ascii_case("rsa") {
            return Err(ConfigError::Validation(format!(
                "acme.key_type '{}' is not supported (only 'rsa')",
                self.acme.key_type
            )));
        }

        if !SUPPORTED_KEY_SIZES.contains(&self.acme.key_size) {
            return Err(ConfigError::Validation(format!(
                "acme.key_size {} is not supported (expected one of {:?})",
                self.acme.key_size, SUPPORTED_KEY_SIZES
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.check().is_ok());
        assert_eq!(config.acme.key_size, 2048);
        assert_eq!(config.renewal.threshold_days, 30);
        assert_eq!(config.renewal.task_name, "autocert-renew");
    }

    #[test]
    fn test_yaml_file() {
        let file = write_temp(
            ".yaml",
            r#"
cert_dir: /tmp/certs
log_format: json
acme:
  email: admin@example.com
  key_size: 4096
webserver:
  type: apache
  webroot: /srv/www
renewal:
  threshold_days: 14
"#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.cert_dir, PathBuf::from("/tmp/certs"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.acme.email.as_deref(), Some("admin@example.com"));
        assert_eq!(config.acme.key_size, 4096);
        assert_eq!(config.webserver.kind, WebServerKind::Apache);
        assert_eq!(config.webserver.webroot, PathBuf::from("/srv/www"));
        assert_eq!(config.renewal.threshold_days, 14);
        // Untouched sections keep their defaults
        assert_eq!(config.renewal.schedule, DEFAULT_SCHEDULE);
        assert_eq!(config.source.as_deref(), Some(file.path()));
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_toml_file() {
        let file = write_temp(
            ".toml",
            r#"
log_level = "debug"

[acme]
key_size = 3072
"#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.acme.key_size, 3072);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let file = write_temp(".yaml", "\n");
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.acme.key_size, DEFAULT_KEY_SIZE);
    }

    #[test]
    fn test_parse_error_names_file() {
        let file = write_temp(".yaml", "acme: [not, a, map]");
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/nonexistent/autocert.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_unsupported_key_size() {
        let mut config = Config::default();
        config.acme.key_size = 2500;
        assert!(matches!(config.check(), Err(ConfigError::Validation(_))));

        config.acme.key_size = 1024;
        assert!(matches!(config.check(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_invalid_email() {
        let mut config = Config::default();
        config.acme.email = Some("not-an-email".to_string());
        assert!(matches!(config.check(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_unsupported_key_type() {
        let mut config = Config::default();
        config.acme.key_type = "ecdsa".to_string();
        assert!(matches!(config.check(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut config = Config::default();
        let overrides = EnvOverrides::from_iter(vec![
            ("AUTOCERT_CERT_DIR".to_string(), "/override/certs".to_string()),
            ("AUTOCERT_EMAIL".to_string(), "ops@example.org".to_string()),
            ("UNRELATED".to_string(), "ignored".to_string()),
        ])
        .unwrap();

        config.apply_overrides(overrides);
        assert_eq!(config.cert_dir, PathBuf::from("/override/certs"));
        assert_eq!(config.acme.email.as_deref(), Some("ops@example.org"));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_contact_email_prefers_flag() {
        let mut config = Config::default();
        config.acme.email = Some("ops@example.org".to_string());

        assert_eq!(
            config.contact_email(Some("admin@example.com")).unwrap(),
            "admin@example.com"
        );
        assert_eq!(config.contact_email(None).unwrap(), "ops@example.org");
    }

    #[test]
    fn test_contact_email_required() {
        let config = Config::default();
        assert!(matches!(config.contact_email(None), Err(ConfigError::MissingEmail)));
        assert!(matches!(config.contact_email(Some("  ")), Err(ConfigError::MissingEmail)));
        assert!(matches!(
            config.contact_email(Some("not-an-email")),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_explicit_file_skips_discovery() {
        let file = write_temp(".yaml", "log_level: warn\n");
        let config = Config::load(Some(file.path())).unwrap();
        assert!(config.report.searched.is_empty());
        assert_eq!(config.source.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_discover_probes_working_directory_last() {
        let (_, probed) = Config::discover();
        assert_eq!(
            probed.last(),
            Some(&PathBuf::from(".").join(CONFIG_FILE_NAME))
        );
    }
}
