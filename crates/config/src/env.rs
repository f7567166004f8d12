//! `AUTOCERT_*` environment overrides

use serde::Deserialize;
use std::path::PathBuf;

use crate::ConfigError;

const ENV_PREFIX: &str = "AUTOCERT_";

/// Values read from `AUTOCERT_*` variables; unset variables stay `None`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvOverrides {
    pub cert_dir: Option<PathBuf>,
    pub config_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub email: Option<String>,
    pub webroot: Option<PathBuf>,
}

impl EnvOverrides {
    /// Read overrides from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        envy::prefixed(ENV_PREFIX)
            .from_env()
            .map_err(|e| ConfigError::Environment(e.to_string()))
    }

    /// Read overrides from an explicit set of variables
    pub fn from_iter<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .map_err(|e| ConfigError::Environment(e.to_string()))
    }

    /// Variable names of the overrides that are set
    pub fn names(&self) -> Vec<&'static str> {
        [
            (self.cert_dir.is_some(), "AUTOCERT_CERT_DIR"),
            (self.config_dir.is_some(), "AUTOCERT_CONFIG_DIR"),
            (self.log_level.is_some(), "AUTOCERT_LOG_LEVEL"),
            (self.email.is_some(), "AUTOCERT_EMAIL"),
            (self.webroot.is_some(), "AUTOCERT_WEBROOT"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.cert_dir.is_none()
            && self.config_dir.is_none()
            && self.log_level.is_none()
            && self.email.is_none()
            && self.webroot.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_variables() {
        let overrides = EnvOverrides::from_iter(Vec::new()).unwrap();
        assert!(overrides.is_empty());
    }

    #[test]
    fn test_prefixed_variables() {
        let overrides = EnvOverrides::from_iter(vec![
            ("AUTOCERT_LOG_LEVEL".to_string(), "debug".to_string()),
            ("AUTOCERT_WEBROOT".to_string(), "/srv/www".to_string()),
            ("LOG_LEVEL".to_string(), "trace".to_string()),
        ])
        .unwrap();

        assert_eq!(overrides.log_level.as_deref(), Some("debug"));
        assert_eq!(overrides.webroot, Some(PathBuf::from("/srv/www")));
        assert!(overrides.cert_dir.is_none());
    }

    #[test]
    fn test_names_of_set_overrides() {
        let overrides = EnvOverrides::from_iter(vec![
            ("AUTOCERT_EMAIL".to_string(), "ops@example.org".to_string()),
            ("AUTOCERT_CERT_DIR".to_string(), "/srv/certs".to_string()),
        ])
        .unwrap();
        assert_eq!(overrides.names(), vec!["AUTOCERT_CERT_DIR", "AUTOCERT_EMAIL"]);
        assert!(EnvOverrides::default().names().is_empty());
    }
}
