//! Apache configurator
//!
//! SSL virtual host generation is not implemented: `configure` logs a
//! warning and leaves the configuration untouched. Test and reload shell out
//! to the Apache control programs.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use autocert_common::WebServerKind;

use super::{probe, run_checked, to_paths, Configurator, WebServerConfig, WebServerError};
use crate::command::CommandRunner;

/// Conventional Apache main configuration files, probed in order
pub fn config_candidates() -> Vec<PathBuf> {
    to_paths(&[
        "/etc/apache2/apache2.conf",
        "/etc/httpd/conf/httpd.conf",
        "/usr/local/apache2/conf/httpd.conf",
    ])
}

pub struct ApacheConfigurator {
    runner: Arc<dyn CommandRunner>,
    config_path: Option<PathBuf>,
}

impl ApacheConfigurator {
    pub fn new(runner: Arc<dyn CommandRunner>, config_path: Option<PathBuf>) -> Self {
        Self {
            runner,
            config_path,
        }
    }
}

impl Configurator for ApacheConfigurator {
    fn kind(&self) -> WebServerKind {
        WebServerKind::Apache
    }

    fn configure(&self, config: &WebServerConfig) -> Result<(), WebServerError> {
        warn!(
            domain = %config.domain,
            cert = %config.cert_path.display(),
            "Apache SSL configuration is not implemented; add the certificate to the virtual host manually"
        );
        Ok(())
    }

    fn test(&self) -> Result<(), WebServerError> {
        let runner = self.runner.as_ref();
        if runner.exists("apache2ctl") {
            run_checked(runner, "apache2ctl", &["configtest"], WebServerError::TestFailed)?;
        } else {
            run_checked(runner, "httpd", &["-t"], WebServerError::TestFailed)?;
        }
        info!("Apache configuration test passed");
        Ok(())
    }

    fn reload(&self) -> Result<(), WebServerError> {
        let runner = self.runner.as_ref();
        if runner.exists("systemctl") {
            run_checked(
                runner,
                "systemctl",
                &["reload", "apache2"],
                WebServerError::ReloadFailed,
            )?;
        } else if runner.exists("apache2ctl") {
            run_checked(runner, "apache2ctl", &["graceful"], WebServerError::ReloadFailed)?;
        } else {
            run_checked(runner, "httpd", &["-k", "graceful"], WebServerError::ReloadFailed)?;
        }
        info!("Apache reloaded");
        Ok(())
    }

    fn config_path(&self) -> Option<PathBuf> {
        self.config_path
            .clone()
            .or_else(|| probe(&config_candidates()))
    }

    fn is_ssl_enabled(&self, _domain: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::FakeRunner;

    fn site() -> WebServerConfig {
        WebServerConfig {
            kind: WebServerKind::Apache,
            domain: "example.com".to_string(),
            cert_path: PathBuf::from("/certs/example.com/cert.pem"),
            key_path: PathBuf::from("/certs/example.com/key.pem"),
            config_path: None,
            web_root: PathBuf::from("/var/www/html"),
        }
    }

    #[test]
    fn test_configure_changes_nothing() {
        let runner = Arc::new(FakeRunner::new());
        let configurator = ApacheConfigurator::new(runner.clone(), None);
        configurator.configure(&site()).unwrap();
        assert!(runner.calls().is_empty());
        assert!(!configurator.is_ssl_enabled("example.com"));
    }

    #[test]
    fn test_command_fallbacks() {
        let runner = Arc::new(FakeRunner::new().with_program("apache2ctl"));
        let configurator = ApacheConfigurator::new(runner.clone(), None);
        configurator.test().unwrap();
        configurator.reload().unwrap();
        assert_eq!(
            runner.lines(),
            vec!["apache2ctl configtest", "apache2ctl graceful"]
        );

        let runner = Arc::new(FakeRunner::new().with_program("systemctl"));
        let configurator = ApacheConfigurator::new(runner.clone(), None);
        configurator.test().unwrap();
        configurator.reload().unwrap();
        assert_eq!(runner.lines(), vec!["httpd -t", "systemctl reload apache2"]);
    }

    #[test]
    fn test_explicit_config_path() {
        let configurator = ApacheConfigurator::new(
            Arc::new(FakeRunner::new()),
            Some(PathBuf::from("/opt/apache/httpd.conf")),
        );
        assert_eq!(
            configurator.config_path(),
            Some(PathBuf::from("/opt/apache/httpd.conf"))
        );
    }
}
