//! IIS configurator
//!
//! Certificate binding is not implemented: `configure` logs a warning and
//! changes nothing. IIS has no configuration check command, so `test` only
//! logs; `reload` runs `iisreset`.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use autocert_common::WebServerKind;

use super::{run_checked, Configurator, WebServerConfig, WebServerError};
use crate::command::CommandRunner;

pub const IIS_CONFIG_PATH: &str = r"C:\Windows\System32\inetsrv\config\applicationHost.config";

pub struct IisConfigurator {
    runner: Arc<dyn CommandRunner>,
    config_path: PathBuf,
}

impl IisConfigurator {
    pub fn new(runner: Arc<dyn CommandRunner>, config_path: Option<PathBuf>) -> Self {
        Self {
            runner,
            config_path: config_path.unwrap_or_else(|| PathBuf::from(IIS_CONFIG_PATH)),
        }
    }
}

impl Configurator for IisConfigurator {
    fn kind(&self) -> WebServerKind {
        WebServerKind::Iis
    }

    fn configure(&self, config: &WebServerConfig) -> Result<(), WebServerError> {
        warn!(
            domain = %config.domain,
            cert = %config.cert_path.display(),
            "IIS certificate binding is not implemented; bind the certificate in IIS Manager"
        );
        Ok(())
    }

    fn test(&self) -> Result<(), WebServerError> {
        info!("IIS has no configuration test; skipping");
        Ok(())
    }

    fn reload(&self) -> Result<(), WebServerError> {
        run_checked(
            self.runner.as_ref(),
            "iisreset",
            &[],
            WebServerError::ReloadFailed,
        )?;
        info!("IIS restarted");
        Ok(())
    }

    fn config_path(&self) -> Option<PathBuf> {
        Some(self.config_path.clone())
    }

    fn is_ssl_enabled(&self, _domain: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::FakeRunner;
    use crate::command::CommandOutput;

    #[test]
    fn test_reload_runs_iisreset() {
        let runner = Arc::new(FakeRunner::new());
        let configurator = IisConfigurator::new(runner.clone(), None);
        configurator.test().unwrap();
        configurator.reload().unwrap();
        assert_eq!(runner.lines(), vec!["iisreset"]);
        assert_eq!(
            configurator.config_path(),
            Some(PathBuf::from(IIS_CONFIG_PATH))
        );
    }

    #[test]
    fn test_reload_failure() {
        let runner = Arc::new(
            FakeRunner::new().respond("iisreset", CommandOutput::failed("Access denied")),
        );
        let configurator = IisConfigurator::new(runner, None);
        assert!(matches!(
            configurator.reload(),
            Err(WebServerError::ReloadFailed(ref m)) if m == "Access denied"
        ));
    }
}
