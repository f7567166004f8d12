//! Single- and multi-domain certificate managers
//!
//! Both managers run the same install pipeline:
//!
//! ```text
//! DirectoryReady -> KeyGenerated -> RequestCreated -> CertificateObtained
//!     -> Persisted -> WebServerConfigured
//! ```
//!
//! A failing stage aborts with [`ManagerError::Stage`]. Files written by
//! earlier stages stay on disk; every stage overwrites in place, so running
//! `install` again is the retry.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use autocert_common::{is_wildcard, ChallengeType, DomainError, DomainSet};
use autocert_config::Config;

use super::authority::{CertificateAuthority, ObtainRequest};
use super::error::{ManagerError, Stage, StageFailure};
use super::keys::{create_request, generate_key};
use super::storage::{CertificateInfo, CertificatePaths, CertificateStore};
use crate::webserver::{Configurator, WebServerConfig};

/// Per-invocation settings
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub email: Option<String>,
    pub challenge: ChallengeType,
    /// Document root for the webroot challenge and generated sites
    pub webroot: PathBuf,
    pub key_size: u32,
    /// Renew when this many days or fewer remain
    pub renew_threshold_days: i64,
    /// Upper bound on the certificate authority call
    pub ca_timeout: Duration,
    /// Renew regardless of remaining validity
    pub force_renew: bool,
}

impl ManagerOptions {
    /// Options from configuration plus the command line's challenge choice
    ///
    /// `webroot` (from `--webroot`) wins over the configured document root.
    pub fn from_config(config: &Config, challenge: ChallengeType, webroot: Option<PathBuf>) -> Self {
        Self {
            email: config.acme.email.clone(),
            challenge,
            webroot: webroot.unwrap_or_else(|| config.webserver.webroot.clone()),
            key_size: config.acme.key_size,
            renew_threshold_days: config.renewal.threshold_days,
            ca_timeout: Duration::from_secs(config.acme.ca_timeout_secs),
            force_renew: false,
        }
    }

    pub fn with_force_renew(mut self, force: bool) -> Self {
        self.force_renew = force;
        self
    }
}

/// Collaborators shared by the managers of one process
#[derive(Clone)]
pub struct ManagerContext {
    pub store: CertificateStore,
    pub authority: Arc<dyn CertificateAuthority>,
    pub configurator: Arc<dyn Configurator>,
    /// Cancels an in-flight certificate authority call
    pub cancel: CancellationToken,
}

impl ManagerContext {
    pub fn new(
        store: CertificateStore,
        authority: Arc<dyn CertificateAuthority>,
        configurator: Arc<dyn Configurator>,
    ) -> Self {
        Self {
            store,
            authority,
            configurator,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of a renewal check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewOutcome {
    /// More than the threshold remains; nothing was done
    NotDue { expires: DateTime<Utc> },
    /// The full install flow ran again
    Renewed { expires: DateTime<Utc> },
}

/// Install, renew and inspect the certificate for one domain set
#[async_trait]
pub trait CertificateLifecycle: Send + Sync {
    fn domains(&self) -> &DomainSet;

    /// Issue, persist and deploy a certificate
    async fn install(&self) -> Result<CertificatePaths, ManagerError>;

    /// Re-issue when the stored certificate is close to expiry
    async fn renew(&self) -> Result<RenewOutcome, ManagerError>;

    /// Inspect the stored leaf certificate
    fn cert_info(&self) -> Result<CertificateInfo, ManagerError>;
}

/// Pipeline shared by both managers
struct Pipeline {
    domains: DomainSet,
    options: ManagerOptions,
    ctx: ManagerContext,
}

impl Pipeline {
    async fn install(&self) -> Result<CertificatePaths, ManagerError> {
        let domains = &self.domains;
        let store = &self.ctx.store;
        info!(
            domains = %domains,
            challenge = %self.options.challenge,
            "Installing certificate"
        );

        let paths = store
            .ensure_dir(domains)
            .map_err(|e| ManagerError::at(Stage::DirectoryReady, e))?;

        // The key is on disk before the request leaves the process
        let csr_der = {
            let key = generate_key(self.options.key_size)
                .map_err(|e| ManagerError::at(Stage::KeyGenerated, e))?;
            store
                .save_key(domains, &key.serialize_pem())
                .map_err(|e| ManagerError::at(Stage::KeyGenerated, e))?;

            create_request(domains, &key)
                .map_err(|e| ManagerError::at(Stage::RequestCreated, e))?
        };

        let chain = self.obtain(csr_der).await?;

        store
            .save_certificate(domains, &chain)
            .and_then(|_| store.save_domains_list(domains))
            .map_err(|e| ManagerError::at(Stage::Persisted, e))?;

        self.configure_web_server(&paths)?;

        info!(domains = %domains, dir = %paths.dir.display(), "Certificate installed");
        Ok(paths)
    }

    /// Call the authority, bounded by the timeout and the cancellation token
    async fn obtain(&self, csr_der: Vec<u8>) -> Result<Vec<u8>, ManagerError> {
        let request = ObtainRequest {
            csr_der,
            challenge: self.options.challenge,
            domains: self.domains.clone(),
            account_email: self.options.email.clone(),
            webroot: Some(self.options.webroot.clone()),
        };
        let timeout = self.options.ca_timeout;

        debug!(
            authority = %self.ctx.authority.name(),
            timeout_secs = timeout.as_secs(),
            "Requesting certificate"
        );

        let result = tokio::select! {
            _ = self.ctx.cancel.cancelled() => {
                warn!(domains = %self.domains, "Certificate request cancelled");
                return Err(ManagerError::at(Stage::CertificateObtained, StageFailure::Cancelled));
            }
            r = tokio::time::timeout(timeout, self.ctx.authority.obtain(&request)) => r,
        };

        match result {
            Ok(Ok(chain)) => Ok(chain),
            Ok(Err(e)) => Err(ManagerError::at(Stage::CertificateObtained, e)),
            Err(_) => Err(ManagerError::at(
                Stage::CertificateObtained,
                StageFailure::Timeout(timeout),
            )),
        }
    }

    fn configure_web_server(&self, paths: &CertificatePaths) -> Result<(), ManagerError> {
        let configurator = &self.ctx.configurator;
        let config_path = configurator.config_path();

        for domain in self.domains.iter() {
            let site = WebServerConfig {
                kind: configurator.kind(),
                domain: domain.to_string(),
                cert_path: paths.cert.clone(),
                key_path: paths.key.clone(),
                config_path: config_path.clone(),
                web_root: self.options.webroot.clone(),
            };
            configurator
                .configure(&site)
                .map_err(|e| ManagerError::at(Stage::WebServerConfigured, e))?;
        }

        configurator
            .test()
            .and_then(|_| configurator.reload())
            .map_err(|e| ManagerError::at(Stage::WebServerConfigured, e))
    }

    async fn renew(&self) -> Result<RenewOutcome, ManagerError> {
        let info = self.cert_info()?;
        let remaining = info.expires - Utc::now();
        let threshold = chrono::Duration::days(self.options.renew_threshold_days);

        if remaining > threshold && !self.options.force_renew {
            info!(
                domains = %self.domains,
                expires = %info.expires,
                days_remaining = remaining.num_days(),
                "Certificate not due for renewal"
            );
            return Ok(RenewOutcome::NotDue {
                expires: info.expires,
            });
        }

        info!(
            domains = %self.domains,
            expires = %info.expires,
            forced = self.options.force_renew,
            "Renewing certificate"
        );
        self.install().await?;

        let renewed = self.cert_info()?;
        Ok(RenewOutcome::Renewed {
            expires: renewed.expires,
        })
    }

    fn cert_info(&self) -> Result<CertificateInfo, ManagerError> {
        self.ctx
            .store
            .cert_info(&self.domains)
            .map_err(ManagerError::Info)
    }
}

/// Manager for a certificate covering exactly one domain
pub struct SingleDomainManager {
    pipeline: Pipeline,
}

impl SingleDomainManager {
    pub fn new(
        domains: DomainSet,
        options: ManagerOptions,
        ctx: ManagerContext,
    ) -> Result<Self, ManagerError> {
        if domains.is_multi() {
            return Err(ManagerError::NotSingleDomain(domains.len()));
        }
        Ok(Self {
            pipeline: Pipeline {
                domains,
                options,
                ctx,
            },
        })
    }
}

#[async_trait]
impl CertificateLifecycle for SingleDomainManager {
    fn domains(&self) -> &DomainSet {
        &self.pipeline.domains
    }

    async fn install(&self) -> Result<CertificatePaths, ManagerError> {
        let domain = self.pipeline.domains.primary();
        let challenge = self.pipeline.options.challenge;
        if is_wildcard(domain) && challenge != ChallengeType::Dns {
            return Err(DomainError::WildcardRequiresDns {
                domain: domain.to_string(),
            }
            .into());
        }
        self.pipeline.install().await
    }

    async fn renew(&self) -> Result<RenewOutcome, ManagerError> {
        self.pipeline.renew().await
    }

    fn cert_info(&self) -> Result<CertificateInfo, ManagerError> {
        self.pipeline.cert_info()
    }
}

/// Manager for a SAN certificate covering several domains
///
/// Records the member list in `domains.txt` and re-checks the wildcard
/// constraint at install time, independent of challenge selection.
pub struct MultiDomainManager {
    pipeline: Pipeline,
}

impl MultiDomainManager {
    pub fn new(domains: DomainSet, options: ManagerOptions, ctx: ManagerContext) -> Self {
        Self {
            pipeline: Pipeline {
                domains,
                options,
                ctx,
            },
        }
    }

    fn check_wildcard_challenge(&self) -> Result<(), ManagerError> {
        let challenge = self.pipeline.options.challenge;
        if challenge == ChallengeType::Dns {
            return Ok(());
        }
        match self.pipeline.domains.first_wildcard() {
            Some(domain) => Err(ManagerError::WildcardChallengeMismatch {
                domain: domain.to_string(),
                challenge: challenge.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CertificateLifecycle for MultiDomainManager {
    fn domains(&self) -> &DomainSet {
        &self.pipeline.domains
    }

    async fn install(&self) -> Result<CertificatePaths, ManagerError> {
        self.check_wildcard_challenge()?;
        self.pipeline.install().await
    }

    async fn renew(&self) -> Result<RenewOutcome, ManagerError> {
        self.check_wildcard_challenge()?;
        self.pipeline.renew().await
    }

    fn cert_info(&self) -> Result<CertificateInfo, ManagerError> {
        self.pipeline.cert_info()
    }
}

/// Pick the manager matching the size of `domains`
pub fn manager_for(
    domains: DomainSet,
    options: ManagerOptions,
    ctx: ManagerContext,
) -> Result<Box<dyn CertificateLifecycle>, ManagerError> {
    if domains.is_multi() {
        Ok(Box::new(MultiDomainManager::new(domains, options, ctx)))
    } else {
        Ok(Box::new(SingleDomainManager::new(domains, options, ctx)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::authority::SelfSignedAuthority;
    use crate::acme::error::{AuthorityError, StorageError};
    use crate::webserver::WebServerError;
    use autocert_common::WebServerKind;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingConfigurator {
        configured: Mutex<Vec<String>>,
        fail_test: bool,
    }

    impl Configurator for RecordingConfigurator {
        fn kind(&self) -> WebServerKind {
            WebServerKind::Nginx
        }
        fn configure(&self, config: &WebServerConfig) -> Result<(), WebServerError> {
            self.configured.lock().unwrap().push(config.domain.clone());
            Ok(())
        }
        fn test(&self) -> Result<(), WebServerError> {
            if self.fail_test {
                Err(WebServerError::TestFailed("bad config".to_string()))
            } else {
                Ok(())
            }
        }
        fn reload(&self) -> Result<(), WebServerError> {
            Ok(())
        }
        fn config_path(&self) -> Option<PathBuf> {
            None
        }
        fn is_ssl_enabled(&self, _domain: &str) -> bool {
            false
        }
    }

    /// Authority that never answers
    struct StalledAuthority;

    #[async_trait]
    impl CertificateAuthority for StalledAuthority {
        fn name(&self) -> &str {
            "stalled"
        }
        async fn obtain(&self, _request: &ObtainRequest) -> Result<Vec<u8>, AuthorityError> {
            std::future::pending().await
        }
    }

    fn options(challenge: ChallengeType) -> ManagerOptions {
        ManagerOptions {
            email: Some("admin@example.com".to_string()),
            challenge,
            webroot: PathBuf::from("/var/www/html"),
            key_size: 2048,
            renew_threshold_days: 30,
            ca_timeout: Duration::from_secs(30),
            force_renew: false,
        }
    }

    fn context(
        tmp: &TempDir,
        authority: Arc<dyn CertificateAuthority>,
        configurator: Arc<dyn Configurator>,
    ) -> ManagerContext {
        ManagerContext::new(
            CertificateStore::new(tmp.path().join("certs")),
            authority,
            configurator,
        )
    }

    #[test]
    fn test_single_rejects_multiple_domains() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(
            &tmp,
            Arc::new(SelfSignedAuthority::new()),
            Arc::new(RecordingConfigurator::default()),
        );
        let domains = DomainSet::new(["a.com", "b.com"]).unwrap();
        assert!(matches!(
            SingleDomainManager::new(domains, options(ChallengeType::Dns), ctx),
            Err(ManagerError::NotSingleDomain(2))
        ));
    }

    #[tokio::test]
    async fn test_wildcard_webroot_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(
            &tmp,
            Arc::new(SelfSignedAuthority::new()),
            Arc::new(RecordingConfigurator::default()),
        );
        let manager = SingleDomainManager::new(
            DomainSet::single("*.example.com").unwrap(),
            options(ChallengeType::Webroot),
            ctx,
        )
        .unwrap();

        let err = manager.install().await.unwrap_err();
        assert!(matches!(
            err,
            ManagerError::Domain(DomainError::WildcardRequiresDns { .. })
        ));
        assert!(!tmp.path().join("certs").exists());
    }

    #[tokio::test]
    async fn test_multi_wildcard_mismatch() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(
            &tmp,
            Arc::new(SelfSignedAuthority::new()),
            Arc::new(RecordingConfigurator::default()),
        );
        let manager = MultiDomainManager::new(
            DomainSet::new(["example.com", "*.example.com"]).unwrap(),
            options(ChallengeType::Standalone),
            ctx,
        );

        let err = manager.install().await.unwrap_err();
        assert!(matches!(err, ManagerError::WildcardChallengeMismatch { .. }));
        assert!(!tmp.path().join("certs").exists());
    }

    #[tokio::test]
    async fn test_install_configures_every_domain() {
        let tmp = TempDir::new().unwrap();
        let configurator = Arc::new(RecordingConfigurator::default());
        let ctx = context(&tmp, Arc::new(SelfSignedAuthority::new()), configurator.clone());
        let manager = MultiDomainManager::new(
            DomainSet::new(["a.com", "b.com"]).unwrap(),
            options(ChallengeType::Dns),
            ctx,
        );

        let paths = manager.install().await.unwrap();
        assert!(paths.dir.ends_with("a.com_san"));
        assert_eq!(*configurator.configured.lock().unwrap(), vec!["a.com", "b.com"]);
    }

    #[tokio::test]
    async fn test_web_server_failure_aborts_after_persist() {
        let tmp = TempDir::new().unwrap();
        let configurator = Arc::new(RecordingConfigurator {
            fail_test: true,
            ..Default::default()
        });
        let ctx = context(&tmp, Arc::new(SelfSignedAuthority::new()), configurator);
        let manager = SingleDomainManager::new(
            DomainSet::single("example.com").unwrap(),
            options(ChallengeType::Webroot),
            ctx,
        )
        .unwrap();

        let err = manager.install().await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::WebServerConfigured));
        assert!(err.to_string().contains("Web server configuration failed"));
        // The certificate was already persisted
        assert!(manager.cert_info().unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_cancellation_keeps_key() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let ctx = context(
            &tmp,
            Arc::new(StalledAuthority),
            Arc::new(RecordingConfigurator::default()),
        )
        .with_cancellation(cancel.clone());
        let manager = SingleDomainManager::new(
            DomainSet::single("example.com").unwrap(),
            options(ChallengeType::Dns),
            ctx,
        )
        .unwrap();

        cancel.cancel();
        let err = manager.install().await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.stage(), Some(Stage::CertificateObtained));
        assert!(tmp.path().join("certs/example.com/key.pem").exists());
        assert!(!tmp.path().join("certs/example.com/cert.pem").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_authority_timeout() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(
            &tmp,
            Arc::new(StalledAuthority),
            Arc::new(RecordingConfigurator::default()),
        );
        let mut opts = options(ChallengeType::Dns);
        opts.ca_timeout = Duration::from_secs(5);
        let manager =
            SingleDomainManager::new(DomainSet::single("example.com").unwrap(), opts, ctx).unwrap();

        let err = manager.install().await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_renew_missing_certificate() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(
            &tmp,
            Arc::new(SelfSignedAuthority::new()),
            Arc::new(RecordingConfigurator::default()),
        );
        let manager = SingleDomainManager::new(
            DomainSet::single("example.com").unwrap(),
            options(ChallengeType::Webroot),
            ctx,
        )
        .unwrap();

        assert!(matches!(
            manager.renew().await,
            Err(ManagerError::Info(StorageError::CertificateNotFound { .. }))
        ));
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.acme.key_size = 4096;
        config.renewal.threshold_days = 14;

        let opts = ManagerOptions::from_config(&config, ChallengeType::Webroot, None);
        assert_eq!(opts.key_size, 4096);
        assert_eq!(opts.renew_threshold_days, 14);
        assert_eq!(opts.webroot, config.webserver.webroot);

        let opts = ManagerOptions::from_config(
            &config,
            ChallengeType::Webroot,
            Some(PathBuf::from("/srv/site")),
        );
        assert_eq!(opts.webroot, PathBuf::from("/srv/site"));
    }
}
