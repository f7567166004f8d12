//! AutoCert - Main entry point
//!
//! Issues, renews and deploys TLS certificates and manages the renewal task.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use autocert::acme::{
    manager_for, CertificateInfo, CertificateStore, ManagerContext, ManagerOptions, RenewOutcome,
    SelfSignedAuthority,
};
use autocert::backup::{BackupFormat, BackupManager, ExportOptions, ImportOptions};
use autocert::command::{CommandRunner, SystemCommandRunner};
use autocert::scheduler::{native_scheduler, RenewalTask};
use autocert::webserver::{configurator_for, Configurator};
use autocert::{logging, system};
use autocert_common::{select_challenge, ChallengeFlags, ChallengeType, DomainSet, WebServerKind};
use autocert_config::Config;

/// AutoCert - automatic TLS certificate installation and renewal
#[derive(Parser, Debug)]
#[command(name = "autocert")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "AUTOCERT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Issue a certificate and configure the web server
    Install {
        #[command(flatten)]
        target: DomainArgs,

        /// Contact email for the ACME account (default: acme.email)
        #[arg(short = 'e', long = "email")]
        email: Option<String>,

        #[command(flatten)]
        challenge: ChallengeArgs,

        #[command(flatten)]
        server: ServerArgs,
    },
    /// Renew certificates that are close to expiry
    #[command(group(ArgGroup::new("renew_target").required(true).args(["domain", "domains", "all"])))]
    Renew {
        /// Renew the certificate of one domain
        #[arg(short = 'd', long = "domain")]
        domain: Option<String>,

        /// Renew a SAN certificate (comma separated)
        #[arg(long = "domains")]
        domains: Option<String>,

        /// Renew every stored certificate
        #[arg(long = "all")]
        all: bool,

        #[command(flatten)]
        challenge: ChallengeArgs,

        /// Renew even if the certificate is not due
        #[arg(long = "force")]
        force: bool,
    },
    /// Show details of a stored certificate
    Info {
        #[command(flatten)]
        target: DomainArgs,
    },
    /// List stored certificates
    List,
    /// Export certificates and configuration to an archive
    Export {
        /// Output file (default: autocert-backup-<timestamp>.tar.gz)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Archive format
        #[arg(short = 'f', long = "format", default_value = "tar.gz")]
        format: String,

        /// Export only this domain's certificate
        #[arg(short = 'd', long = "domain")]
        domain: Option<String>,
    },
    /// Import certificates and configuration from an archive
    Import {
        /// Archive written by `export`
        file: PathBuf,

        /// Reinstall the renewal task after importing
        #[arg(
            long = "restore-schedule",
            action = ArgAction::Set,
            default_value_t = true,
            value_name = "BOOL"
        )]
        restore_schedule: bool,
    },
    /// Manage the periodic renewal task
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// Show detected operating system and web servers
    Detect,
    /// Print version information
    Version,
}

#[derive(Subcommand, Debug)]
enum ScheduleAction {
    /// Install or replace the renewal task
    Install,
    /// Remove the renewal task
    Remove,
    /// List renewal tasks known to the host scheduler
    List,
    /// Show whether the renewal task is installed
    Status,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct DomainArgs {
    /// Single domain
    #[arg(short = 'd', long = "domain")]
    domain: Option<String>,

    /// Several domains sharing one certificate (comma separated)
    #[arg(long = "domains")]
    domains: Option<String>,
}

impl DomainArgs {
    fn domain_set(&self) -> Result<DomainSet> {
        domain_set(self.domain.as_deref(), self.domains.as_deref())
    }
}

/// Challenge mode flags; conflicts are reported by the selector
#[derive(Args, Debug, Default)]
struct ChallengeArgs {
    /// Prove control through a file under this document root
    #[arg(short = 'w', long = "webroot")]
    webroot: Option<PathBuf>,

    /// Prove control with a temporary listener on port 80
    #[arg(long = "standalone")]
    standalone: bool,

    /// Prove control with a DNS TXT record (required for wildcards)
    #[arg(long = "dns")]
    dns: bool,
}

impl ChallengeArgs {
    fn flags(&self) -> ChallengeFlags {
        ChallengeFlags {
            standalone: self.standalone,
            webroot: self.webroot.clone(),
            dns: self.dns,
        }
    }

    fn any(&self) -> bool {
        self.webroot.is_some() || self.standalone || self.dns
    }
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// Configure Nginx
    #[arg(long = "nginx")]
    nginx: bool,

    /// Configure Apache
    #[arg(long = "apache")]
    apache: bool,

    /// Configure IIS
    #[arg(long = "iis")]
    iis: bool,
}

impl ServerArgs {
    /// The web server named on the command line, if exactly one was
    fn selected(&self) -> Result<Option<WebServerKind>> {
        let selected: Vec<WebServerKind> = [
            (self.nginx, WebServerKind::Nginx),
            (self.apache, WebServerKind::Apache),
            (self.iis, WebServerKind::Iis),
        ]
        .into_iter()
        .filter_map(|(set, kind)| set.then_some(kind))
        .collect();

        match selected.as_slice() {
            [] => Ok(None),
            [kind] => Ok(Some(*kind)),
            _ => bail!("Only one of --nginx, --apache and --iis may be given"),
        }
    }
}

fn domain_set(domain: Option<&str>, domains: Option<&str>) -> Result<DomainSet> {
    let set = match (domain, domains) {
        (Some(domain), _) => DomainSet::single(domain)?,
        (None, Some(list)) => DomainSet::parse_list(list)?,
        (None, None) => bail!("Either --domain or --domains is required"),
    };
    Ok(set)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Version = cli.command {
        println!("autocert {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    logging::init(&config, cli.verbose)?;

    config.log_sources();

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
    let app = App {
        config,
        runner,
        cancel: CancellationToken::new(),
    };

    match cli.command {
        Commands::Install {
            target,
            email,
            challenge,
            server,
        } => app.block_on(app.install(target.domain_set()?, email, &challenge, &server)),
        Commands::Renew {
            domain,
            domains,
            all,
            challenge,
            force,
        } => {
            if all {
                app.block_on(app.renew_all(&challenge, force))
            } else {
                let set = domain_set(domain.as_deref(), domains.as_deref())?;
                app.block_on(app.renew(set, &challenge, force))
            }
        }
        Commands::Info { target } => app.info(&target.domain_set()?),
        Commands::List => app.list(),
        Commands::Export {
            output,
            format,
            domain,
        } => app.export(output, &format, domain),
        Commands::Import {
            file,
            restore_schedule,
        } => app.import(file, restore_schedule),
        Commands::Schedule { action } => app.schedule(action),
        Commands::Detect => app.detect(),
        Commands::Version => Ok(()),
    }
}

/// Everything built once per invocation
struct App {
    config: Config,
    runner: Arc<dyn CommandRunner>,
    /// Cancelled on Ctrl-C
    cancel: CancellationToken,
}

impl App {
    /// Run `future` on a current-thread runtime; Ctrl-C cancels in-flight work
    fn block_on<F>(&self, future: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start async runtime")?;

        let cancel = self.cancel.clone();
        runtime.block_on(async move {
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling");
                    cancel.cancel();
                }
            });
            future.await
        })
    }

    fn store(&self) -> CertificateStore {
        CertificateStore::new(&self.config.cert_dir)
    }

    fn configurator(&self, kind: WebServerKind) -> Arc<dyn Configurator> {
        configurator_for(
            kind,
            self.runner.clone(),
            self.config.webserver.config_path.clone(),
        )
    }

    fn context(&self, kind: WebServerKind) -> ManagerContext {
        ManagerContext::new(
            self.store(),
            Arc::new(SelfSignedAuthority::new()),
            self.configurator(kind),
        )
        .with_cancellation(self.cancel.clone())
    }

    /// Web server from the flags, the configuration file, or detection
    fn web_server(&self, server: &ServerArgs) -> Result<WebServerKind> {
        if let Some(kind) = server.selected()? {
            return Ok(kind);
        }
        if self.config.source.is_some() {
            return Ok(self.config.webserver.kind);
        }

        let detected = system::detect(self.runner.clone()).preferred_web_server();
        match detected {
            Some(kind) => {
                info!(server = %kind, "Using detected web server");
                Ok(kind)
            }
            None => Ok(self.config.webserver.kind),
        }
    }

    // ========================================================================
    // Certificate commands
    // ========================================================================

    async fn install(
        &self,
        domains: DomainSet,
        email: Option<String>,
        challenge: &ChallengeArgs,
        server: &ServerArgs,
    ) -> Result<()> {
        let challenge_type = select_challenge(&domains, &challenge.flags())?;
        let email = self.config.contact_email(email.as_deref())?;
        let kind = self.web_server(server)?;

        let mut options =
            ManagerOptions::from_config(&self.config, challenge_type, challenge.webroot.clone());
        options.email = Some(email);

        info!(
            domains = %domains,
            challenge = %challenge_type,
            server = %kind,
            "Installing certificate"
        );

        let manager = manager_for(domains, options, self.context(kind))?;
        let paths = manager.install().await?;

        println!("Certificate installed for {}", manager.domains());
        println!("  Certificate: {}", paths.cert.display());
        println!("  Private key: {}", paths.key.display());
        Ok(())
    }

    /// Challenge for renewing a stored set when no flag was given
    fn renew_challenge(domains: &DomainSet, challenge: &ChallengeArgs) -> Result<ChallengeType> {
        if challenge.any() {
            return Ok(select_challenge(domains, &challenge.flags())?);
        }
        Ok(if domains.has_wildcard() {
            ChallengeType::Dns
        } else {
            ChallengeType::Webroot
        })
    }

    async fn renew(&self, domains: DomainSet, challenge: &ChallengeArgs, force: bool) -> Result<()> {
        let challenge_type = Self::renew_challenge(&domains, challenge)?;
        let options =
            ManagerOptions::from_config(&self.config, challenge_type, challenge.webroot.clone())
                .with_force_renew(force);

        let manager = manager_for(domains, options, self.context(self.config.webserver.kind))?;
        match manager.renew().await? {
            RenewOutcome::NotDue { expires } => println!(
                "{}: not due for renewal (expires {})",
                manager.domains(),
                expires.format("%Y-%m-%d")
            ),
            RenewOutcome::Renewed { expires } => println!(
                "{}: renewed (expires {})",
                manager.domains(),
                expires.format("%Y-%m-%d")
            ),
        }
        Ok(())
    }

    async fn renew_all(&self, challenge: &ChallengeArgs, force: bool) -> Result<()> {
        let entries = self.store().list()?;
        if entries.is_empty() {
            println!("No certificates to renew");
            return Ok(());
        }

        let mut failed = Vec::new();
        for entry in entries {
            if let Err(e) = self.renew(entry.domains, challenge, force).await {
                error!(dir = %entry.dir_name, error = %format!("{:#}", e), "Renewal failed");
                failed.push(entry.dir_name);
            }
        }

        if !failed.is_empty() {
            bail!("Renewal failed for: {}", failed.join(", "));
        }
        Ok(())
    }

    fn info(&self, domains: &DomainSet) -> Result<()> {
        let info = self.store().cert_info(domains)?;
        print_info(&info);
        Ok(())
    }

    fn list(&self) -> Result<()> {
        let store = self.store();
        let entries = store.list()?;
        if entries.is_empty() {
            println!("No certificates in {}", store.root().display());
            return Ok(());
        }

        for entry in entries {
            match store.cert_info(&entry.domains) {
                Ok(info) => println!(
                    "{:<40} expires {}  ({} days)  {}",
                    entry.domains.to_string(),
                    info.expires.format("%Y-%m-%d"),
                    info.days_remaining(),
                    if info.is_valid { "valid" } else { "EXPIRED" }
                ),
                Err(e) => println!("{:<40} unreadable: {}", entry.dir_name, e),
            }
        }
        Ok(())
    }

    // ========================================================================
    // Backup commands
    // ========================================================================

    fn backup_manager(&self) -> Result<BackupManager> {
        let scheduler = native_scheduler(self.runner.clone());
        let mut manager = BackupManager::new(&self.config.cert_dir, &self.config.config_dir)
            .with_scheduler(Arc::from(scheduler), self.renewal_task()?);
        if let Some(source) = &self.config.source {
            manager = manager.with_user_config(source);
        }
        Ok(manager)
    }

    fn export(&self, output: Option<PathBuf>, format: &str, domain: Option<String>) -> Result<()> {
        let output = output.unwrap_or_else(|| {
            PathBuf::from(format!(
                "autocert-backup-{}.tar.gz",
                chrono::Local::now().format("%Y%m%d-%H%M%S")
            ))
        });
        let options = ExportOptions {
            output,
            format: format.parse::<BackupFormat>()?,
            domain,
        };

        let metadata = self.backup_manager()?.export(&options)?;
        println!(
            "Exported {} certificate(s) to {}",
            metadata.domains.len(),
            options.output.display()
        );
        Ok(())
    }

    fn import(&self, input: PathBuf, restore_schedule: bool) -> Result<()> {
        let report = self.backup_manager()?.import(&ImportOptions {
            input,
            restore_schedule,
        })?;

        println!(
            "Imported {} file(s), skipped {}",
            report.restored.len(),
            report.skipped
        );
        if report.schedule_restored {
            println!("Renewal task restored");
        }
        Ok(())
    }

    // ========================================================================
    // Scheduling and host
    // ========================================================================

    fn renewal_task(&self) -> Result<RenewalTask> {
        let exe = std::env::current_exe().context("Failed to locate the autocert executable")?;
        Ok(RenewalTask::from_config(
            &self.config,
            exe.to_string_lossy().into_owned(),
        ))
    }

    fn schedule(&self, action: ScheduleAction) -> Result<()> {
        let scheduler = native_scheduler(self.runner.clone());
        let task = self.renewal_task()?;

        match action {
            ScheduleAction::Install => {
                task.install(scheduler.as_ref())?;
                println!(
                    "Renewal task '{}' installed ({}, schedule {})",
                    task.name,
                    scheduler.backend(),
                    task.schedule
                );
            }
            ScheduleAction::Remove => {
                scheduler.remove(&task.name)?;
                println!("Renewal task '{}' removed", task.name);
            }
            ScheduleAction::List => {
                let tasks = scheduler.list()?;
                if tasks.is_empty() {
                    println!("No renewal tasks found ({})", scheduler.backend());
                }
                for t in tasks {
                    println!(
                        "{:<24} {:<10} next: {}  last: {}  {}",
                        t.name,
                        t.status,
                        or_dash(&t.next_run),
                        or_dash(&t.last_run),
                        t.command
                    );
                }
            }
            ScheduleAction::Status => {
                let state = if scheduler.is_installed(&task.name) {
                    "installed"
                } else {
                    "not installed"
                };
                println!("Renewal task '{}': {} ({})", task.name, state, scheduler.backend());
            }
        }
        Ok(())
    }

    fn detect(&self) -> Result<()> {
        let info = system::detect(self.runner.clone());

        println!(
            "OS:            {} {} {} ({})",
            info.os.os_type, info.os.distribution, info.os.version, info.os.architecture
        );
        println!("Administrator: {}", if info.is_admin { "yes" } else { "no" });

        if info.web_servers.is_empty() {
            println!("Web servers:   none detected");
        }
        for server in &info.web_servers {
            println!(
                "Web server:    {} {} config: {} {}",
                server.kind,
                server.version.as_deref().unwrap_or("(unknown version)"),
                server
                    .config_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "-".to_string()),
                if server.running { "running" } else { "stopped" }
            );
        }
        Ok(())
    }
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

fn print_info(info: &CertificateInfo) {
    println!("Domain:      {}", info.domain);
    println!("Issuer:      {}", info.issuer);
    println!(
        "Expires:     {} ({} days)",
        info.expires.format("%Y-%m-%d %H:%M:%S UTC"),
        info.days_remaining()
    );
    println!("Valid:       {}", if info.is_valid { "yes" } else { "no" });
    println!("Certificate: {}", info.cert_path.display());
    println!("Private key: {}", info.key_path.display());
    println!("Chain:       {}", info.chain_path.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_restores_schedule_by_default() {
        let cli = Cli::try_parse_from(["autocert", "import", "backup.tar.gz"]).unwrap();
        let Commands::Import { restore_schedule, .. } = cli.command else {
            panic!("expected import");
        };
        assert!(restore_schedule);

        let cli =
            Cli::try_parse_from(["autocert", "import", "backup.tar.gz", "--restore-schedule", "false"])
                .unwrap();
        let Commands::Import { restore_schedule, .. } = cli.command else {
            panic!("expected import");
        };
        assert!(!restore_schedule);
    }

    #[test]
    fn test_install_requires_one_domain_flag() {
        assert!(Cli::try_parse_from(["autocert", "install", "--email", "a@b.com"]).is_err());
        assert!(Cli::try_parse_from([
            "autocert", "install", "--domain", "a.com", "--domains", "a.com,b.com"
        ])
        .is_err());
    }

    #[test]
    fn test_install_without_email_fails_before_any_io() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.cert_dir = dir.path().join("certs");
        let app = App {
            config,
            runner: Arc::new(SystemCommandRunner),
            cancel: CancellationToken::new(),
        };

        let err = app
            .block_on(app.install(
                DomainSet::single("example.com").unwrap(),
                None,
                &ChallengeArgs::default(),
                &ServerArgs {
                    nginx: true,
                    apache: false,
                    iis: false,
                },
            ))
            .unwrap_err();

        assert!(err.to_string().contains("contact email is required"));
        assert!(!dir.path().join("certs").exists());
    }

    #[test]
    fn test_renew_challenge_defaults() {
        let plain = DomainSet::single("example.com").unwrap();
        let wildcard = DomainSet::single("*.example.com").unwrap();
        let none = ChallengeArgs::default();

        assert_eq!(App::renew_challenge(&plain, &none).unwrap(), ChallengeType::Webroot);
        assert_eq!(App::renew_challenge(&wildcard, &none).unwrap(), ChallengeType::Dns);
    }
}
