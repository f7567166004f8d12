//! Nginx configurator
//!
//! Renders an HTTP->HTTPS redirect block plus an HTTPS server block per
//! domain, writes it as a site file and enables it.
//!
//! # Layout
//!
//! ```text
//! POSIX                                   Windows
//! /etc/nginx/sites-available/<domain>     <nginx conf dir>/conf.d/<domain>.conf
//! /etc/nginx/sites-enabled/<domain> ->    (no link)
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use autocert_common::{WebServerKind, WILDCARD_PREFIX};

use super::{
    display_list, probe, run_checked, to_paths, Configurator, WebServerConfig, WebServerError,
};
use crate::command::CommandRunner;

/// Where nginx configuration lives on this host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NginxLayout {
    /// Main config files probed in order
    pub config_candidates: Vec<PathBuf>,
    /// Explicit main config file; skips probing
    pub config_path: Option<PathBuf>,
    /// Directory for site files; `None` means `conf.d` beside the main config
    pub sites_available: Option<PathBuf>,
    /// Directory that receives a symlink per enabled site
    pub sites_enabled: Option<PathBuf>,
    /// Extra directories scanned by `is_ssl_enabled`
    pub search_dirs: Vec<PathBuf>,
}

impl NginxLayout {
    /// Debian-style layout used on Linux and other Unix hosts
    pub fn posix() -> Self {
        Self {
            config_candidates: to_paths(&[
                "/etc/nginx/nginx.conf",
                "/usr/local/nginx/conf/nginx.conf",
                "/usr/local/etc/nginx/nginx.conf",
            ]),
            config_path: None,
            sites_available: Some(PathBuf::from("/etc/nginx/sites-available")),
            sites_enabled: Some(PathBuf::from("/etc/nginx/sites-enabled")),
            search_dirs: to_paths(&["/etc/nginx/sites-enabled", "/etc/nginx/conf.d"]),
        }
    }

    /// Windows layout: site files go to `conf.d` next to `nginx.conf`
    pub fn windows() -> Self {
        Self {
            config_candidates: to_paths(&[
                r"C:\nginx\conf\nginx.conf",
                r"C:\Program Files\nginx\conf\nginx.conf",
            ]),
            config_path: None,
            sites_available: None,
            sites_enabled: None,
            search_dirs: Vec::new(),
        }
    }

    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self::windows()
        } else {
            Self::posix()
        }
    }

    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Main config file: the explicit path, else the first candidate found
    fn resolve_config(&self) -> Option<PathBuf> {
        self.config_path
            .clone()
            .or_else(|| probe(&self.config_candidates))
    }

    fn conf_d(config: &Path) -> PathBuf {
        config
            .parent()
            .map(|dir| dir.join("conf.d"))
            .unwrap_or_else(|| PathBuf::from("conf.d"))
    }

    /// Site file for `domain` given the resolved main config
    fn site_file(&self, config: &Path, domain: &str) -> PathBuf {
        let name = site_name(domain);
        match &self.sites_available {
            Some(dir) => dir.join(name),
            None => Self::conf_d(config).join(format!("{}.conf", name)),
        }
    }

    fn scan_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = self.search_dirs.clone();
        if self.sites_available.is_none() {
            if let Some(config) = self.resolve_config() {
                dirs.push(Self::conf_d(&config));
            }
        }
        dirs
    }
}

/// File name for a domain's site; `*.example.com` becomes `wildcard.example.com`
pub fn site_name(domain: &str) -> String {
    match domain.strip_prefix(WILDCARD_PREFIX) {
        Some(base) => format!("wildcard.{}", base),
        None => domain.to_string(),
    }
}

/// Render the server blocks for one domain
pub fn render_site(config: &WebServerConfig) -> String {
    let domain = &config.domain;
    let cert = config.cert_path.display();
    let key = config.key_path.display();
    let root = config.web_root.display();

    format!(
        r#"# Generated by AutoCert
server {{
    listen 80;
    server_name {domain};

    # Redirect HTTP to HTTPS
    return 301 https://$server_name$request_uri;
}}

server {{
    listen 443 ssl http2;
    server_name {domain};

    ssl_certificate {cert};
    ssl_certificate_key {key};

    ssl_protocols TLSv1.2 TLSv1.3;
    ssl_prefer_server_ciphers on;
    ssl_ciphers ECDHE-RSA-AES256-GCM-SHA384:ECDHE-RSA-AES128-GCM-SHA256:ECDHE-RSA-AES256-SHA384:ECDHE-RSA-AES128-SHA256;
    ssl_session_cache shared:SSL:10m;
    ssl_session_timeout 10m;

    root {root};
    index index.html index.htm index.php;

    location / {{
        try_files $uri $uri/ =404;
    }}

    location ^~ /.well-known/acme-challenge/ {{
        default_type "text/plain";
        root {root};
    }}
}}
"#
    )
}

/// Scan one config file for a server block with both a certificate
/// directive and a `server_name` line naming `domain`
///
/// Line-based: a line containing `server {` opens a block and the next line
/// containing `}` closes it, so a nested `location { }` ends the block early.
/// Comments are not recognised.
pub fn file_has_ssl_for(content: &str, domain: &str) -> bool {
    let mut in_server = false;
    let mut has_ssl = false;
    let mut has_domain = false;

    for line in content.lines().map(str::trim) {
        if line.contains("server {") {
            in_server = true;
            has_ssl = false;
            has_domain = false;
        } else if line.contains('}') && in_server {
            if has_ssl && has_domain {
                return true;
            }
            in_server = false;
        } else if in_server {
            if line.contains("ssl_certificate") {
                has_ssl = true;
            }
            if line.contains("server_name") && line.contains(domain) {
                has_domain = true;
            }
        }
    }

    false
}

/// Nginx configurator
pub struct NginxConfigurator {
    runner: Arc<dyn CommandRunner>,
    layout: NginxLayout,
}

impl NginxConfigurator {
    pub fn new(runner: Arc<dyn CommandRunner>, layout: NginxLayout) -> Self {
        Self { runner, layout }
    }

    pub fn layout(&self) -> &NginxLayout {
        &self.layout
    }

    fn write_site(&self, config_file: &Path, config: &WebServerConfig) -> Result<PathBuf, WebServerError> {
        let site = self.layout.site_file(config_file, &config.domain);

        if let Some(parent) = site.parent() {
            fs::create_dir_all(parent).map_err(|e| WebServerError::io(parent, e))?;
        }

        fs::write(&site, render_site(config)).map_err(|e| WebServerError::io(&site, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&site, fs::Permissions::from_mode(0o644))
                .map_err(|e| WebServerError::io(&site, e))?;
        }

        info!(path = %site.display(), domain = %config.domain, "Wrote nginx site configuration");
        Ok(site)
    }

    fn enable_site(&self, site: &Path) -> Result<(), WebServerError> {
        let Some(enabled_dir) = &self.layout.sites_enabled else {
            trace!("Layout has no sites-enabled directory, nothing to link");
            return Ok(());
        };

        fs::create_dir_all(enabled_dir).map_err(|e| WebServerError::io(enabled_dir, e))?;

        let Some(name) = site.file_name() else {
            return Ok(());
        };
        let link = enabled_dir.join(name);

        // Replace any previous link of the same name
        if fs::symlink_metadata(&link).is_ok() {
            fs::remove_file(&link).map_err(|e| WebServerError::io(&link, e))?;
        }

        #[cfg(unix)]
        std::os::unix::fs::symlink(site, &link).map_err(|e| WebServerError::io(&link, e))?;

        #[cfg(not(unix))]
        fs::copy(site, &link).map_err(|e| WebServerError::io(&link, e))?;

        info!(link = %link.display(), "Enabled nginx site");
        Ok(())
    }
}

impl Configurator for NginxConfigurator {
    fn kind(&self) -> WebServerKind {
        WebServerKind::Nginx
    }

    fn configure(&self, config: &WebServerConfig) -> Result<(), WebServerError> {
        info!(domain = %config.domain, "Configuring nginx");

        let config_file = config
            .config_path
            .clone()
            .or_else(|| self.layout.resolve_config())
            .ok_or_else(|| WebServerError::ConfigNotFound {
                server: "nginx".to_string(),
                searched: display_list(&self.layout.config_candidates),
            })?;
        debug!(config = %config_file.display(), "Using nginx main configuration");

        let site = self.write_site(&config_file, config)?;
        self.enable_site(&site)
    }

    fn test(&self) -> Result<(), WebServerError> {
        run_checked(self.runner.as_ref(), "nginx", &["-t"], WebServerError::TestFailed)?;
        info!("nginx configuration test passed");
        Ok(())
    }

    fn reload(&self) -> Result<(), WebServerError> {
        if !cfg!(windows) && self.runner.exists("systemctl") {
            run_checked(
                self.runner.as_ref(),
                "systemctl",
                &["reload", "nginx"],
                WebServerError::ReloadFailed,
            )?;
        } else {
            run_checked(
                self.runner.as_ref(),
                "nginx",
                &["-s", "reload"],
                WebServerError::ReloadFailed,
            )?;
        }
        info!("nginx reloaded");
        Ok(())
    }

    fn config_path(&self) -> Option<PathBuf> {
        self.layout.resolve_config()
    }

    fn is_ssl_enabled(&self, domain: &str) -> bool {
        let dirs = self.layout.scan_dirs();
        if dirs.is_empty() {
            warn!("No nginx site directories to scan");
        }

        for dir in dirs {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };

            for entry in entries.flatten() {
                let path = entry.path();
                let content = match fs::read_to_string(&path) {
                    Ok(c) => c,
                    Err(e) => {
                        trace!(path = %path.display(), error = %e, "Skipping unreadable site file");
                        continue;
                    }
                };

                if file_has_ssl_for(&content, domain) {
                    debug!(domain = %domain, path = %path.display(), "Found SSL server block");
                    return true;
                }
            }
        }

        false
    }
}
