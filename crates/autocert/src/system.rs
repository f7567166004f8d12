//! Host environment detection
//!
//! Reports the operating system, whether we run with administrative
//! privileges and which web servers are installed. The `detect` command
//! prints this, and `install` uses it to pick a web server when none was
//! requested explicitly.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use autocert_common::WebServerKind;

use crate::command::CommandRunner;
use crate::webserver::configurator_for;

const OS_RELEASE: &str = "/etc/os-release";

/// Release files consulted when `/etc/os-release` is missing
const RELEASE_FILES: &[(&str, &str)] = &[
    ("/etc/centos-release", "centos"),
    ("/etc/redhat-release", "rhel"),
    ("/etc/debian_version", "debian"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OsInfo {
    /// `linux`, `windows`, `macos`, ...
    pub os_type: String,
    pub distribution: String,
    pub version: String,
    pub architecture: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebServerInfo {
    pub kind: WebServerKind,
    pub version: Option<String>,
    pub config_path: Option<PathBuf>,
    pub running: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    pub os: OsInfo,
    pub is_admin: bool,
    pub web_servers: Vec<WebServerInfo>,
}

impl SystemInfo {
    /// First detected web server, preferring one that is running
    pub fn preferred_web_server(&self) -> Option<WebServerKind> {
        self.web_servers
            .iter()
            .find(|s| s.running)
            .or_else(|| self.web_servers.first())
            .map(|s| s.kind)
    }
}

/// Inspect the current host
pub fn detect(runner: Arc<dyn CommandRunner>) -> SystemInfo {
    let windows = cfg!(windows);
    let info = SystemInfo {
        os: detect_os(runner.as_ref(), windows),
        is_admin: is_admin(runner.as_ref()),
        web_servers: detect_web_servers(runner, windows),
    };
    debug!(info = ?info, "Detected system");
    info
}

// ============================================================================
// Operating system
// ============================================================================

fn detect_os(runner: &dyn CommandRunner, windows: bool) -> OsInfo {
    let (distribution, version) = if windows {
        let caption = runner
            .run(
                "powershell",
                &[
                    "-NoProfile",
                    "-Command",
                    "(Get-CimInstance Win32_OperatingSystem).Caption",
                ],
                None,
            )
            .ok()
            .filter(|o| o.success)
            .map(|o| o.stdout.trim().to_string())
            .filter(|s| !s.is_empty());
        ("windows".to_string(), caption.unwrap_or_else(unknown))
    } else {
        linux_distribution(Path::new(OS_RELEASE))
    };

    OsInfo {
        os_type: std::env::consts::OS.to_string(),
        distribution,
        version,
        architecture: std::env::consts::ARCH.to_string(),
    }
}

fn unknown() -> String {
    "unknown".to_string()
}

fn linux_distribution(os_release: &Path) -> (String, String) {
    if let Ok(content) = fs::read_to_string(os_release) {
        let (id, version) = parse_os_release(&content);
        return (id.unwrap_or_else(unknown), version.unwrap_or_else(unknown));
    }

    for (file, distribution) in RELEASE_FILES {
        if let Ok(content) = fs::read_to_string(file) {
            return (distribution.to_string(), content.trim().to_string());
        }
    }

    (unknown(), unknown())
}

/// `ID` and `VERSION_ID` from an os-release file
pub fn parse_os_release(content: &str) -> (Option<String>, Option<String>) {
    let mut id = None;
    let mut version = None;

    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            "ID" => id = Some(value),
            "VERSION_ID" => version = Some(value),
            _ => {}
        }
    }

    (id, version)
}

/// Whether the process runs as root / Administrator
pub fn is_admin(runner: &dyn CommandRunner) -> bool {
    if cfg!(windows) {
        // `net session` only succeeds in an elevated shell
        return runner
            .run("net", &["session"], None)
            .map(|o| o.success)
            .unwrap_or(false);
    }
    effective_root()
}

#[cfg(unix)]
fn effective_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn effective_root() -> bool {
    false
}

// ============================================================================
// Web servers
// ============================================================================

fn detect_web_servers(runner: Arc<dyn CommandRunner>, windows: bool) -> Vec<WebServerInfo> {
    let mut servers = Vec::new();

    if runner.exists("nginx") {
        servers.push(probe(&runner, WebServerKind::Nginx, "nginx", windows));
    }

    if !windows {
        if let Some(binary) = ["apache2", "httpd"].into_iter().find(|b| runner.exists(b)) {
            servers.push(probe(&runner, WebServerKind::Apache, binary, windows));
        }
    }

    if windows && runner.exists("iisreset") {
        servers.push(probe(&runner, WebServerKind::Iis, "iisreset", windows));
    }

    servers
}

fn probe(
    runner: &Arc<dyn CommandRunner>,
    kind: WebServerKind,
    binary: &str,
    windows: bool,
) -> WebServerInfo {
    let version = match kind {
        WebServerKind::Iis => None,
        _ => runner
            .run(binary, &["-v"], None)
            .ok()
            .filter(|o| o.success)
            .and_then(|o| o.combined().lines().next().map(|l| l.trim().to_string()))
            .filter(|l| !l.is_empty()),
    };

    let service = match kind {
        WebServerKind::Iis => "W3SVC",
        _ => binary,
    };

    WebServerInfo {
        kind,
        version,
        config_path: configurator_for(kind, runner.clone(), None).config_path(),
        running: service_running(runner.as_ref(), service, windows),
    }
}

fn service_running(runner: &dyn CommandRunner, service: &str, windows: bool) -> bool {
    if windows {
        return runner
            .run("sc", &["query", service], None)
            .map(|o| o.success && o.stdout.contains("RUNNING"))
            .unwrap_or(false);
    }

    runner
        .run("systemctl", &["is-active", service], None)
        .map(|o| o.success && o.stdout.trim() == "active")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::FakeRunner;
    use crate::command::CommandOutput;

    #[test]
    fn test_parse_os_release() {
        let content = r#"PRETTY_NAME="Ubuntu 24.04.1 LTS"
NAME="Ubuntu"
VERSION_ID="24.04"
ID=ubuntu
ID_LIKE=debian
"#;
        let (id, version) = parse_os_release(content);
        assert_eq!(id.as_deref(), Some("ubuntu"));
        assert_eq!(version.as_deref(), Some("24.04"));
    }

    #[test]
    fn test_linux_distribution_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("os-release");
        fs::write(&path, "ID=debian\nVERSION_ID=\"12\"\n").unwrap();
        assert_eq!(
            linux_distribution(&path),
            ("debian".to_string(), "12".to_string())
        );
    }

    #[test]
    fn test_detects_nginx_version_and_state() {
        let runner: Arc<dyn CommandRunner> = Arc::new(
            FakeRunner::new()
                .with_program("nginx")
                .respond(
                    "nginx -v",
                    CommandOutput {
                        success: true,
                        stdout: String::new(),
                        stderr: "nginx version: nginx/1.24.0\n".to_string(),
                    },
                )
                .respond("systemctl is-active", CommandOutput::ok("active\n")),
        );

        let servers = detect_web_servers(runner, false);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].kind, WebServerKind::Nginx);
        assert_eq!(servers[0].version.as_deref(), Some("nginx version: nginx/1.24.0"));
        assert!(servers[0].running);
    }

    #[test]
    fn test_detects_httpd_when_apache2_missing() {
        let runner: Arc<dyn CommandRunner> = Arc::new(
            FakeRunner::new()
                .with_program("httpd")
                .respond("systemctl is-active", CommandOutput::failed("inactive")),
        );

        let servers = detect_web_servers(runner, false);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].kind, WebServerKind::Apache);
        assert!(!servers[0].running);
    }

    #[test]
    fn test_iis_only_on_windows() {
        let runner: Arc<dyn CommandRunner> = Arc::new(
            FakeRunner::new()
                .with_program("iisreset")
                .respond("sc query", CommandOutput::ok("STATE : 4 RUNNING")),
        );
        assert!(detect_web_servers(runner.clone(), false).is_empty());

        let servers = detect_web_servers(runner, true);
        assert_eq!(servers[0].kind, WebServerKind::Iis);
        assert!(servers[0].running);
    }

    #[test]
    fn test_preferred_web_server() {
        let os = OsInfo {
            os_type: "linux".to_string(),
            distribution: "debian".to_string(),
            version: "12".to_string(),
            architecture: "x86_64".to_string(),
        };
        let server = |kind, running| WebServerInfo {
            kind,
            version: None,
            config_path: None,
            running,
        };

        let info = SystemInfo {
            os: os.clone(),
            is_admin: false,
            web_servers: vec![
                server(WebServerKind::Nginx, false),
                server(WebServerKind::Apache, true),
            ],
        };
        assert_eq!(info.preferred_web_server(), Some(WebServerKind::Apache));

        let none = SystemInfo {
            os,
            is_admin: false,
            web_servers: Vec::new(),
        };
        assert_eq!(none.preferred_web_server(), None);
    }
}
