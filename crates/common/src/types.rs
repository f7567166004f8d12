//! Small enumerations shared across crates

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How domain control is proven to the certificate authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeType {
    /// Proof file published under a running web server's document root
    #[default]
    Webroot,
    /// Temporary HTTP listener bound by the tool itself
    Standalone,
    /// TXT record at `_acme-challenge.<domain>`
    Dns,
}

impl ChallengeType {
    /// Whether this challenge can prove control of a wildcard name
    pub fn supports_wildcard(self) -> bool {
        matches!(self, ChallengeType::Dns)
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeType::Webroot => write!(f, "webroot"),
            ChallengeType::Standalone => write!(f, "standalone"),
            ChallengeType::Dns => write!(f, "dns"),
        }
    }
}

/// Web server that receives the issued certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebServerKind {
    Nginx,
    Apache,
    Iis,
}

impl WebServerKind {
    /// Conventional default for the host OS
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            WebServerKind::Iis
        } else {
            WebServerKind::Nginx
        }
    }
}

impl Default for WebServerKind {
    fn default() -> Self {
        Self::platform_default()
    }
}

impl fmt::Display for WebServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebServerKind::Nginx => write!(f, "nginx"),
            WebServerKind::Apache => write!(f, "apache"),
            WebServerKind::Iis => write!(f, "iis"),
        }
    }
}

impl FromStr for WebServerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nginx" => Ok(WebServerKind::Nginx),
            "apache" | "apache2" | "httpd" => Ok(WebServerKind::Apache),
            "iis" => Ok(WebServerKind::Iis),
            other => Err(format!("Unsupported web server type: {}", other)),
        }
    }
}
