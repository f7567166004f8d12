//! Certificate lifecycle error types

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use autocert_common::DomainError;

use crate::webserver::WebServerError;

/// Errors from key and certificate request generation
#[derive(Debug, Error)]
pub enum KeyError {
    /// RSA modulus size outside the supported set
    #[error("Unsupported RSA key size: {0} bits (expected 2048, 3072 or 4096)")]
    UnsupportedKeySize(u32),

    /// Key pair generation failed
    #[error("Failed to generate private key: {0}")]
    KeyGeneration(String),

    /// Building or signing the certificate request failed
    #[error("Failed to create certificate request: {0}")]
    Request(String),
}

/// Errors specific to certificate store operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error while touching a store path
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Leaf certificate file is absent
    #[error("Certificate not found: {path}")]
    CertificateNotFound { path: PathBuf },

    /// Leaf file holds no decodable PEM block
    #[error("Certificate unreadable at {path}: {message}")]
    CertificateUnreadable { path: PathBuf, message: String },

    /// PEM decoded but the DER payload is not a certificate
    #[error("Failed to parse certificate at {path}: {message}")]
    CertificateParse { path: PathBuf, message: String },

    /// The authority returned a chain with no certificate in it
    #[error("Issued chain contains no certificate")]
    EmptyChain,

    /// `domains.txt` or the directory name does not form a valid set
    #[error("Invalid stored domain list for '{dir}': {source}")]
    InvalidDomainList {
        dir: String,
        #[source]
        source: DomainError,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from a certificate authority exchange
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// The certificate request could not be decoded
    #[error("Invalid certificate request: {0}")]
    InvalidRequest(String),

    /// The authority refused or failed to issue
    #[error("Certificate issuance failed: {0}")]
    Issuance(String),
}

/// Lifecycle stage reached by an install
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DirectoryReady,
    KeyGenerated,
    RequestCreated,
    CertificateObtained,
    Persisted,
    WebServerConfigured,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Stage::DirectoryReady => "Certificate directory creation failed",
            Stage::KeyGenerated => "Private key generation failed",
            Stage::RequestCreated => "Certificate request creation failed",
            Stage::CertificateObtained => "Certificate acquisition failed",
            Stage::Persisted => "Certificate persistence failed",
            Stage::WebServerConfigured => "Web server configuration failed",
        };
        f.write_str(text)
    }
}

/// Cause of a stage failure
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error(transparent)]
    WebServer(#[from] WebServerError),

    /// Cancellation signal fired during the authority call
    #[error("operation cancelled")]
    Cancelled,

    /// The authority call exceeded its time bound
    #[error("no response from certificate authority after {0:?}")]
    Timeout(Duration),
}

/// Errors returned by the certificate managers
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Domain set or challenge selection rejected before any I/O
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Multi-domain install with a wildcard and a non-DNS challenge
    #[error("Wildcard domain '{domain}' requires the DNS challenge, got {challenge}")]
    WildcardChallengeMismatch { domain: String, challenge: String },

    /// A single-domain manager was given more than one domain
    #[error("Single-domain manager expects one domain, got {0}")]
    NotSingleDomain(usize),

    /// A lifecycle stage failed; earlier artifacts are left in place
    #[error("{stage}: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: StageFailure,
    },

    /// Certificate info lookup failed
    #[error(transparent)]
    Info(StorageError),
}

impl ManagerError {
    pub(crate) fn at(stage: Stage, source: impl Into<StageFailure>) -> Self {
        Self::Stage {
            stage,
            source: source.into(),
        }
    }

    /// Stage that failed, if this error came from the install pipeline
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Stage {
                source: StageFailure::Cancelled,
                ..
            }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Stage {
                source: StageFailure::Timeout(_),
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webserver_stage_message() {
        let err = ManagerError::at(
            Stage::WebServerConfigured,
            WebServerError::TestFailed("nginx: [emerg] bad".to_string()),
        );
        let text = err.to_string();
        assert!(text.starts_with("Web server configuration failed"));
        assert!(text.contains("nginx: [emerg] bad"));
        assert_eq!(err.stage(), Some(Stage::WebServerConfigured));
    }

    #[test]
    fn test_io_error_names_path() {
        let err = StorageError::io(
            "/etc/autocert/certs/example.com/key.pem",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err
            .to_string()
            .contains("/etc/autocert/certs/example.com/key.pem"));
    }

    #[test]
    fn test_cancel_and_timeout_predicates() {
        let cancelled = ManagerError::at(Stage::CertificateObtained, StageFailure::Cancelled);
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_timeout());

        let timeout = ManagerError::at(
            Stage::CertificateObtained,
            StageFailure::Timeout(Duration::from_secs(5)),
        );
        assert!(timeout.is_timeout());
    }
}
