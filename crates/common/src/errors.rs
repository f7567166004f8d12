//! Configuration-class errors
//!
//! These are detected before any I/O happens. A caller that receives one
//! can be sure nothing was written to disk.

use thiserror::Error;

/// Errors raised while validating domains or selecting a challenge type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The domain string cannot name a certificate subject
    #[error("Malformed domain '{domain}': {reason}")]
    MalformedDomain { domain: String, reason: String },

    /// No domains were supplied
    #[error("At least one domain is required")]
    EmptyDomainSet,

    /// More than one challenge mode flag was given
    #[error("Only one challenge mode may be selected, got: {}", .selected.join(", "))]
    InvalidChallengeConfiguration { selected: Vec<String> },

    /// A wildcard domain was requested without the DNS challenge
    #[error("Wildcard domain '{domain}' requires the DNS challenge (add --dns)")]
    WildcardRequiresDns { domain: String },
}

impl DomainError {
    pub(crate) fn malformed(domain: &str, reason: impl Into<String>) -> Self {
        DomainError::MalformedDomain {
            domain: domain.to_string(),
            reason: reason.into(),
        }
    }
}
