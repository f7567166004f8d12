//! Shared types for AutoCert
//!
//! This crate holds the pieces every other AutoCert crate agrees on:
//!
//! - [`DomainSet`]: an ordered, validated, non-empty list of domains whose
//!   first entry is the primary domain
//! - [`store_dir_name`]: the one place that derives the on-disk directory
//!   name for a domain set
//! - [`ChallengeType`] and [`select_challenge`]: the challenge strategy
//!   selector
//! - [`WebServerKind`]: which web server a certificate gets wired into
//!
//! Nothing in here performs I/O.

pub mod challenge;
pub mod domain;
pub mod errors;
pub mod types;

pub use challenge::{select_challenge, ChallengeFlags};
pub use domain::{
    is_wildcard, store_dir_name, validate_domain, DomainSet, SAN_DIR_SUFFIX, WILDCARD_PREFIX,
};
pub use errors::DomainError;
pub use types::{ChallengeType, WebServerKind};
