//! Certificate lifecycle
//!
//! Issues certificates for a domain set, persists them under the
//! certificate directory and hands them to the web-server configurator.
//!
//! # Architecture
//!
//! - [`keys`] - RSA key generation and PKCS#10 request construction
//! - [`CertificateAuthority`] - exchanges a request for a signed chain;
//!   [`SelfSignedAuthority`] is the demo fulfilment
//! - [`CertificateStore`] - deterministic on-disk layout keyed by primary domain
//! - [`SingleDomainManager`] / [`MultiDomainManager`] - orchestrate install,
//!   renew and info for one domain or a SAN set
//!
//! # Install Flow
//!
//! 1. Create `<cert_dir>/<dir_name>/`
//! 2. Generate the private key and write `key.pem` (0600)
//! 3. Build the certificate request (CN = primary, SAN = every domain)
//! 4. Call the authority, bounded by a timeout and a cancellation token
//! 5. Write `cert.pem`, `chain.pem` and, for SAN sets, `domains.txt`
//! 6. Configure every domain in the web server, then test and reload it

mod authority;
mod error;
pub mod keys;
mod manager;
mod storage;

pub use authority::{
    dns_record_name, webroot_challenge_dir, CertificateAuthority, ObtainRequest,
    SelfSignedAuthority, SELF_SIGNED_VALIDITY_DAYS,
};
pub use error::{AuthorityError, KeyError, ManagerError, Stage, StageFailure, StorageError};
pub use manager::{
    manager_for, CertificateLifecycle, ManagerContext, ManagerOptions, MultiDomainManager,
    RenewOutcome, SingleDomainManager,
};
pub use storage::{
    CertificateInfo, CertificatePaths, CertificateStore, StoredEntry, CERT_FILE, CHAIN_FILE,
    DOMAINS_FILE, KEY_FILE,
};
