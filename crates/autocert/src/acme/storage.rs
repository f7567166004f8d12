//! On-disk certificate store
//!
//! # Directory Structure
//!
//! ```text
//! <cert_dir>/
//! ├── example.com/
//! │   ├── key.pem           # Private key (PKCS#8, 0600)
//! │   ├── cert.pem          # Leaf certificate (0644)
//! │   └── chain.pem         # Intermediates, when the CA sent any (0644)
//! └── example.com_san/
//!     ├── key.pem
//!     ├── cert.pem
//!     ├── chain.pem
//!     └── domains.txt       # One member domain per line, input order
//! ```
//!
//! Permission changes are applied after the content is written, so a crash
//! in between can leave a key with the process umask's mode.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};

use autocert_common::{store_dir_name, DomainSet, SAN_DIR_SUFFIX};

use super::error::StorageError;

pub const KEY_FILE: &str = "key.pem";
pub const CERT_FILE: &str = "cert.pem";
pub const CHAIN_FILE: &str = "chain.pem";
pub const DOMAINS_FILE: &str = "domains.txt";

const KEY_MODE: u32 = 0o600;
const CERT_MODE: u32 = 0o644;

/// Paths of every artifact belonging to one domain set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePaths {
    pub dir: PathBuf,
    pub key: PathBuf,
    pub cert: PathBuf,
    pub chain: PathBuf,
    pub domains: PathBuf,
}

impl CertificatePaths {
    fn in_dir(dir: PathBuf) -> Self {
        Self {
            key: dir.join(KEY_FILE),
            cert: dir.join(CERT_FILE),
            chain: dir.join(CHAIN_FILE),
            domains: dir.join(DOMAINS_FILE),
            dir,
        }
    }
}

/// Read-only view of a stored certificate, computed on demand
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// Primary domain
    pub domain: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub chain_path: PathBuf,
    pub expires: DateTime<Utc>,
    /// `now < expires`; does not check `NotBefore` or chain trust
    pub is_valid: bool,
    pub issuer: String,
}

impl CertificateInfo {
    /// Whole days until expiry, negative once expired
    pub fn days_remaining(&self) -> i64 {
        (self.expires - Utc::now()).num_days()
    }
}

/// A directory found in the store
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub dir_name: String,
    pub domains: DomainSet,
}

/// Certificate store rooted at the configured certificate directory
///
/// The store is the only component that writes under the root.
#[derive(Debug, Clone)]
pub struct CertificateStore {
    root: PathBuf,
}

impl CertificateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Artifact paths for a domain set
    pub fn paths(&self, domains: &DomainSet) -> CertificatePaths {
        CertificatePaths::in_dir(self.root.join(store_dir_name(domains)))
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Create the set's directory (`mkdir -p` semantics)
    pub fn ensure_dir(&self, domains: &DomainSet) -> Result<CertificatePaths, StorageError> {
        let paths = self.paths(domains);
        fs::create_dir_all(&paths.dir).map_err(|e| StorageError::io(&paths.dir, e))?;
        trace!(dir = %paths.dir.display(), "Certificate directory ready");
        Ok(paths)
    }

    /// Write the private key PEM with mode 0600
    pub fn save_key(&self, domains: &DomainSet, key_pem: &str) -> Result<PathBuf, StorageError> {
        let path = self.paths(domains).key;
        write_with_mode(&path, key_pem.as_bytes(), KEY_MODE)?;
        debug!(path = %path.display(), "Saved private key");
        Ok(path)
    }

    /// Split an issued PEM chain into `cert.pem` and `chain.pem`
    ///
    /// The first `CERTIFICATE` block is the leaf. Remaining certificate
    /// blocks go to `chain.pem`; when there are none, a chain file left by a
    /// previous issuance is removed.
    pub fn save_certificate(
        &self,
        domains: &DomainSet,
        chain_pem: &[u8],
    ) -> Result<CertificatePaths, StorageError> {
        let paths = self.paths(domains);

        let blocks = pem::parse_many(chain_pem).map_err(|e| StorageError::CertificateUnreadable {
            path: paths.cert.clone(),
            message: e.to_string(),
        })?;
        let mut certs = blocks.into_iter().filter(|p| p.tag() == "CERTIFICATE");

        let leaf = certs.next().ok_or(StorageError::EmptyChain)?;
        let intermediates: Vec<_> = certs.collect();

        write_with_mode(&paths.cert, pem::encode(&leaf).as_bytes(), CERT_MODE)?;

        if intermediates.is_empty() {
            if paths.chain.exists() {
                fs::remove_file(&paths.chain).map_err(|e| StorageError::io(&paths.chain, e))?;
                debug!(path = %paths.chain.display(), "Removed stale chain file");
            }
        } else {
            write_with_mode(
                &paths.chain,
                pem::encode_many(&intermediates).as_bytes(),
                CERT_MODE,
            )?;
        }

        info!(
            domain = %domains.primary(),
            dir = %paths.dir.display(),
            intermediates = intermediates.len(),
            "Saved certificate to store"
        );

        Ok(paths)
    }

    /// Record member domains for a multi-domain set; no-op for a single domain
    pub fn save_domains_list(&self, domains: &DomainSet) -> Result<(), StorageError> {
        if !domains.is_multi() {
            return Ok(());
        }

        let path = self.paths(domains).domains;
        let content = domains.domains().join("\n");
        fs::write(&path, content).map_err(|e| StorageError::io(&path, e))?;
        debug!(path = %path.display(), count = domains.len(), "Saved domain list");
        Ok(())
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Parse the stored leaf certificate
    pub fn cert_info(&self, domains: &DomainSet) -> Result<CertificateInfo, StorageError> {
        let paths = self.paths(domains);
        let parsed = read_leaf(&paths.cert)?;

        Ok(CertificateInfo {
            domain: domains.primary().to_string(),
            cert_path: paths.cert,
            key_path: paths.key,
            chain_path: paths.chain,
            is_valid: Utc::now() < parsed.expires,
            expires: parsed.expires,
            issuer: parsed.issuer,
        })
    }

    /// Domain set stored in `dir_name`
    ///
    /// Read from `domains.txt` when present, otherwise the directory name is
    /// the single domain.
    pub fn load_domain_set(&self, dir_name: &str) -> Result<DomainSet, StorageError> {
        let list_path = self.root.join(dir_name).join(DOMAINS_FILE);

        let result = if list_path.is_file() {
            let content =
                fs::read_to_string(&list_path).map_err(|e| StorageError::io(&list_path, e))?;
            DomainSet::new(content.lines().filter(|l| !l.trim().is_empty()))
        } else {
            DomainSet::single(dir_name.strip_suffix(SAN_DIR_SUFFIX).unwrap_or(dir_name))
        };

        result.map_err(|source| StorageError::InvalidDomainList {
            dir: dir_name.to_string(),
            source,
        })
    }

    /// Every directory under the root that holds a certificate
    pub fn list(&self) -> Result<Vec<StoredEntry>, StorageError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let read_dir = fs::read_dir(&self.root).map_err(|e| StorageError::io(&self.root, e))?;

        for entry in read_dir {
            let entry = entry.map_err(|e| StorageError::io(&self.root, e))?;
            let path = entry.path();
            if !path.is_dir() || !path.join(CERT_FILE).exists() {
                continue;
            }

            let Some(dir_name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %path.display(), "Skipping non UTF-8 store directory");
                continue;
            };

            match self.load_domain_set(&dir_name) {
                Ok(domains) => entries.push(StoredEntry { dir_name, domains }),
                Err(e) => warn!(dir = %dir_name, error = %e, "Skipping store directory"),
            }
        }

        entries.sort_by(|a, b| a.dir_name.cmp(&b.dir_name));
        Ok(entries)
    }
}

struct ParsedLeaf {
    expires: DateTime<Utc>,
    issuer: String,
}

fn read_leaf(path: &Path) -> Result<ParsedLeaf, StorageError> {
    use x509_parser::prelude::{FromDer, X509Certificate};

    let content = match fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StorageError::CertificateNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(StorageError::io(path, e)),
    };

    let block = pem::parse(&content).map_err(|e| StorageError::CertificateUnreadable {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let (_, cert) =
        X509Certificate::from_der(block.contents()).map_err(|e| StorageError::CertificateParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let timestamp = cert.validity().not_after.timestamp();
    let expires =
        DateTime::from_timestamp(timestamp, 0).ok_or_else(|| StorageError::CertificateParse {
            path: path.to_path_buf(),
            message: "expiry timestamp out of range".to_string(),
        })?;

    Ok(ParsedLeaf {
        expires,
        issuer: cert.issuer().to_string(),
    })
}

fn write_with_mode(path: &Path, content: &[u8], mode: u32) -> Result<(), StorageError> {
    fs::write(path, content).map_err(|e| StorageError::io(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| StorageError::io(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}
