//! Certificate authority collaborator
//!
//! The orchestrator hands a DER certificate request to a
//! [`CertificateAuthority`] and gets a PEM chain back. A real ACME client
//! may block for minutes while DNS records propagate, so callers bound and
//! cancel the call; implementations hold no shared mutable state across it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, CertifiedIssuer,
    DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use tracing::{debug, info};
use x509_parser::prelude::{FromDer, GeneralName, ParsedExtension, X509CertificationRequest};

use autocert_common::{ChallengeType, DomainSet, WILDCARD_PREFIX};

use super::error::AuthorityError;

/// HTTP-01 challenge directory below a webroot
pub const ACME_CHALLENGE_DIR: &str = ".well-known/acme-challenge";

/// DNS-01 record label prefix
pub const DNS_CHALLENGE_LABEL: &str = "_acme-challenge";

/// Validity of certificates issued by [`SelfSignedAuthority`]
pub const SELF_SIGNED_VALIDITY_DAYS: i64 = 90;

/// Everything an authority needs to fulfil one order
#[derive(Debug, Clone)]
pub struct ObtainRequest {
    /// DER-encoded PKCS#10 request
    pub csr_der: Vec<u8>,
    pub challenge: ChallengeType,
    pub domains: DomainSet,
    pub account_email: Option<String>,
    /// Document root for the webroot challenge
    pub webroot: Option<PathBuf>,
}

/// Exchanges a certificate request for a signed chain
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Human-readable name used in logs
    fn name(&self) -> &str;

    /// Obtain a PEM certificate chain, leaf first
    async fn obtain(&self, request: &ObtainRequest) -> Result<Vec<u8>, AuthorityError>;
}

/// DNS record name that proves control of `domain`
///
/// A wildcard is proven on its base domain: `*.example.com` and
/// `example.com` share `_acme-challenge.example.com`.
pub fn dns_record_name(domain: &str) -> String {
    let base = domain.strip_prefix(WILDCARD_PREFIX).unwrap_or(domain);
    format!("{}.{}", DNS_CHALLENGE_LABEL, base)
}

/// Directory under `webroot` that receives HTTP-01 token files
pub fn webroot_challenge_dir(webroot: &Path) -> PathBuf {
    webroot.join(ACME_CHALLENGE_DIR)
}

/// Demo fulfilment that issues locally instead of contacting an ACME server
///
/// Each call creates a throwaway root key, signs the request's public key
/// with it and returns `leaf + root`. The leaf carries the request's
/// subject and SANs, so it matches the stored private key.
#[derive(Debug, Clone)]
pub struct SelfSignedAuthority {
    validity_days: i64,
}

impl Default for SelfSignedAuthority {
    fn default() -> Self {
        Self {
            validity_days: SELF_SIGNED_VALIDITY_DAYS,
        }
    }
}

impl SelfSignedAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the issued validity period
    pub fn with_validity_days(mut self, days: i64) -> Self {
        self.validity_days = days;
        self
    }

    /// Log the proof artifact a real ACME exchange would publish
    fn describe_proof(&self, request: &ObtainRequest) {
        match request.challenge {
            ChallengeType::Webroot => {
                let webroot = request
                    .webroot
                    .clone()
                    .unwrap_or_else(autocert_config::defaults::default_webroot);
                let dir = webroot_challenge_dir(&webroot);
                for domain in request.domains.iter() {
                    info!(
                        domain = %domain,
                        path = %dir.display(),
                        "Webroot challenge: token file would be published here"
                    );
                }
            }
            ChallengeType::Standalone => {
                info!(
                    domains = %request.domains,
                    port = 80,
                    "Standalone challenge: a temporary HTTP listener would answer on port 80"
                );
            }
            ChallengeType::Dns => {
                for domain in request.domains.iter() {
                    info!(
                        domain = %domain,
                        record = %dns_record_name(domain),
                        "DNS challenge: TXT record would be published"
                    );
                }
            }
        }
    }
}

/// Subject CN and DNS SANs of a certificate request
fn inspect_request(der: &[u8]) -> Result<(Option<String>, Vec<String>), AuthorityError> {
    let (_, csr) = X509CertificationRequest::from_der(der)
        .map_err(|e| AuthorityError::InvalidRequest(e.to_string()))?;

    let common_name = csr
        .certification_request_info
        .subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);

    let mut sans = Vec::new();
    for ext in csr.requested_extensions().into_iter().flatten() {
        if let ParsedExtension::SubjectAlternativeName(san) = ext {
            for name in &san.general_names {
                if let GeneralName::DNSName(dns) = name {
                    sans.push(dns.to_string());
                }
            }
        }
    }

    Ok((common_name, sans))
}

fn issuer_params() -> CertificateParams {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "AutoCert Local Issuer");
    dn.push(DnType::OrganizationName, "AutoCert");
    params.distinguished_name = dn;
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params
}

#[async_trait]
impl CertificateAuthority for SelfSignedAuthority {
    fn name(&self) -> &str {
        "self-signed"
    }

    async fn obtain(&self, request: &ObtainRequest) -> Result<Vec<u8>, AuthorityError> {
        let (common_name, sans) = inspect_request(&request.csr_der)?;
        debug!(
            common_name = ?common_name,
            sans = ?sans,
            email = ?request.account_email,
            "Parsed certificate request"
        );

        if let Some(missing) = request.domains.iter().find(|d| !sans.iter().any(|s| s == d)) {
            return Err(AuthorityError::InvalidRequest(format!(
                "request does not cover domain '{}'",
                missing
            )));
        }

        self.describe_proof(request);

        let mut csr = CertificateSigningRequestParams::from_der(&request.csr_der.as_slice().into())
            .map_err(|e| AuthorityError::InvalidRequest(e.to_string()))?;

        let now = time::OffsetDateTime::now_utc();
        csr.params.not_before = now;
        csr.params.not_after = now + time::Duration::days(self.validity_days);
        csr.params.is_ca = IsCa::NoCa;
        csr.params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        csr.params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let issuer_key =
            KeyPair::generate().map_err(|e| AuthorityError::Issuance(e.to_string()))?;
        let issuer = CertifiedIssuer::self_signed(issuer_params(), issuer_key)
            .map_err(|e| AuthorityError::Issuance(e.to_string()))?;

        let leaf = csr
            .signed_by(&issuer)
            .map_err(|e| AuthorityError::Issuance(e.to_string()))?;

        info!(
            domains = %request.domains,
            challenge = %request.challenge,
            validity_days = self.validity_days,
            "Issued self-signed certificate"
        );

        Ok(format!("{}{}", leaf.pem(), issuer.pem()).into_bytes())
    }
}
