//! Domain sets and the store directory naming rule
//!
//! A [`DomainSet`] is the unit every certificate operation works on. The
//! first domain is the primary domain: it becomes the certificate's Common
//! Name and names the directory the certificate lives in.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::DomainError;

/// Prefix that marks a wildcard domain
pub const WILDCARD_PREFIX: &str = "*.";

/// Suffix appended to the store directory of multi-domain certificates
pub const SAN_DIR_SUFFIX: &str = "_san";

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Check whether a domain carries the wildcard prefix
pub fn is_wildcard(domain: &str) -> bool {
    domain.starts_with(WILDCARD_PREFIX)
}

/// Validate a single domain string
///
/// Rejects empty strings, strings containing whitespace, strings with more
/// than one `*`, and a `*` anywhere other than a leading `*.` label. Every
/// other label must be 1-63 characters of `[A-Za-z0-9-]` without a leading
/// or trailing hyphen, so a domain can never carry a path separator into
/// the store or site file names.
pub fn validate_domain(domain: &str) -> Result<(), DomainError> {
    if domain.is_empty() {
        return Err(DomainError::malformed(domain, "domain is empty"));
    }

    if domain.chars().any(char::is_whitespace) {
        return Err(DomainError::malformed(domain, "domain contains whitespace"));
    }

    let stars = domain.matches('*').count();
    if stars > 1 {
        return Err(DomainError::malformed(
            domain,
            "only one wildcard is allowed",
        ));
    }

    let base = match domain.strip_prefix(WILDCARD_PREFIX) {
        Some(base) => base,
        None if stars == 1 => {
            return Err(DomainError::malformed(
                domain,
                "wildcard must be the leading '*.' label",
            ));
        }
        None => domain,
    };

    if base.is_empty() {
        return Err(DomainError::malformed(domain, "wildcard has no base domain"));
    }

    if domain.len() > MAX_DOMAIN_LEN {
        return Err(DomainError::malformed(domain, "domain is longer than 253 characters"));
    }

    for label in base.split('.') {
        validate_label(domain, label)?;
    }

    Ok(())
}

fn validate_label(domain: &str, label: &str) -> Result<(), DomainError> {
    if label.is_empty() {
        return Err(DomainError::malformed(domain, "empty label"));
    }

    if label.len() > MAX_LABEL_LEN {
        return Err(DomainError::malformed(domain, "label is longer than 63 characters"));
    }

    if let Some(c) = label
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
    {
        return Err(DomainError::malformed(
            domain,
            format!("invalid character '{}'", c),
        ));
    }

    if label.starts_with('-') || label.ends_with('-') {
        return Err(DomainError::malformed(
            domain,
            "label starts or ends with a hyphen",
        ));
    }

    Ok(())
}

/// Ordered, non-empty, validated list of domains
///
/// Repeated entries (compared case-insensitively) keep their first
/// occurrence, so `a.com,a.com` is a single-domain set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct DomainSet {
    domains: Vec<String>,
}

impl DomainSet {
    /// Build a domain set, trimming, validating and de-duplicating entries
    pub fn new<I, S>(domains: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = Vec::new();
        for domain in domains {
            let domain = domain.as_ref().trim();
            validate_domain(domain)?;
            if !unique.iter().any(|d| d.eq_ignore_ascii_case(domain)) {
                unique.push(domain.to_string());
            }
        }

        if unique.is_empty() {
            return Err(DomainError::EmptyDomainSet);
        }

        Ok(Self { domains: unique })
    }

    /// Build a set holding exactly one domain
    pub fn single(domain: &str) -> Result<Self, DomainError> {
        Self::new([domain])
    }

    /// Parse a comma-separated list such as `example.com,www.example.com`
    pub fn parse_list(list: &str) -> Result<Self, DomainError> {
        Self::new(list.split(','))
    }

    /// The primary domain (first entry)
    pub fn primary(&self) -> &str {
        &self.domains[0]
    }

    /// All domains in input order
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Whether this set needs a SAN certificate
    pub fn is_multi(&self) -> bool {
        self.domains.len() > 1
    }

    /// Whether any entry is a wildcard
    pub fn has_wildcard(&self) -> bool {
        self.domains.iter().any(|d| is_wildcard(d))
    }

    /// First wildcard entry, if any
    pub fn first_wildcard(&self) -> Option<&str> {
        self.iter().find(|d| is_wildcard(d))
    }
}

impl TryFrom<Vec<String>> for DomainSet {
    type Error = DomainError;

    fn try_from(domains: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(domains)
    }
}

impl From<DomainSet> for Vec<String> {
    fn from(set: DomainSet) -> Self {
        set.domains
    }
}

impl fmt::Display for DomainSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.domains.join(","))
    }
}

/// Directory name under the certificate root for a domain set
///
/// A single domain uses the domain itself; a set with more than one
/// domain uses `<primary>_san`.
pub fn store_dir_name(set: &DomainSet) -> String {
    if set.is_multi() {
        format!("{}{}", set.primary(), SAN_DIR_SUFFIX)
    } else {
        set.primary().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_store_dir_name_single() {
        let set = DomainSet::single("example.com").unwrap();
        assert_eq!(store_dir_name(&set), "example.com");
    }

    #[test]
    fn test_store_dir_name_multi() {
        let set = DomainSet::new(["example.com", "www.example.com"]).unwrap();
        assert_eq!(store_dir_name(&set), "example.com_san");
        assert_eq!(set.primary(), "example.com");
    }

    #[test]
    fn test_parse_list_trims_entries() {
        let set = DomainSet::parse_list("a.com, b.com ,c.com").unwrap();
        assert_eq!(set.domains(), &["a.com", "b.com", "c.com"]);
    }

    #[test]
    fn test_parse_list_rejects_empty_entry() {
        let err = DomainSet::parse_list("a.com,,b.com").unwrap_err();
        assert!(matches!(err, DomainError::MalformedDomain { .. }));
    }

    #[test]
    fn test_empty_set_rejected() {
        let err = DomainSet::new(Vec::<String>::new()).unwrap_err();
        assert_eq!(err, DomainError::EmptyDomainSet);
    }

    #[test]
    fn test_wildcard_detection() {
        let set = DomainSet::new(["example.com", "*.example.com"]).unwrap();
        assert!(set.has_wildcard());
        assert_eq!(set.first_wildcard(), Some("*.example.com"));

        let plain = DomainSet::single("sub.example.com").unwrap();
        assert!(!plain.has_wildcard());
    }

    #[test]
    fn test_validate_domain_cases() {
        assert!(validate_domain("example.com").is_ok());
        assert!(validate_domain("*.example.com").is_ok());
        assert!(validate_domain("*.*.example.com").is_err());
        assert!(validate_domain("foo.*.com").is_err());
        assert!(validate_domain("*.").is_err());
        assert!(validate_domain("exa mple.com").is_err());
        assert!(validate_domain("example.com\t").is_err());
        assert!(validate_domain("").is_err());
        assert!(validate_domain("a..com").is_err());
        assert!(validate_domain("xn--bcher-kva.example").is_ok());
        assert!(validate_domain("-a.com").is_err());
        assert!(validate_domain("a_b.com").is_err());
        assert!(validate_domain(&format!("{}.com", "a".repeat(64))).is_err());
    }

    #[test]
    fn test_path_like_domains_rejected() {
        for domain in [
            "/tmp/escape",
            "sub/dir.com",
            "..",
            "../etc",
            "a.com/..",
            "c:\\windows",
            "a\\b.com",
            "*./etc",
        ] {
            let err = validate_domain(domain).unwrap_err();
            assert!(
                matches!(err, DomainError::MalformedDomain { .. }),
                "{} accepted",
                domain
            );
        }
        assert!(DomainSet::single("/tmp/escape").is_err());
    }

    #[test]
    fn test_duplicates_collapse() {
        let set = DomainSet::parse_list("a.com,a.com").unwrap();
        assert!(!set.is_multi());
        assert_eq!(store_dir_name(&set), "a.com");

        let set = DomainSet::new(["a.com", "b.com", "A.COM", "b.com"]).unwrap();
        assert_eq!(set.domains(), &["a.com", "b.com"]);
        assert_eq!(store_dir_name(&set), "a.com_san");
    }

    #[test]
    fn test_serde_validates() {
        let ok: DomainSet = serde_json::from_str(r#"["a.com","b.com"]"#).unwrap();
        assert_eq!(ok.len(), 2);
        assert!(serde_json::from_str::<DomainSet>(r#"["bad domain"]"#).is_err());
        assert!(serde_json::from_str::<DomainSet>("[]").is_err());
    }

    proptest! {
        #[test]
        fn prop_multiple_stars_rejected(
            left in "[a-z]{0,5}",
            mid in "[a-z.]{0,5}",
            right in "[a-z.]{0,5}",
        ) {
            let domain = format!("{}*{}*{}", left, mid, right);
            let is_malformed = matches!(
                validate_domain(&domain),
                Err(DomainError::MalformedDomain { .. })
            );
            prop_assert!(is_malformed);
        }

        #[test]
        fn prop_whitespace_rejected(
            left in "[a-z]{1,8}",
            ws in "[ \t\n]",
            right in "[a-z]{1,8}\\.com",
        ) {
            let domain = format!("{}{}{}", left, ws, right);
            let is_malformed = matches!(
                validate_domain(&domain),
                Err(DomainError::MalformedDomain { .. })
            );
            prop_assert!(is_malformed);
        }

        #[test]
        fn prop_path_separators_rejected(
            left in "[a-z]{0,8}",
            sep in "[/\\\\:]",
            right in "[a-z]{1,8}\\.com",
        ) {
            let domain = format!("{}{}{}", left, sep, right);
            let is_malformed = matches!(
                validate_domain(&domain),
                Err(DomainError::MalformedDomain { .. })
            );
            prop_assert!(is_malformed);
        }

        #[test]
        fn prop_valid_hostnames_accepted(
            labels in proptest::collection::vec("[a-z0-9]([a-z0-9-]{0,10}[a-z0-9])?", 1..4),
            wildcard in any::<bool>(),
        ) {
            let mut domain = format!("{}.com", labels.join("."));
            if wildcard {
                domain = format!("*.{}", domain);
            }
            prop_assert!(validate_domain(&domain).is_ok());
        }

        #[test]
        fn prop_repeats_never_grow_set(
            labels in proptest::collection::vec("[a-z]{1,6}\\.com", 1..5),
        ) {
            let mut doubled = labels.clone();
            doubled.extend(labels.iter().cloned());
            let once = DomainSet::new(&labels).unwrap();
            let twice = DomainSet::new(&doubled).unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_dir_name_uses_primary(
            labels in proptest::collection::vec("[a-z]{1,10}\\.(com|org|net)", 1..5),
        ) {
            let set = DomainSet::new(&labels).unwrap();
            let name = store_dir_name(&set);
            prop_assert!(name.starts_with(&labels[0]));
            prop_assert_eq!(name.ends_with(SAN_DIR_SUFFIX), set.len() > 1);
        }
    }
}
