//! Challenge strategy selection
//!
//! Maps the user's intent flags and the shape of the domain set onto a
//! single [`ChallengeType`]. Pure decision logic, no I/O.

use std::path::PathBuf;
use tracing::debug;

use crate::domain::DomainSet;
use crate::errors::DomainError;
use crate::types::ChallengeType;

/// Challenge mode flags as given on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeFlags {
    /// `--standalone`
    pub standalone: bool,
    /// `--webroot <path>`
    pub webroot: Option<PathBuf>,
    /// `--dns`
    pub dns: bool,
}

impl ChallengeFlags {
    /// Names of every mode flag that is set
    fn selected(&self) -> Vec<String> {
        let mut selected = Vec::new();
        if self.webroot.is_some() {
            selected.push("webroot".to_string());
        }
        if self.standalone {
            selected.push("standalone".to_string());
        }
        if self.dns {
            selected.push("dns".to_string());
        }
        selected
    }
}

/// Choose the challenge type for a domain set
///
/// - more than one mode flag fails with `InvalidChallengeConfiguration`
/// - a wildcard entry without `dns` fails with `WildcardRequiresDns`
/// - no flag at all selects `Webroot`
pub fn select_challenge(
    domains: &DomainSet,
    flags: &ChallengeFlags,
) -> Result<ChallengeType, DomainError> {
    let selected = flags.selected();
    if selected.len() > 1 {
        return Err(DomainError::InvalidChallengeConfiguration { selected });
    }

    if !flags.dns {
        if let Some(wildcard) = domains.first_wildcard() {
            return Err(DomainError::WildcardRequiresDns {
                domain: wildcard.to_string(),
            });
        }
    }

    let challenge = if flags.dns {
        ChallengeType::Dns
    } else if flags.standalone {
        ChallengeType::Standalone
    } else {
        ChallengeType::Webroot
    };

    debug!(domains = %domains, challenge = %challenge, "Selected challenge type");
    Ok(challenge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn flags(standalone: bool, webroot: bool, dns: bool) -> ChallengeFlags {
        ChallengeFlags {
            standalone,
            webroot: webroot.then(|| PathBuf::from("/var/www/html")),
            dns,
        }
    }

    #[test]
    fn test_default_is_webroot() {
        let set = DomainSet::single("example.com").unwrap();
        assert_eq!(
            select_challenge(&set, &ChallengeFlags::default()),
            Ok(ChallengeType::Webroot)
        );
    }

    #[test]
    fn test_explicit_modes() {
        let set = DomainSet::single("example.com").unwrap();
        assert_eq!(
            select_challenge(&set, &flags(true, false, false)),
            Ok(ChallengeType::Standalone)
        );
        assert_eq!(
            select_challenge(&set, &flags(false, true, false)),
            Ok(ChallengeType::Webroot)
        );
        assert_eq!(
            select_challenge(&set, &flags(false, false, true)),
            Ok(ChallengeType::Dns)
        );
    }

    #[test]
    fn test_conflicting_flags() {
        let set = DomainSet::single("example.com").unwrap();
        let err = select_challenge(&set, &flags(true, false, true)).unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidChallengeConfiguration {
                selected: vec!["standalone".to_string(), "dns".to_string()]
            }
        );
    }

    #[test]
    fn test_wildcard_without_dns() {
        let set = DomainSet::new(["example.com", "*.example.com"]).unwrap();
        let err = select_challenge(&set, &ChallengeFlags::default()).unwrap_err();
        assert_eq!(
            err,
            DomainError::WildcardRequiresDns {
                domain: "*.example.com".to_string()
            }
        );
    }

    #[test]
    fn test_conflict_reported_before_wildcard() {
        let set = DomainSet::single("*.example.com").unwrap();
        let err = select_challenge(&set, &flags(true, true, false)).unwrap_err();
        assert!(matches!(
            err,
            DomainError::InvalidChallengeConfiguration { .. }
        ));
    }

    proptest! {
        #[test]
        fn prop_wildcard_sets_only_get_dns(
            standalone in any::<bool>(),
            webroot in any::<bool>(),
            dns in any::<bool>(),
            extra in proptest::collection::vec("[a-z]{1,8}\\.com", 0..3),
        ) {
            let mut domains = vec!["*.example.com".to_string()];
            domains.extend(extra);
            let set = DomainSet::new(&domains).unwrap();

            match select_challenge(&set, &flags(standalone, webroot, dns)) {
                Ok(challenge) => prop_assert_eq!(challenge, ChallengeType::Dns),
                Err(DomainError::WildcardRequiresDns { .. }) => prop_assert!(!dns),
                Err(DomainError::InvalidChallengeConfiguration { .. }) => {
                    let count = [standalone, webroot, dns].iter().filter(|b| **b).count();
                    prop_assert!(count > 1);
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }
    }
}
