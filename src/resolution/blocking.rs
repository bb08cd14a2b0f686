//! Blocking keys.
//!
//! Blocking restricts expensive similarity scoring to entities that share at
//! least one cheap key with the candidate. A genuine match sharing no key is
//! unreachable; that false negative is accepted.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::normalize::NormalizedCandidate;

/// Name tokens too common to discriminate anything.
const STOP_TOKENS: &[&str] = &["and", "the", "of", "de", "la"];

/// A key under which an entity is indexed for blocking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BlockKey {
    /// A token of a normalized root name (primary or alias).
    NameToken(String),
    /// A digits-only phone number.
    Phone(String),
    /// The domain of an email address.
    EmailDomain(String),
    /// A normalized postal code.
    PostalCode(String),
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameToken(t) => write!(f, "name:{t}"),
            Self::Phone(p) => write!(f, "phone:{p}"),
            Self::EmailDomain(d) => write!(f, "email:{d}"),
            Self::PostalCode(c) => write!(f, "postal:{c}"),
        }
    }
}

/// Computes every blocking key of a normalized candidate or entity.
#[must_use]
pub fn block_keys(normalized: &NormalizedCandidate) -> BTreeSet<BlockKey> {
    let mut keys: BTreeSet<BlockKey> = normalized
        .name_roots()
        .flat_map(|root| root.split(' '))
        .filter(|t| t.chars().count() >= 2 && !STOP_TOKENS.contains(t))
        .map(|t| BlockKey::NameToken(t.to_string()))
        .collect();

    if let Some(phone) = &normalized.contact.phone {
        keys.insert(BlockKey::Phone(phone.clone()));
    }
    if let Some(domain) = normalized.contact.email_domain() {
        keys.insert(BlockKey::EmailDomain(domain.to_string()));
    }
    if let Some(postal) = &normalized.address.postal_code {
        keys.insert(BlockKey::PostalCode(postal.clone()));
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Address, CandidateEntity, ContactInfo};
    use crate::resolution::normalize::normalize;

    #[test]
    fn test_block_keys_cover_every_dimension() {
        let candidate = CandidateEntity::company("Acme Holdings LLC")
            .with_alias("Acme Freight")
            .with_address(Address::postal("64111"))
            .with_contact(ContactInfo::phone("888-564-6546").with_email("ops@acme.com"));
        let keys = block_keys(&normalize(&candidate));

        assert!(keys.contains(&BlockKey::NameToken("acme".to_string())));
        assert!(keys.contains(&BlockKey::NameToken("holdings".to_string())));
        assert!(keys.contains(&BlockKey::NameToken("freight".to_string())));
        assert!(!keys.contains(&BlockKey::NameToken("llc".to_string())));
        assert!(keys.contains(&BlockKey::Phone("8885646546".to_string())));
        assert!(keys.contains(&BlockKey::EmailDomain("acme.com".to_string())));
        assert!(keys.contains(&BlockKey::PostalCode("64111".to_string())));
    }

    #[test]
    fn test_stop_tokens_and_single_letters_are_skipped() {
        let keys = block_keys(&normalize(&CandidateEntity::company("J and the Freight")));
        assert_eq!(keys.len(), 1);
        assert!(keys.contains(&BlockKey::NameToken("freight".to_string())));
    }

    #[test]
    fn test_block_key_display() {
        assert_eq!(BlockKey::Phone("7709571866".to_string()).to_string(), "phone:7709571866");
    }
}
