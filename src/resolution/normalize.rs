//! Candidate normalization.
//!
//! Turns extracted names, addresses and contact fields into a comparable
//! form. Normalization is pure and never fails: absent or unusable fields
//! normalize to `None`, malformed phone numbers pass through as digits.
//! Applying it to its own output is a no-op.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::entity::{Address, CandidateEntity, ContactInfo, Entity, EntityType};

/// Legal-form suffixes and their canonical short form.
const LEGAL_SUFFIXES: &[(&str, &str)] = &[
    ("llc", "llc"),
    ("pllc", "pllc"),
    ("inc", "inc"),
    ("incorporated", "inc"),
    ("ltd", "ltd"),
    ("limited", "ltd"),
    ("co", "co"),
    ("company", "co"),
    ("corp", "corp"),
    ("corporation", "corp"),
    ("plc", "plc"),
    ("lp", "lp"),
    ("llp", "llp"),
    ("gmbh", "gmbh"),
];

/// Business abbreviations expanded to their long form inside names.
const NAME_ABBREVIATIONS: &[(&str, &str)] = &[
    ("intl", "international"),
    ("natl", "national"),
    ("mfg", "manufacturing"),
    ("mgmt", "management"),
    ("svc", "service"),
    ("svcs", "services"),
    ("bros", "brothers"),
    ("assoc", "associates"),
    ("dist", "distribution"),
    ("frt", "freight"),
    ("trkg", "trucking"),
    ("transp", "transportation"),
];

/// Street abbreviations expanded to the canonical long form, so
/// "123 Main St" and "123 Main Street" normalize identically.
const ADDRESS_ABBREVIATIONS: &[(&str, &str)] = &[
    ("st", "street"),
    ("str", "street"),
    ("ave", "avenue"),
    ("av", "avenue"),
    ("rd", "road"),
    ("blvd", "boulevard"),
    ("dr", "drive"),
    ("ln", "lane"),
    ("ct", "court"),
    ("cir", "circle"),
    ("pl", "place"),
    ("sq", "square"),
    ("ter", "terrace"),
    ("trl", "trail"),
    ("hwy", "highway"),
    ("pkwy", "parkway"),
    ("fwy", "freeway"),
    ("expy", "expressway"),
    ("ste", "suite"),
    ("apt", "apartment"),
    ("bldg", "building"),
    ("fl", "floor"),
    ("ctr", "center"),
    ("n", "north"),
    ("s", "south"),
    ("e", "east"),
    ("w", "west"),
    ("ne", "northeast"),
    ("nw", "northwest"),
    ("se", "southeast"),
    ("sw", "southwest"),
];

/// Connector words that never form a root on their own edge.
const EDGE_WORDS: &[&str] = &["the", "and", "of"];

fn lookup<'a>(table: &'a [(&str, &'a str)], token: &str) -> Option<&'a str> {
    table.iter().find(|(k, _)| *k == token).map(|(_, v)| *v)
}

fn postal_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\b(\d{5}(?:-\d{4})?|[a-z]\d[a-z] ?\d[a-z]\d)\b").ok())
        .as_ref()
}

/// Lowercases, folds accents, drops apostrophes and periods, turns `&` into
/// "and", and splits on everything else that is not alphanumeric.
fn fold_tokens(text: &str) -> Vec<String> {
    let folded: String = text
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| !matches!(*c, '\'' | '\u{2019}' | '.'))
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .replace('&', " and ");

    folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// A name split into its comparable root and legal-form suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedName {
    /// Lowercased, abbreviation-expanded name without legal suffix.
    pub root: String,
    /// Canonical legal suffix tokens ("llc", "co inc"), if any were present.
    pub legal_suffix: Option<String>,
}

impl NormalizedName {
    /// Root tokens, in order.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.root.split(' ').filter(|t| !t.is_empty())
    }

    /// Re-assembles the normalized name with its suffix.
    #[must_use]
    pub fn to_text(&self) -> String {
        match &self.legal_suffix {
            Some(suffix) => format!("{} {suffix}", self.root),
            None => self.root.clone(),
        }
    }
}

/// Normalizes an entity name.
///
/// # Examples
///
/// ```
/// use entity_resolver::resolution::normalize::normalize_name;
///
/// let a = normalize_name("Bennett International Logistics, LLC");
/// let b = normalize_name("Bennett Intl. Logistics");
/// assert_eq!(a.root, b.root);
/// assert_eq!(a.legal_suffix.as_deref(), Some("llc"));
/// ```
#[must_use]
pub fn normalize_name(name: &str) -> NormalizedName {
    let mut tokens: Vec<String> = fold_tokens(name)
        .into_iter()
        .map(|t| lookup(NAME_ABBREVIATIONS, &t).map_or(t, str::to_string))
        .collect();

    let mut suffix = Vec::new();
    loop {
        while tokens.len() > 1 && tokens.last().is_some_and(|t| EDGE_WORDS.contains(&t.as_str())) {
            tokens.pop();
        }
        if tokens.len() <= 1 {
            break;
        }
        let Some(canonical) = tokens.last().and_then(|t| lookup(LEGAL_SUFFIXES, t)) else {
            break;
        };
        suffix.push(canonical.to_string());
        tokens.pop();
    }
    while tokens.len() > 1 && tokens.first().is_some_and(|t| EDGE_WORDS.contains(&t.as_str())) {
        tokens.remove(0);
    }
    suffix.reverse();

    NormalizedName {
        root: tokens.join(" "),
        legal_suffix: non_empty(suffix.join(" ")),
    }
}

/// Normalizes free address text (street line or full address).
#[must_use]
pub fn normalize_street(text: &str) -> String {
    fold_tokens(text)
        .into_iter()
        .map(|t| lookup(ADDRESS_ABBREVIATIONS, &t).map_or(t, str::to_string))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalizes a postal code: uppercase alphanumerics, ZIP+4 reduced to ZIP.
#[must_use]
pub fn normalize_postal_code(code: &str) -> String {
    let compact: String = code
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if compact.len() == 9 && compact.chars().all(|c| c.is_ascii_digit()) {
        compact[..5].to_string()
    } else {
        compact
    }
}

/// Normalizes a phone number to digits only.
///
/// Eleven-digit North American numbers lose their leading country code `1`.
/// Anything else is returned as digits without validation.
///
/// # Examples
///
/// ```
/// use entity_resolver::resolution::normalize::normalize_phone;
///
/// assert_eq!(normalize_phone("+1 (770) 957-1866"), "7709571866");
/// assert_eq!(normalize_phone("ext. 42"), "42");
/// ```
#[must_use]
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == 11 && digits.starts_with('1') {
        digits[1..].to_string()
    } else {
        digits
    }
}

/// Lowercases and trims an email address, dropping a `mailto:` prefix.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    let email = email.trim().to_lowercase();
    email.strip_prefix("mailto:").unwrap_or(&email).trim().to_string()
}

/// Lowercases a website and strips scheme, `www.` and trailing slashes.
#[must_use]
pub fn normalize_website(url: &str) -> String {
    let mut url = url.trim().to_lowercase();
    for scheme in ["https://", "http://"] {
        if let Some(rest) = url.strip_prefix(scheme) {
            url = rest.to_string();
        }
    }
    if let Some(rest) = url.strip_prefix("www.") {
        url = rest.to_string();
    }
    url.trim_end_matches('/').to_string()
}

fn normalize_field(value: Option<&String>, f: impl Fn(&str) -> String) -> Option<String> {
    value.map(|v| f(v)).and_then(non_empty)
}

fn fold_plain(text: &str) -> String {
    fold_tokens(text).join(" ")
}

/// Normalized address fields. `street` falls back to the full address text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedAddress {
    /// Street with abbreviations expanded.
    pub street: Option<String>,
    /// Folded city.
    pub city: Option<String>,
    /// Folded state or province.
    pub state: Option<String>,
    /// Uppercase postal code; ZIP+4 cut to five digits.
    pub postal_code: Option<String>,
    /// Folded country.
    pub country: Option<String>,
}

impl NormalizedAddress {
    fn from_address(address: &Address) -> Self {
        let street = normalize_field(address.street.as_ref(), normalize_street)
            .or_else(|| normalize_field(address.full_address.as_ref(), normalize_street));

        let postal_code = normalize_field(address.postal_code.as_ref(), normalize_postal_code).or_else(|| {
            let full = address.full_address.as_deref()?;
            let found = postal_pattern()?.captures(full)?.get(1)?.as_str().to_string();
            non_empty(normalize_postal_code(&found))
        });

        Self {
            street,
            city: normalize_field(address.city.as_ref(), fold_plain),
            state: normalize_field(address.state.as_ref(), fold_plain),
            postal_code,
            country: normalize_field(address.country.as_ref(), fold_plain),
        }
    }

    /// Returns true if no field survived normalization.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.street.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.postal_code.is_none()
            && self.country.is_none()
    }

    /// Street and city tokens, used for overlap scoring.
    #[must_use]
    pub fn locality_tokens(&self) -> BTreeSet<&str> {
        self.street
            .iter()
            .chain(self.city.iter())
            .flat_map(|s| s.split(' '))
            .filter(|t| !t.is_empty())
            .collect()
    }

    fn to_address(&self) -> Address {
        Address {
            full_address: None,
            street: self.street.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            postal_code: self.postal_code.clone(),
            country: self.country.clone(),
        }
    }
}

/// Normalized contact fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedContact {
    /// Digits only, without a North American country code.
    pub phone: Option<String>,
    /// Lowercased address.
    pub email: Option<String>,
    /// Host and path, without scheme or `www.`.
    pub website: Option<String>,
}

impl NormalizedContact {
    fn from_contact(contact: &ContactInfo) -> Self {
        Self {
            phone: normalize_field(contact.phone.as_ref(), normalize_phone),
            email: normalize_field(contact.email.as_ref(), normalize_email),
            website: normalize_field(contact.website.as_ref(), normalize_website),
        }
    }

    /// The domain part of the email address, if any.
    #[must_use]
    pub fn email_domain(&self) -> Option<&str> {
        let email = self.email.as_deref()?;
        let (_, domain) = email.rsplit_once('@')?;
        (!domain.is_empty()).then_some(domain)
    }

    /// Returns true if no field survived normalization.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phone.is_none() && self.email.is_none() && self.website.is_none()
    }

    fn to_contact(&self) -> ContactInfo {
        ContactInfo {
            email: self.email.clone(),
            phone: self.phone.clone(),
            website: self.website.clone(),
        }
    }
}

/// A candidate (or stored entity) in comparable form.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCandidate {
    /// Entity kind, if given.
    pub entity_type: Option<EntityType>,
    /// Normalized primary name.
    pub name: NormalizedName,
    /// Normalized roots of every alias, excluding the name's own root.
    pub alias_roots: BTreeSet<String>,
    /// Normalized address; empty when absent.
    pub address: NormalizedAddress,
    /// Normalized contact details; empty when absent.
    pub contact: NormalizedContact,
    /// Extractor confidence, carried through unchanged.
    pub confidence: f64,
}

impl NormalizedCandidate {
    /// Every known root name: the name's root first, then alias roots.
    pub fn name_roots(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.root.as_str()).chain(self.alias_roots.iter().map(String::as_str))
    }

    /// Rebuilds a candidate from the normalized fields.
    ///
    /// Normalizing the result yields `self` again.
    #[must_use]
    pub fn to_candidate(&self) -> CandidateEntity {
        CandidateEntity {
            name: self.name.to_text(),
            entity_type: self.entity_type,
            aliases: self.alias_roots.clone(),
            attributes: std::collections::BTreeMap::new(),
            address: (!self.address.is_empty()).then(|| self.address.to_address()),
            contact: (!self.contact.is_empty()).then(|| self.contact.to_contact()),
            confidence: self.confidence,
        }
    }
}

/// Normalizes a candidate. Pure and infallible.
#[must_use]
pub fn normalize(candidate: &CandidateEntity) -> NormalizedCandidate {
    let name = normalize_name(&candidate.name);
    let alias_roots = candidate
        .aliases
        .iter()
        .map(|a| normalize_name(a).root)
        .filter(|root| !root.is_empty() && *root != name.root)
        .collect();

    NormalizedCandidate {
        entity_type: candidate.entity_type,
        name,
        alias_roots,
        address: candidate
            .address
            .as_ref()
            .map(NormalizedAddress::from_address)
            .unwrap_or_default(),
        contact: candidate
            .contact
            .as_ref()
            .map(NormalizedContact::from_contact)
            .unwrap_or_default(),
        confidence: candidate.confidence,
    }
}

/// Normalizes a stored entity the same way as a candidate.
#[must_use]
pub fn normalize_entity(entity: &Entity) -> NormalizedCandidate {
    normalize(&CandidateEntity::from_entity(entity))
}
