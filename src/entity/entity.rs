//! Canonical entity types and identity management.
//!
//! A canonical entity is the single authoritative record for a real-world
//! company or person. Its `id` is the stable identity anchor; everything else
//! (names, aliases, contact data) is a value that can change over time.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::name_change::NameChange;
use super::profile::{Address, ContactInfo};

/// Stable, opaque entity identifier.
///
/// Once assigned, an `EntityId` never changes. Identifiers order
/// lexicographically, which the matcher relies on for deterministic
/// tie-breaking.
///
/// # Examples
///
/// ```
/// use entity_resolver::EntityId;
///
/// let id = EntityId::from("E1");
/// assert_eq!(id.as_str(), "E1");
/// assert!(!EntityId::new().as_str().is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates a new random entity ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is blank.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Classification of extracted and canonical entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EntityType {
    /// A carrier, broker, shipper, consignee or any other business.
    Company,
    /// A driver, dispatcher or other contact person.
    Person,
    /// An origin, destination or facility.
    Location,
    /// A standalone piece of contact information.
    Contact,
    /// A shipped product or commodity.
    Product,
    /// A service offering (freight class, accessorial).
    Service,
    /// Anything else the extractor reports.
    Other,
}

impl EntityType {
    /// All entity types, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Company,
        Self::Person,
        Self::Location,
        Self::Contact,
        Self::Product,
        Self::Service,
        Self::Other,
    ];

    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::Person => "person",
            Self::Location => "location",
            Self::Contact => "contact",
            Self::Product => "product",
            Self::Service => "service",
            Self::Other => "other",
        }
    }
}

impl TryFrom<String> for EntityType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let value = value.trim();
        if value.is_empty() {
            return Err("entity type cannot be empty".to_string());
        }

        // Extractors commonly say "organization" for companies.
        if value.eq_ignore_ascii_case("organization") || value.eq_ignore_ascii_case("organisation") {
            return Ok(Self::Company);
        }

        Self::ALL
            .into_iter()
            .find(|t| value.eq_ignore_ascii_case(t.as_str()))
            .ok_or_else(|| {
                format!(
                    "unknown entity type: {value}. Use one of company, person, location, contact, product, service, other"
                )
            })
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical record for a real-world entity.
///
/// # Examples
///
/// ```
/// use entity_resolver::{Entity, EntityType};
///
/// let mut entity = Entity::new("Acme Corp", EntityType::Company);
/// assert!(entity.add_alias("ACME"));
/// assert!(entity.knows_name("acme"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier, immutable once assigned.
    pub id: EntityId,

    /// The type classification of the entity.
    #[serde(rename = "type")]
    pub entity_type: EntityType,

    /// Current primary name. Never empty.
    pub primary_name: String,

    /// Other names this entity is known by.
    #[serde(default)]
    pub aliases: BTreeSet<String>,

    /// Open key-value attributes (industry, DOT number, title...).
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,

    /// Registered or most recently confirmed address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,

    /// Known contact details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<ContactInfo>,

    /// Chronological record of name changes.
    #[serde(default)]
    pub name_change_history: Vec<NameChange>,

    /// When the entity was first created.
    pub created_at: DateTime<Utc>,

    /// When the entity was last modified.
    pub updated_at: DateTime<Utc>,

    /// Version number (incremented on every mutation).
    pub version: u64,
}

impl Entity {
    /// Creates a new entity with a random ID.
    #[must_use]
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self::with_id(EntityId::new(), name, entity_type)
    }

    /// Creates a new entity with a specific ID.
    ///
    /// This is useful during imports and in tests where identifiers come from
    /// an upstream system.
    #[must_use]
    pub fn with_id(id: impl Into<EntityId>, name: impl Into<String>, entity_type: EntityType) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            entity_type,
            primary_name: name.into().trim().to_string(),
            aliases: BTreeSet::new(),
            attributes: BTreeMap::new(),
            address: None,
            contact: None,
            name_change_history: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Sets the address.
    #[must_use]
    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// Sets the contact information.
    #[must_use]
    pub fn with_contact(mut self, contact: ContactInfo) -> Self {
        self.contact = Some(contact);
        self
    }

    /// Adds an alias while building.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.add_alias(alias);
        self
    }

    /// Returns true if `name` equals the primary name or an alias,
    /// ignoring case and surrounding whitespace.
    #[must_use]
    pub fn knows_name(&self, name: &str) -> bool {
        let name = name.trim();
        self.primary_name.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }

    /// Adds an alias to this entity.
    ///
    /// Returns false when the name is blank or already known.
    pub fn add_alias(&mut self, alias: impl Into<String>) -> bool {
        let alias = alias.into();
        let alias = alias.trim();
        if alias.is_empty() || self.knows_name(alias) {
            return false;
        }
        self.aliases.insert(alias.to_string());
        self.touch();
        true
    }

    /// Appends a name change to the history.
    ///
    /// The primary name is left untouched: a detected change is provenance,
    /// and promoting the new name is an explicit decision for the caller.
    pub fn record_name_change(&mut self, change: NameChange) {
        self.name_change_history.push(change);
        self.touch();
    }

    /// Replaces the primary name, keeping the old one as an alias.
    pub fn rename(&mut self, name: impl Into<String>) {
        let name = name.into().trim().to_string();
        if name.is_empty() || self.primary_name == name {
            return;
        }
        let previous = std::mem::replace(&mut self.primary_name, name);
        self.aliases.retain(|a| !a.eq_ignore_ascii_case(&self.primary_name));
        self.aliases.insert(previous);
        self.touch();
    }

    /// Sets an open attribute.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: serde_json::Value) {
        let key = key.into();
        if self.attributes.get(&key) != Some(&value) {
            self.attributes.insert(key, value);
            self.touch();
        }
    }

    /// Returns the primary name followed by every alias.
    #[must_use]
    pub fn all_names(&self) -> Vec<&str> {
        std::iter::once(self.primary_name.as_str())
            .chain(self.aliases.iter().map(String::as_str))
            .collect()
    }

    /// Returns the number of aliases.
    #[must_use]
    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    /// Updates the `updated_at` timestamp and increments the version.
    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }
}
