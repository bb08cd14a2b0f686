//! Best-effort parsing of extractor replies.
//!
//! Models wrap JSON in prose or markdown fences, leave fields out, and mix
//! types. The parser keeps every item it can make sense of and records why it
//! dropped the rest; it never rejects a whole document.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::entity::{Address, CandidateEntity, ContactInfo, EntityType};
use crate::TARGET_EXTRACTION;

/// Top-level arrays and the type their items default to.
const SECTIONS: [(&str, Option<EntityType>); 6] = [
    ("companies", Some(EntityType::Company)),
    ("people", Some(EntityType::Person)),
    ("persons", Some(EntityType::Person)),
    ("locations", Some(EntityType::Location)),
    ("entities", None),
    ("candidates", None),
];

/// Item keys consumed into typed fields; everything else becomes an attribute.
const TYPED_KEYS: [&str; 13] = [
    "name",
    "type",
    "entity_type",
    "aliases",
    "formerly_known_as",
    "address",
    "contact",
    "phone",
    "email",
    "website",
    "confidence",
    "attributes",
    "id",
];

/// An item the parser could not use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedItem {
    /// Where the item sat, e.g. `companies[2]`.
    pub location: String,
    /// Why it was dropped.
    pub reason: String,
}

/// Result of parsing one reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionReport {
    /// Usable candidates, in document order.
    pub candidates: Vec<CandidateEntity>,
    /// Items that were dropped.
    pub skipped: Vec<SkippedItem>,
}

/// Parses a model reply into candidates.
///
/// Accepts an object with `companies`, `people`, `locations` or generic
/// `entities` arrays, or a bare array of entity objects. Items in the generic
/// arrays must carry their own `type`.
#[must_use]
pub fn parse_response(text: &str) -> ExtractionReport {
    let mut report = ExtractionReport::default();

    let Some(document) = find_json(text) else {
        warn!(
            target: TARGET_EXTRACTION,
            length = text.len(),
            "extractor reply contains no JSON document"
        );
        report.skipped.push(SkippedItem {
            location: "document".to_string(),
            reason: "no JSON document found".to_string(),
        });
        return report;
    };

    match document {
        Value::Array(items) => parse_section(&mut report, "entities", &items, None),
        Value::Object(sections) => {
            for (key, default_type) in SECTIONS {
                match sections.get(key) {
                    Some(Value::Array(items)) => parse_section(&mut report, key, items, default_type),
                    Some(Value::Null) | None => {}
                    Some(_) => report.skipped.push(SkippedItem {
                        location: key.to_string(),
                        reason: "expected an array".to_string(),
                    }),
                }
            }
        }
        _ => report.skipped.push(SkippedItem {
            location: "document".to_string(),
            reason: "expected an object or an array".to_string(),
        }),
    }

    debug!(
        target: TARGET_EXTRACTION,
        candidates = report.candidates.len(),
        skipped = report.skipped.len(),
        "parsed extractor reply"
    );
    report
}

fn parse_section(
    report: &mut ExtractionReport,
    section: &str,
    items: &[Value],
    default_type: Option<EntityType>,
) {
    for (index, item) in items.iter().enumerate() {
        match parse_item(item, default_type) {
            Ok(candidate) => report.candidates.push(candidate),
            Err(reason) => {
                let location = format!("{section}[{index}]");
                debug!(target: TARGET_EXTRACTION, %location, %reason, "skipped extracted item");
                report.skipped.push(SkippedItem { location, reason });
            }
        }
    }
}

/// Locates the JSON document in a reply: a fenced block if present, the
/// whole text if it parses, else the outermost braces or brackets.
fn find_json(text: &str) -> Option<Value> {
    let body = fenced_block(text).unwrap_or(text).trim();
    if let Ok(value) = serde_json::from_str(body) {
        return Some(value);
    }
    [('{', '}'), ('[', ']')].into_iter().find_map(|(open, close)| {
        let start = body.find(open)?;
        let end = body.rfind(close)?;
        (start < end)
            .then(|| serde_json::from_str(&body[start..=end]).ok())
            .flatten()
    })
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip the info string ("json") up to the end of the fence line.
    let body_start = after.find('\n').map_or(0, |i| i + 1);
    let body = &after[body_start..];
    let end = body.find("```").unwrap_or(body.len());
    Some(&body[..end])
}

fn parse_item(item: &Value, default_type: Option<EntityType>) -> Result<CandidateEntity, String> {
    let Value::Object(fields) = item else {
        return Err("item is not an object".to_string());
    };

    let name = text(fields, "name").ok_or_else(|| "missing name".to_string())?;

    let declared = text(fields, "type").or_else(|| text(fields, "entity_type"));
    let entity_type = match declared {
        Some(t) => EntityType::try_from(t)?,
        None => default_type.ok_or_else(|| "missing type".to_string())?,
    };

    let mut candidate = CandidateEntity::new(name, entity_type);
    for key in ["aliases", "formerly_known_as"] {
        candidate.aliases.extend(strings(fields.get(key)));
    }
    candidate.address = address(fields.get("address"));
    candidate.contact = contact(fields);
    if let Some(confidence) = fields.get("confidence").and_then(Value::as_f64) {
        candidate.confidence = confidence.clamp(0.0, 1.0);
    }
    if let Some(Value::Object(attributes)) = fields.get("attributes") {
        candidate.attributes.extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    candidate.attributes.extend(
        fields
            .iter()
            .filter(|(k, v)| !TYPED_KEYS.contains(&k.as_str()) && !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone())),
    );

    Ok(candidate)
}

fn text(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A string or an array of strings; anything else is ignored.
fn strings(value: Option<&Value>) -> Vec<String> {
    let trimmed = |v: &Value| {
        v.as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(trimmed).collect(),
        Some(v) => trimmed(v).into_iter().collect(),
        None => Vec::new(),
    }
}

fn address(value: Option<&Value>) -> Option<Address> {
    let address = match value? {
        Value::String(full) => Address {
            full_address: Some(full.trim().to_string()),
            ..Address::default()
        },
        v @ Value::Object(_) => serde_json::from_value(v.clone()).ok()?,
        _ => return None,
    };
    (!address.is_empty()).then_some(address)
}

/// The `contact` object, with top-level `phone`/`email`/`website` filling gaps.
fn contact(fields: &Map<String, Value>) -> Option<ContactInfo> {
    let mut contact: ContactInfo = fields
        .get("contact")
        .filter(|v| v.is_object())
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    if contact.phone.is_none() {
        contact.phone = text(fields, "phone");
    }
    if contact.email.is_none() {
        contact.email = text(fields, "email");
    }
    if contact.website.is_none() {
        contact.website = text(fields, "website");
    }
    (!contact.is_empty()).then_some(contact)
}
