//! Boundary with the document extractor.
//!
//! Vision-model calls happen outside this crate. What lives here is the
//! contract with them: which provider and model to use, the prompt the
//! extractor sends, and a tolerant parser turning the model's JSON reply
//! into [`CandidateEntity`] values.

mod parse;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::CandidateEntity;
use crate::error::ValidationError;

pub use parse::{parse_response, ExtractionReport, SkippedItem};

/// Instructions sent to the vision model along with each document page.
pub const EXTRACTION_PROMPT: &str = "\
Extract all entities from this transportation/logistics document, including:

1. Companies (carriers, brokers, shippers, consignees)
2. People (drivers, contacts)
3. Locations (addresses, origin, destination)
4. Identifiers (order numbers, BOL numbers, tracking numbers)
5. Financial information (rates, amounts, payment terms)
6. Dates and times
7. Product information

Pay special attention to:
- Company name changes, acquisitions, affiliations (\"a division of\", \"formerly known as\", etc.)
- All contact information
- Complete addresses

Format as JSON with top-level \"companies\", \"people\" and \"locations\" arrays. \
Give every item a \"name\", plus \"aliases\", \"address\", \"contact\" and a \
\"confidence\" between 0 and 1 where known.";

/// Errors at the extraction boundary.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The provider name is not one this crate knows.
    #[error("Unsupported provider '{name}'. Use one of openai, anthropic, gemini")]
    UnsupportedProvider {
        /// The name as given.
        name: String,
    },

    /// The detail level is not `high`, `medium` or `low`.
    #[error("Unknown detail level '{value}'. Use one of high, medium, low")]
    InvalidDetailLevel {
        /// The value as given.
        value: String,
    },

    /// A saved response could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Vision-model vendor.
///
/// Always named explicitly in configuration, never guessed from the model
/// string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI vision models.
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic vision models.
    Anthropic,
    /// Google Gemini vision models.
    Gemini,
}

impl ProviderKind {
    /// Configuration name of the provider.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ExtractionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::OpenAi, Self::Anthropic, Self::Gemini]
            .into_iter()
            .find(|p| s.trim().eq_ignore_ascii_case(p.as_str()))
            .ok_or_else(|| ExtractionError::UnsupportedProvider {
                name: s.to_string(),
            })
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How closely the model should inspect the page image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    /// Full-resolution inspection.
    #[default]
    High,
    /// Balanced cost and detail.
    Medium,
    /// Downscaled, cheapest.
    Low,
}

impl DetailLevel {
    /// Configuration name of the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl FromStr for DetailLevel {
    type Err = ExtractionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::High, Self::Medium, Self::Low]
            .into_iter()
            .find(|d| s.trim().eq_ignore_ascii_case(d.as_str()))
            .ok_or_else(|| ExtractionError::InvalidDetailLevel {
                value: s.to_string(),
            })
    }
}

/// API credential. Never printed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wraps a secret.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The secret, for building the provider request.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// True for a blank secret.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Settings for a document extractor.
///
/// Everything is passed in explicitly; nothing is read from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    /// Vendor to call.
    pub provider: ProviderKind,
    /// Provider-specific model name, passed through untouched.
    pub model: String,
    /// API key for the provider.
    pub credential: Credential,
    /// Image detail requested from the model.
    #[serde(default)]
    pub detail_level: DetailLevel,
}

impl ExtractorConfig {
    /// Creates a configuration at the default detail level.
    #[must_use]
    pub fn new(provider: ProviderKind, model: impl Into<String>, credential: Credential) -> Self {
        Self {
            provider,
            model: model.into(),
            credential,
            detail_level: DetailLevel::default(),
        }
    }

    /// Sets the detail level.
    #[must_use]
    pub fn with_detail_level(mut self, detail_level: DetailLevel) -> Self {
        self.detail_level = detail_level;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    /// `InvalidConfig` if the model name or credential is blank.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.model.trim().is_empty() {
            return Err(ValidationError::InvalidConfig {
                reason: "extractor model cannot be empty".to_string(),
            });
        }
        if self.credential.is_empty() {
            return Err(ValidationError::InvalidConfig {
                reason: format!("no credential configured for {}", self.provider),
            });
        }
        Ok(self)
    }
}

/// Anything that yields extracted candidates.
pub trait CandidateSource {
    /// Produces the candidates, with a note for every item that was dropped.
    ///
    /// # Errors
    /// Only when the source itself cannot be read. Malformed content is
    /// reported in the [`ExtractionReport`], never as an error.
    fn candidates(&self) -> Result<ExtractionReport, ExtractionError>;
}

/// A saved model response (or a plain JSON candidate list) on disk.
#[derive(Debug, Clone)]
pub struct JsonResponseSource {
    path: PathBuf,
}

impl JsonResponseSource {
    /// A source reading the file at `path`.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The file this source reads.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CandidateSource for JsonResponseSource {
    fn candidates(&self) -> Result<ExtractionReport, ExtractionError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| ExtractionError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(parse_response(&text))
    }
}

impl CandidateSource for Vec<CandidateEntity> {
    fn candidates(&self) -> Result<ExtractionReport, ExtractionError> {
        Ok(ExtractionReport {
            candidates: self.clone(),
            skipped: Vec::new(),
        })
    }
}
