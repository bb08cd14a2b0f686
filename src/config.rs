//! Resolver configuration.
//!
//! Every threshold the resolver uses is tunable here. Defaults are
//! conservative starting points for carrier/broker records on freight
//! documents.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Relative weights of the scoring components.
///
/// Weights are applied only to components both sides carry data for and the
/// sum is renormalized over those, so the absolute scale does not matter;
/// only the ratios do.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchWeights {
    /// Weight of root-name similarity.
    pub name: f64,
    /// Weight of address agreement.
    pub address: f64,
    /// Weight of phone, email and website agreement.
    pub contact: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            name: 0.5,
            address: 0.25,
            contact: 0.25,
        }
    }
}

/// Thresholds and weights for a [`Resolver`](crate::Resolver).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Matches scoring below this are dropped.
    pub min_score: f64,
    /// Address+contact evidence required before a differing name is treated
    /// as a rename of the matched entity.
    pub strong_evidence: f64,
    /// Top-two score gap below which the result is flagged for review.
    pub ambiguity_margin: f64,
    /// Name similarity at or above which a differing name is a spelling
    /// variant (alias) rather than a rename.
    pub variant_similarity: f64,
    /// How strongly the extractor's confidence scales the reported confidence.
    /// `0.0` ignores it, `1.0` multiplies by it.
    pub extraction_weight: f64,
    /// Component weights of the match score.
    pub weights: MatchWeights,
    /// Upper bound on the number of scored candidates kept per resolution.
    pub max_candidates: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_score: 0.3,
            strong_evidence: 0.5,
            ambiguity_margin: 0.05,
            variant_similarity: 0.85,
            extraction_weight: 0.2,
            weights: MatchWeights::default(),
            max_candidates: 25,
        }
    }
}

fn unit_interval(name: &str, value: f64) -> Result<(), ValidationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidConfig {
            reason: format!("{name} must be within [0.0, 1.0] (got {value})"),
        })
    }
}

impl ResolverConfig {
    /// Validates the configuration, returning it unchanged on success.
    ///
    /// # Errors
    /// `InvalidConfig` if a threshold lies outside [0.0, 1.0], a weight is
    /// negative, the name weight is zero, or `max_candidates` is zero.
    pub fn validate(self) -> Result<Self, ValidationError> {
        unit_interval("min_score", self.min_score)?;
        unit_interval("strong_evidence", self.strong_evidence)?;
        unit_interval("ambiguity_margin", self.ambiguity_margin)?;
        unit_interval("variant_similarity", self.variant_similarity)?;
        unit_interval("extraction_weight", self.extraction_weight)?;

        let w = self.weights;
        for (name, value) in [("weights.name", w.name), ("weights.address", w.address), ("weights.contact", w.contact)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::InvalidConfig {
                    reason: format!("{name} must be a non-negative number (got {value})"),
                });
            }
        }
        if w.name <= 0.0 {
            return Err(ValidationError::InvalidConfig {
                reason: "weights.name must be positive; name similarity always contributes".to_string(),
            });
        }

        if self.max_candidates == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "max_candidates must be at least 1".to_string(),
            });
        }

        Ok(self)
    }

    /// Parses a JSON configuration document and validates it.
    ///
    /// Missing keys fall back to defaults.
    ///
    /// # Errors
    /// `InvalidConfig` for malformed JSON or out-of-range values.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("malformed resolver config: {e}"),
        })?;
        cfg.validate()
    }
}
