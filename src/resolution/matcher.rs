//! Blocking and scoring of canonical entities against a candidate.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;
use tracing::debug;

use crate::config::{MatchWeights, ResolverConfig};
use crate::entity::{Entity, EntityId};
use crate::storage::{EntityStore, StorageError};
use crate::TARGET_RESOLVER;

use super::blocking::block_keys;
use super::normalize::{normalize_entity, NormalizedAddress, NormalizedCandidate, NormalizedContact};

/// A field that contributed to a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    /// Root names are at all similar.
    Name,
    /// Address components overlap.
    Address,
    /// Same phone number.
    Phone,
    /// Same email address.
    Email,
}

/// One scored canonical entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    /// The scored canonical entity.
    pub entity_id: EntityId,
    /// Blended score in [0, 1].
    pub score: f64,
    /// Fields that contributed to the score.
    #[serde(default)]
    pub matched_on: BTreeSet<MatchField>,
    /// Best root-name similarity against the entity's primary name and aliases.
    pub name_score: f64,
    /// `None` when either side has no address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_score: Option<f64>,
    /// `None` when the two sides share no contact channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_score: Option<f64>,
    /// Address and contact evidence alone, ignoring the name.
    pub evidence: f64,
}

impl MatchCandidate {
    fn contact_component(&self) -> f64 {
        self.contact_score.unwrap_or(0.0)
    }

    /// Ranking order: score, then contact component, then smaller ID first.
    #[must_use]
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.contact_component().total_cmp(&self.contact_component()))
            .then_with(|| self.entity_id.cmp(&other.entity_id))
    }
}

fn tokens(root: &str) -> BTreeSet<&str> {
    root.split(' ').filter(|t| !t.is_empty()).collect()
}

#[allow(clippy::cast_precision_loss)]
fn jaccard(a: &BTreeSet<&str>, b: &BTreeSet<&str>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Similarity of two normalized root names in [0, 1].
///
/// The larger of normalized Levenshtein and token-set Jaccard, so both
/// character typos and reordered words score well.
#[must_use]
pub fn root_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    normalized_levenshtein(a, b).max(jaccard(&tokens(a), &tokens(b)))
}

/// Best similarity of the candidate's root name against any root of `entity`.
#[must_use]
pub fn name_similarity(candidate: &NormalizedCandidate, entity: &NormalizedCandidate) -> f64 {
    entity
        .name_roots()
        .map(|root| root_similarity(&candidate.name.root, root))
        .fold(0.0, f64::max)
}

fn address_similarity(a: &NormalizedAddress, b: &NormalizedAddress) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    if let (Some(pa), Some(pb)) = (&a.postal_code, &b.postal_code) {
        if pa == pb {
            return Some(1.0);
        }
    }
    Some(jaccard(&a.locality_tokens(), &b.locality_tokens()))
}

fn contact_similarity(a: &NormalizedContact, b: &NormalizedContact) -> (Option<f64>, bool, bool) {
    let phone = match (&a.phone, &b.phone) {
        (Some(x), Some(y)) => Some(x == y),
        _ => None,
    };
    let email = match (&a.email, &b.email) {
        (Some(x), Some(y)) => Some(x == y),
        _ => None,
    };
    let phone_hit = phone == Some(true);
    let email_hit = email == Some(true);

    let score = if phone.is_none() && email.is_none() {
        None
    } else if phone_hit || email_hit {
        Some(1.0)
    } else {
        Some(0.0)
    };
    (score, phone_hit, email_hit)
}

/// Weighted mean over the applicable components only.
fn weighted_mean(parts: &[(f64, Option<f64>)]) -> f64 {
    let (total, weight) = parts
        .iter()
        .filter_map(|(w, s)| s.map(|s| (w * s, *w)))
        .fold((0.0, 0.0), |(t, w), (ts, ws)| (t + ts, w + ws));
    if weight <= 0.0 {
        0.0
    } else {
        (total / weight).clamp(0.0, 1.0)
    }
}

/// Scores candidates against canonical entities.
#[derive(Debug, Clone)]
pub struct Matcher {
    weights: MatchWeights,
    min_score: f64,
    max_candidates: usize,
}

impl Matcher {
    /// Creates a matcher from the resolver configuration.
    #[must_use]
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            weights: config.weights,
            min_score: config.min_score,
            max_candidates: config.max_candidates,
        }
    }

    /// Scores one entity. Never fails: missing data lowers the score.
    #[must_use]
    pub fn score(&self, candidate: &NormalizedCandidate, entity: &Entity) -> MatchCandidate {
        let stored = normalize_entity(entity);
        let w = self.weights;

        let name_score = name_similarity(candidate, &stored);
        let address_score = address_similarity(&candidate.address, &stored.address);
        let (contact_score, phone_hit, email_hit) =
            contact_similarity(&candidate.contact, &stored.contact);

        let score = weighted_mean(&[
            (w.name, Some(name_score)),
            (w.address, address_score),
            (w.contact, contact_score),
        ]);
        let evidence = weighted_mean(&[(w.address, address_score), (w.contact, contact_score)]);

        let mut matched_on = BTreeSet::new();
        if name_score > 0.0 {
            matched_on.insert(MatchField::Name);
        }
        if address_score.is_some_and(|s| s > 0.0) {
            matched_on.insert(MatchField::Address);
        }
        if phone_hit {
            matched_on.insert(MatchField::Phone);
        }
        if email_hit {
            matched_on.insert(MatchField::Email);
        }

        MatchCandidate {
            entity_id: entity.id.clone(),
            score,
            matched_on,
            name_score,
            address_score,
            contact_score,
            evidence,
        }
    }

    /// Scores `entities`, drops those under the minimum score, and orders the
    /// rest best first. Entities are returned alongside their scores.
    #[must_use]
    pub fn rank(
        &self,
        candidate: &NormalizedCandidate,
        entities: Vec<Entity>,
    ) -> Vec<(MatchCandidate, Entity)> {
        let mut scored: Vec<(MatchCandidate, Entity)> = entities
            .into_iter()
            .map(|entity| (self.score(candidate, &entity), entity))
            .filter(|(m, _)| m.score >= self.min_score)
            .collect();
        scored.sort_by(|(a, _), (b, _)| a.rank_cmp(b));
        scored.truncate(self.max_candidates);
        scored
    }

    /// Blocks against `store` and ranks the block.
    ///
    /// A candidate without a type matches nothing.
    pub fn find_matches(
        &self,
        candidate: &NormalizedCandidate,
        store: &dyn EntityStore,
    ) -> Result<Vec<MatchCandidate>, StorageError> {
        Ok(self
            .block_and_rank(candidate, store)?
            .into_iter()
            .map(|(m, _)| m)
            .collect())
    }

    pub(crate) fn block_and_rank(
        &self,
        candidate: &NormalizedCandidate,
        store: &dyn EntityStore,
    ) -> Result<Vec<(MatchCandidate, Entity)>, StorageError> {
        let Some(entity_type) = candidate.entity_type else {
            return Ok(Vec::new());
        };
        let keys = block_keys(candidate);
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let block = store.find_block(entity_type, &keys)?;
        let block_size = block.len();
        let ranked = self.rank(candidate, block);
        debug!(
            target: TARGET_RESOLVER,
            keys = keys.len(),
            block_size,
            above_min = ranked.len(),
            best = ranked.first().map(|(m, _)| m.score),
            "candidate blocked and scored"
        );
        Ok(ranked)
    }
}
