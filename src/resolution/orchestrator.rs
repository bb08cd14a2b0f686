//! The resolver: normalize, match, detect, decide.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::audit::AuditSink;
use crate::config::ResolverConfig;
use crate::entity::{CandidateEntity, Entity, EntityId};
use crate::error::ResolveResult;
use crate::mapping::{MappingResult, ResolutionOutcome};
use crate::storage::{EntityMutation, EntityStore, StorageError};
use crate::TARGET_RESOLVER;

use super::detector::NameChangeDetector;
use super::matcher::{MatchCandidate, Matcher};
use super::normalize::{normalize, NormalizedCandidate};

/// Maps extracted candidates onto canonical entities.
///
/// Cheap to clone; clones share the store. Independent candidates may be
/// resolved from many threads at once; the store serializes updates to any
/// single entity.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn EntityStore>,
    config: ResolverConfig,
    matcher: Matcher,
    detector: NameChangeDetector,
    audit: Option<Arc<dyn AuditSink>>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("config", &self.config)
            .field("audited", &self.audit.is_some())
            .finish_non_exhaustive()
    }
}

impl Resolver {
    /// Creates a resolver with the default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self::build(store, ResolverConfig::default())
    }

    /// Creates a resolver with a custom configuration.
    ///
    /// # Errors
    /// Returns a validation error if the configuration is out of range.
    pub fn with_config(store: Arc<dyn EntityStore>, config: ResolverConfig) -> ResolveResult<Self> {
        Ok(Self::build(store, config.validate()?))
    }

    fn build(store: Arc<dyn EntityStore>, config: ResolverConfig) -> Self {
        Self {
            matcher: Matcher::new(&config),
            detector: NameChangeDetector::new(&config),
            store,
            config,
            audit: None,
        }
    }

    /// Appends every result this resolver produces to `sink`.
    #[must_use]
    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// The store resolutions read and update.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Scores a candidate without touching the store.
    ///
    /// # Errors
    /// Validation errors for a malformed candidate; store errors.
    pub fn find_matches(&self, candidate: &CandidateEntity) -> ResolveResult<Vec<MatchCandidate>> {
        candidate.validate()?;
        Ok(self.matcher.find_matches(&normalize(candidate), self.store.as_ref())?)
    }

    /// Registers a candidate as a new canonical entity.
    ///
    /// The resolver never does this on its own; callers decide when a
    /// no-match should become a new record.
    ///
    /// # Errors
    /// Validation errors for a malformed candidate; store errors, including
    /// an alias conflict with an existing entity.
    pub fn create_entity(&self, candidate: &CandidateEntity) -> ResolveResult<EntityId> {
        let entity = candidate.to_entity(EntityId::new())?;
        let id = self.store.create(entity)?;
        info!(target: TARGET_RESOLVER, entity_id = %id, name = %candidate.name, "canonical entity created");
        Ok(id)
    }

    /// Resolves one candidate.
    ///
    /// Updates the matched entity (alias or name change) inside the store's
    /// per-entity update scope. No-match and ambiguous results leave the store
    /// untouched.
    ///
    /// # Errors
    /// - Validation errors when the name or type is missing, or the extraction
    ///   confidence is out of range
    /// - `StoreUnavailable` when the store cannot be reached; nothing is
    ///   committed in that case
    pub fn resolve(&self, candidate: CandidateEntity) -> ResolveResult<MappingResult> {
        let started = Instant::now();
        candidate.validate()?;

        let normalized = normalize(&candidate);
        let ranked = self.matcher.block_and_rank(&normalized, self.store.as_ref())?;

        let result = match ranked.first() {
            None => MappingResult::no_match(candidate),
            Some((best, _)) if self.is_ambiguous(&ranked) => {
                let contenders: Vec<MatchCandidate> = ranked
                    .iter()
                    .take_while(|(m, _)| best.score - m.score < self.config.ambiguity_margin)
                    .map(|(m, _)| m.clone())
                    .collect();
                warn!(
                    target: TARGET_RESOLVER,
                    name = %candidate.name,
                    contenders = contenders.len(),
                    top_score = best.score,
                    "ambiguous match flagged for review"
                );
                let confidence = self.confidence(best.score, &normalized);
                MappingResult::ambiguous(candidate, confidence, contenders)
            }
            Some((best, entity)) => self.decide(candidate, &normalized, best, entity)?,
        };

        debug!(
            target: TARGET_RESOLVER,
            outcome = %result.outcome,
            entity_id = ?result.mapped_entity_id.as_ref().map(EntityId::as_str),
            confidence = result.confidence,
            elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
            "resolved candidate"
        );
        self.write_audit(&result);
        Ok(result)
    }

    /// A failed audit write is logged; the resolution itself has already
    /// been committed.
    fn write_audit(&self, result: &MappingResult) {
        if let Some(sink) = &self.audit {
            if let Err(e) = sink.record(result) {
                warn!(target: TARGET_RESOLVER, error = %e, "failed to write audit record");
            }
        }
    }

    fn is_ambiguous(&self, ranked: &[(MatchCandidate, Entity)]) -> bool {
        match ranked {
            [(best, _), (runner_up, _), ..] => {
                best.score - runner_up.score < self.config.ambiguity_margin
            }
            _ => false,
        }
    }

    /// Scales a match score by the extractor's own confidence.
    fn confidence(&self, score: f64, candidate: &NormalizedCandidate) -> f64 {
        let w = self.config.extraction_weight;
        (score * (1.0 - w + w * candidate.confidence)).clamp(0.0, 1.0)
    }

    fn decide(
        &self,
        candidate: CandidateEntity,
        normalized: &NormalizedCandidate,
        best: &MatchCandidate,
        entity: &Entity,
    ) -> ResolveResult<MappingResult> {
        let name_change = self
            .detector
            .detect(normalized, &candidate.name, best, entity);

        let mut mutations = Vec::new();
        let (outcome, raw_score) = if let Some(change) = &name_change {
            mutations.push(EntityMutation::RecordNameChange {
                change: change.clone(),
            });
            if !entity.knows_name(&candidate.name) {
                mutations.push(EntityMutation::AddAlias {
                    alias: candidate.name.trim().to_string(),
                });
            }
            (ResolutionOutcome::NameChangeRecorded, best.score.max(best.evidence))
        } else if self.detector.is_variant(&candidate.name, best, entity) {
            mutations.push(EntityMutation::AddAlias {
                alias: candidate.name.trim().to_string(),
            });
            (ResolutionOutcome::AliasAdded, best.score)
        } else {
            (ResolutionOutcome::NoOp, best.score)
        };
        let confidence = self.confidence(raw_score, normalized);

        let updated = if mutations.is_empty() {
            entity.clone()
        } else {
            match self.store.apply_mutation(&entity.id, &mutations) {
                Ok(updated) => updated,
                Err(StorageError::AliasConflict { alias, owner }) => {
                    warn!(
                        target: TARGET_RESOLVER,
                        entity_id = %entity.id,
                        alias = %alias,
                        owner = %owner,
                        "update blocked by alias conflict; flagged for review"
                    );
                    let mut result = MappingResult::matched(
                        candidate,
                        entity.id.clone(),
                        entity.primary_name.as_str(),
                        confidence,
                        ResolutionOutcome::ReviewRequired,
                    );
                    if let Some(change) = name_change {
                        result = result.with_name_change(change);
                    }
                    return Ok(result);
                }
                Err(e) => return Err(e.into()),
            }
        };

        if let Some(change) = &name_change {
            info!(
                target: TARGET_RESOLVER,
                entity_id = %updated.id,
                previous = %change.previous_name,
                current = %change.current_name,
                evidence = change.confidence,
                "name change recorded"
            );
        }

        let mut result = MappingResult::matched(
            candidate,
            updated.id.clone(),
            updated.primary_name.as_str(),
            confidence,
            outcome,
        );
        if let Some(change) = name_change {
            result = result.with_name_change(change);
        }
        Ok(result)
    }
}
