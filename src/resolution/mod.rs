//! Entity resolution pipeline.
//!
//! A candidate flows one way: [`normalize`] → [`Matcher`] (blocking and
//! scoring against the store) → [`NameChangeDetector`] → [`Resolver`], which
//! decides and writes back through the store.

pub mod blocking;
pub mod detector;
pub mod matcher;
pub mod normalize;
pub mod orchestrator;

pub use blocking::{block_keys, BlockKey};
pub use detector::NameChangeDetector;
pub use matcher::{MatchCandidate, MatchField, Matcher};
pub use normalize::{normalize, normalize_entity, NormalizedCandidate};
pub use orchestrator::Resolver;
