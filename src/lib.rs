//! # entity-resolver
//!
//! Maps business entities extracted from logistics documents (bills of
//! lading, rate confirmations, invoices) onto canonical records, recording
//! aliases and name changes as they are observed.
//!
//! ## Core Concepts
//!
//! - **Canonical entity**: the single stored record for a real-world company or person
//! - **Candidate**: a freshly extracted, unverified entity awaiting resolution
//! - **Alias**: an alternate name of a canonical entity (spelling variant, DBA)
//! - **Name change**: a dated record that an entity now trades under a new name
//! - **Mapping result**: the immutable outcome of resolving one candidate
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use entity_resolver::{
//!     Address, CandidateEntity, ContactInfo, Entity, EntityStore, EntityType,
//!     InMemoryEntityStore, Resolver,
//! };
//!
//! let store = Arc::new(InMemoryEntityStore::new());
//! store
//!     .create(
//!         Entity::with_id("E2", "Acme Corp", EntityType::Company)
//!             .with_address(Address::postal("64111"))
//!             .with_contact(ContactInfo::phone("8885646546")),
//!     )
//!     .unwrap();
//!
//! let resolver = Resolver::new(store);
//! let result = resolver
//!     .resolve(
//!         CandidateEntity::company("Acme Holdings LLC")
//!             .with_address(Address::postal("64111"))
//!             .with_contact(ContactInfo::phone("888-564-6546")),
//!     )
//!     .unwrap();
//!
//! assert_eq!(result.mapped_entity_id.unwrap().as_str(), "E2");
//! assert!(result.name_change_detected);
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, deny(missing_docs))]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod audit;
pub mod config;
pub mod entity;
pub mod error;
pub mod extraction;
pub mod mapping;
pub mod resolution;
pub mod runtime;
pub mod storage;

/// Log target for resolution decisions.
pub const TARGET_RESOLVER: &str = "resolver";

/// Log target for store mutations and persistence.
pub const TARGET_STORE: &str = "store";

/// Log target for parsing extractor output.
pub const TARGET_EXTRACTION: &str = "extraction";

/// Crate version, as reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use audit::{AuditRecord, AuditSink, MemoryAuditLog};
pub use config::{MatchWeights, ResolverConfig};
pub use entity::{Address, CandidateEntity, ContactInfo, Entity, EntityId, EntityType, NameChange};
pub use error::{ExecutionError, ResolveError, ResolveResult, ValidationError};
pub use extraction::{CandidateSource, ExtractionReport, JsonResponseSource};
pub use mapping::{MappingResult, ResolutionOutcome};
pub use resolution::{MatchCandidate, MatchField, Resolver};
pub use runtime::{ResolutionHandle, ResolverRuntime, RuntimeConfig};
pub use storage::{EntityMutation, EntityStore, InMemoryEntityStore, StorageError};
