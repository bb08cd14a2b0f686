//! Entity layer modules.
//!
//! This module groups canonical entities, extracted candidates, their
//! address/contact profile, and name-change provenance.

pub mod candidate;
pub mod entity;
pub mod name_change;
pub mod profile;

pub use candidate::CandidateEntity;
pub use entity::{Entity, EntityId, EntityType};
pub use name_change::NameChange;
pub use profile::{Address, ContactInfo};
