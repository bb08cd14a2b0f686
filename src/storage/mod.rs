//! Entity storage.
//!
//! [`EntityStore`] is the abstract interface the resolver reads and writes
//! through. [`InMemoryEntityStore`] is the embedded implementation; the
//! `persistent` feature adds a durable, WAL-backed store on top of it.

mod locks;
mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::{InMemoryEntityStore, StoreSnapshot};
pub use traits::{EntityMutation, EntityStore, Journal, StorageError, StoreEvent};
