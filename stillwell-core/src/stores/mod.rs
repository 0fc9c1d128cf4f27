//! Entity stores.
//!
//! Each store owns one local collection (two for rituals), writes to it
//! optimistically, and registers itself with the queue processor as the
//! executor for its entity's operations.

mod collection;
mod error;
mod journal;
mod mood;
mod ritual;

#[cfg(test)]
pub(crate) mod harness;

pub use collection::RecordStore;
pub use error::StoreError;
pub use journal::JournalStore;
pub use mood::MoodStore;
pub use ritual::{RitualReconcile, RitualStore};
