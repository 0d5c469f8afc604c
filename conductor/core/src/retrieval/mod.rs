//! Retrieval
//!
//! Dual-tier context lookup: a private index per domain and one shared
//! global index.

mod index;
mod passage;
mod store;

pub use index::{InMemoryPassageIndex, PassageId, PassageIndex};
pub use passage::{ContextBundle, Passage};
pub use store::{InMemoryIndexes, RetrievalStats, RetrievalStore};
