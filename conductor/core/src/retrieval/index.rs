//! Passage indexes
//!
//! [`PassageIndex`] is the read seam the store searches through. The bundled
//! [`InMemoryPassageIndex`] scores by term overlap and keeps a bounded,
//! insertion-ordered list so equal scores rank oldest first.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::passage::Passage;
use crate::routing::keywords::tokenize;

/// One searchable tier
#[async_trait]
pub trait PassageIndex: Send + Sync {
    /// Top `k` passages for `query`, best first, scores in `[0, 1]`
    async fn search(&self, query: &str, k: usize) -> Vec<Passage>;

    /// Number of stored passages
    fn len(&self) -> usize;

    /// Whether the index is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Identifier of an ingested passage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassageId(u64);

struct StoredPassage {
    id: PassageId,
    text: String,
    source_tag: String,
    terms: HashSet<String>,
}

#[derive(Default)]
struct IndexState {
    passages: VecDeque<StoredPassage>,
    next_id: u64,
}

/// Bounded in-memory index scored by query-term overlap
pub struct InMemoryPassageIndex {
    state: RwLock<IndexState>,
    capacity: usize,
}

impl InMemoryPassageIndex {
    /// Index holding at most `capacity` passages (oldest dropped first)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
            capacity: capacity.max(1),
        }
    }

    /// Ingest a passage
    pub fn insert(&self, text: impl Into<String>, source_tag: impl Into<String>) -> PassageId {
        let text = text.into();
        let terms = tokenize(&text).into_iter().collect();
        let mut state = self.state.write();

        let id = PassageId(state.next_id);
        state.next_id += 1;
        if state.passages.len() >= self.capacity {
            state.passages.pop_front();
        }
        state.passages.push_back(StoredPassage {
            id,
            text,
            source_tag: source_tag.into(),
            terms,
        });
        id
    }

    /// Remove a passage; returns false if it was not present
    pub fn remove(&self, id: PassageId) -> bool {
        let mut state = self.state.write();
        let before = state.passages.len();
        state.passages.retain(|p| p.id != id);
        state.passages.len() != before
    }

    /// Drop every passage
    pub fn clear(&self) {
        self.state.write().passages.clear();
    }

    /// Maximum passages retained
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[allow(clippy::cast_precision_loss)]
    fn rank(&self, query: &str, k: usize) -> Vec<Passage> {
        let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
        if query_terms.is_empty() || k == 0 {
            return Vec::new();
        }

        let state = self.state.read();
        let mut scored: Vec<(f32, &StoredPassage)> = state
            .passages
            .iter()
            .filter_map(|p| {
                let overlap = query_terms.intersection(&p.terms).count();
                (overlap > 0).then(|| (overlap as f32 / query_terms.len() as f32, p))
            })
            .collect();

        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .take(k)
            .map(|(score, p)| Passage {
                text: p.text.clone(),
                score: score.clamp(0.0, 1.0),
                source_tag: p.source_tag.clone(),
            })
            .collect()
    }
}

impl std::fmt::Debug for InMemoryPassageIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPassageIndex")
            .field("len", &self.state.read().passages.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[async_trait]
impl PassageIndex for InMemoryPassageIndex {
    async fn search(&self, query: &str, k: usize) -> Vec<Passage> {
        self.rank(query, k)
    }

    fn len(&self) -> usize {
        self.state.read().passages.len()
    }
}
