//! Two-tier retrieval store
//!
//! Every domain owns a private local index; all domains share one global
//! index. Tiers are ranked independently and never re-ranked against each
//! other. Indexes are wired at startup; ingestion goes through the index
//! handles, not through the store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use super::index::{InMemoryPassageIndex, PassageIndex};
use super::passage::ContextBundle;
use crate::config::RetrievalConfig;

/// Document counts per tier
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RetrievalStats {
    /// Passages in the global tier
    pub global_documents: usize,
    /// Passages per domain-local tier
    pub local_documents: BTreeMap<String, usize>,
}

/// Global index plus one local index per domain
pub struct RetrievalStore {
    global: Arc<dyn PassageIndex>,
    local: HashMap<String, Arc<dyn PassageIndex>>,
}

impl RetrievalStore {
    /// Store searching `global` with no local tiers yet
    pub fn new(global: Arc<dyn PassageIndex>) -> Self {
        Self {
            global,
            local: HashMap::new(),
        }
    }

    /// Store with empty in-memory indexes for each of `domain_ids`
    ///
    /// Returns the store plus the concrete index handles for ingestion.
    pub fn in_memory<'a>(
        config: &RetrievalConfig,
        domain_ids: impl IntoIterator<Item = &'a str>,
    ) -> (Self, InMemoryIndexes) {
        let global = Arc::new(InMemoryPassageIndex::new(config.max_global_passages));
        let mut store = Self::new(Arc::clone(&global) as Arc<dyn PassageIndex>);
        let mut local = HashMap::new();
        for domain_id in domain_ids {
            let index = Arc::new(InMemoryPassageIndex::new(config.max_local_passages));
            store = store.with_local(domain_id, Arc::clone(&index) as Arc<dyn PassageIndex>);
            local.insert(domain_id.to_string(), index);
        }
        (store, InMemoryIndexes { global, local })
    }

    /// Attach the local index for `domain_id`
    #[must_use]
    pub fn with_local(mut self, domain_id: impl Into<String>, index: Arc<dyn PassageIndex>) -> Self {
        self.local.insert(domain_id.into(), index);
        self
    }

    /// Top `k` passages per tier for `query` within `domain_id`
    ///
    /// A domain without a local index gets an empty local tier.
    pub async fn retrieve(&self, query: &str, domain_id: &str, k: usize) -> ContextBundle {
        let local = async {
            match self.local.get(domain_id) {
                Some(index) => index.search(query, k).await,
                None => Vec::new(),
            }
        };
        let global = self.global.search(query, k);
        let (local_passages, global_passages) = tokio::join!(local, global);

        tracing::debug!(
            domain_id,
            local = local_passages.len(),
            global = global_passages.len(),
            "Retrieved context"
        );

        ContextBundle {
            local_passages,
            global_passages,
        }
    }

    /// Document counts per tier
    #[must_use]
    pub fn stats(&self) -> RetrievalStats {
        RetrievalStats {
            global_documents: self.global.len(),
            local_documents: self
                .local
                .iter()
                .map(|(id, index)| (id.clone(), index.len()))
                .collect(),
        }
    }
}

impl std::fmt::Debug for RetrievalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalStore")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Ingestion handles for an in-memory store
#[derive(Debug, Clone)]
pub struct InMemoryIndexes {
    /// Shared tier
    pub global: Arc<InMemoryPassageIndex>,
    /// Domain-local tiers
    pub local: HashMap<String, Arc<InMemoryPassageIndex>>,
}
