//! Passages and context bundles

use serde::{Deserialize, Serialize};

/// A scored unit of retrieved text
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Passage text
    pub text: String,
    /// Relevance in `[0, 1]`
    pub score: f32,
    /// Where the passage came from (document, tier)
    pub source_tag: String,
}

/// Context retrieved for one request, per tier
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Domain-private passages, best first
    pub local_passages: Vec<Passage>,
    /// Shared passages, best first
    pub global_passages: Vec<Passage>,
}

impl ContextBundle {
    /// Whether neither tier returned anything
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.local_passages.is_empty() && self.global_passages.is_empty()
    }

    /// Total passages across tiers
    #[must_use]
    pub fn len(&self) -> usize {
        self.local_passages.len() + self.global_passages.len()
    }

    /// Local passages followed by global ones
    pub fn iter(&self) -> impl Iterator<Item = &Passage> {
        self.local_passages.iter().chain(&self.global_passages)
    }

    /// Serialize for a prompt: one `[source] text` line per passage, local first
    #[must_use]
    pub fn render(&self) -> String {
        self.iter()
            .map(|p| format!("[{}] {}", p.source_tag, p.text.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
