//! Intent Router
//!
//! Maps a query to a domain:
//!
//! ```text
//! query ──► embed ──► cosine vs. every domain ──► best ≥ threshold? ──► classifier
//!                                                     │ no
//!                                                     ▼
//!                                    keyword hits per domain ──► max > 0? ──► keyword-fallback
//!                                                     │ no
//!                                                     ▼
//!                                                 escalated
//! ```
//!
//! Equal classifier scores resolve to the earliest registered domain. Keyword
//! ties follow [`TieBreak`], registration order by default.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::decision::{RoutingDecision, RoutingMethod};
use super::keywords::{distinct_tokens, keyword_hits, tokenize};
use super::similarity::cosine_similarity;
use crate::backend::EmbeddingProvider;
use crate::config::{RouterConfig, TieBreak};
use crate::domain::{DomainDescriptor, DomainRegistry};

/// Classifies queries against a domain registry
pub struct IntentRouter {
    registry: Arc<DomainRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: RouterConfig,
}

impl IntentRouter {
    /// Create a router over `registry`
    pub fn new(
        registry: Arc<DomainRegistry>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            embedder,
            config,
        }
    }

    /// Registry this router reads
    #[must_use]
    pub fn registry(&self) -> &Arc<DomainRegistry> {
        &self.registry
    }

    /// Router settings
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Classify `query`
    ///
    /// An embedding failure skips the classifier stage; keyword fallback
    /// still runs.
    pub async fn classify(&self, query: &str) -> RoutingDecision {
        if query.trim().is_empty() {
            tracing::debug!("Empty query escalated");
            return RoutingDecision::escalated(0.0, BTreeMap::new());
        }

        let vector = match self.embedder.embed(query).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(error = %e, "Query embedding failed, using keyword fallback only");
                None
            }
        };

        self.decide(query, vector.as_deref())
    }

    /// Decide from an already computed query vector
    #[must_use]
    pub fn decide(&self, query: &str, query_vector: Option<&[f32]>) -> RoutingDecision {
        if query.trim().is_empty() {
            return RoutingDecision::escalated(0.0, BTreeMap::new());
        }

        let mut scores = BTreeMap::new();
        let mut best: Option<(&DomainDescriptor, f32)> = None;
        if let Some(vector) = query_vector {
            for domain in self.registry.iter() {
                let Some(score) = cosine_similarity(vector, &domain.description_vector) else {
                    continue;
                };
                scores.insert(domain.id.clone(), score);
                if best.map_or(true, |(_, top)| score > top) {
                    best = Some((domain, score));
                }
            }
        }

        let best_score = best.map_or(0.0, |(_, score)| score);
        if let Some((domain, score)) = best {
            if score >= self.config.primary_threshold {
                tracing::debug!(domain = %domain.id, score, "Routed by classifier");
                return RoutingDecision {
                    domain_id: Some(domain.id.clone()),
                    confidence: score,
                    method: RoutingMethod::Classifier,
                    scores,
                    keyword_hits: 0,
                };
            }
        }

        if self.config.keyword_fallback {
            if let Some((domain, hits, confidence)) = self.keyword_fallback(query, &scores) {
                tracing::debug!(
                    domain = %domain.id,
                    hits,
                    best_score,
                    threshold = self.config.primary_threshold,
                    "Routed by keyword fallback"
                );
                return RoutingDecision {
                    domain_id: Some(domain.id.clone()),
                    confidence,
                    method: RoutingMethod::KeywordFallback,
                    scores,
                    keyword_hits: hits,
                };
            }
        }

        tracing::debug!(best_score, "No confident domain, escalating");
        RoutingDecision::escalated(best_score, scores)
    }

    /// Domain with the most keyword hits, its hit count and confidence
    #[allow(clippy::cast_precision_loss)]
    fn keyword_fallback(
        &self,
        query: &str,
        scores: &BTreeMap<String, f32>,
    ) -> Option<(&DomainDescriptor, usize, f32)> {
        let tokens = tokenize(query);
        let distinct = distinct_tokens(&tokens);
        if distinct == 0 {
            return None;
        }

        let hits: Vec<(&DomainDescriptor, usize)> = self
            .registry
            .iter()
            .map(|domain| (domain, keyword_hits(&tokens, &domain.keywords)))
            .collect();
        let max_hits = hits.iter().map(|(_, h)| *h).max().unwrap_or(0);
        if max_hits == 0 {
            return None;
        }

        let tied: Vec<&DomainDescriptor> = hits
            .iter()
            .filter(|(_, h)| *h == max_hits)
            .map(|(domain, _)| *domain)
            .collect();

        let score_of = |domain: &DomainDescriptor| scores.get(&domain.id).copied().unwrap_or(0.0);
        let chosen = match self.config.tie_break {
            TieBreak::RegistrationOrder => tied.first().copied(),
            TieBreak::ClassifierScore => tied
                .iter()
                .copied()
                .reduce(|top, d| if score_of(d) > score_of(top) { d } else { top }),
        }?;

        if tied.len() > 1 {
            let candidates: Vec<&str> = tied.iter().map(|d| d.id.as_str()).collect();
            tracing::debug!(
                ?candidates,
                chosen = %chosen.id,
                policy = ?self.config.tie_break,
                "Keyword fallback tie broken"
            );
        }

        let confidence = (max_hits as f32 / distinct as f32).min(1.0);
        Some((chosen, max_hits, confidence))
    }
}

impl std::fmt::Debug for IntentRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentRouter")
            .field("domains", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::backend::EmbeddingError;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(self.0.clone())
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl EmbeddingProvider for DownEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Unavailable("connection refused".to_string()))
        }
    }

    fn registry() -> Arc<DomainRegistry> {
        Arc::new(
            DomainRegistry::builder()
                .register(
                    DomainDescriptor::new("finance", "fin", vec![1.0, 0.0, 0.0], "{query}")
                        .with_keywords(["money", "transfer", "payment", "balance"]),
                )
                .register(
                    DomainDescriptor::new("support", "sup", vec![0.0, 1.0, 0.0], "{query}")
                        .with_keywords(["help", "support", "issue", "problem"]),
                )
                .build()
                .unwrap(),
        )
    }

    fn router(embedder: Arc<dyn EmbeddingProvider>, config: RouterConfig) -> IntentRouter {
        IntentRouter::new(registry(), embedder, config)
    }

    #[tokio::test]
    async fn test_classifier_route_above_threshold() {
        let router = router(
            Arc::new(FixedEmbedder(vec![0.95, 0.1, 0.0])),
            RouterConfig::default(),
        );
        let decision = router.classify("how do I move funds").await;

        assert_eq!(decision.method, RoutingMethod::Classifier);
        assert_eq!(decision.domain_id.as_deref(), Some("finance"));
        assert!(decision.confidence >= 0.80);
        assert_eq!(decision.scores.len(), 2);
    }

    #[tokio::test]
    async fn test_keyword_fallback_below_threshold() {
        let router = router(
            Arc::new(FixedEmbedder(vec![0.0, 0.0, 1.0])),
            RouterConfig::default(),
        );
        let decision = router.classify("check my balance").await;

        assert_eq!(decision.method, RoutingMethod::KeywordFallback);
        assert_eq!(decision.domain_id.as_deref(), Some("finance"));
        assert_eq!(decision.keyword_hits, 1);
        assert!((decision.confidence - 1.0 / 3.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_escalates_without_signal() {
        let router = router(
            Arc::new(FixedEmbedder(vec![0.0, 0.3, 1.0])),
            RouterConfig::default(),
        );
        let decision = router.classify("What is the capital of France?").await;

        assert!(decision.is_escalated());
        assert!(decision.domain_id.is_none());
        assert!(decision.confidence < 0.80);
    }

    #[tokio::test]
    async fn test_empty_query_escalates_immediately() {
        let router = router(Arc::new(DownEmbedder), RouterConfig::default());
        let decision = router.classify("   ").await;
        assert!(decision.is_escalated());
        assert!(decision.scores.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_falls_back_to_keywords() {
        let router = router(Arc::new(DownEmbedder), RouterConfig::default());
        let decision = router.classify("I have a problem").await;
        assert_eq!(decision.method, RoutingMethod::KeywordFallback);
        assert_eq!(decision.domain_id.as_deref(), Some("support"));
    }

    #[test]
    fn test_keyword_tie_uses_registration_order() {
        let router = router(Arc::new(DownEmbedder), RouterConfig::default());
        let decision = router.decide("payment problem", Some(&[0.1, 0.5, 1.0]));
        assert_eq!(decision.domain_id.as_deref(), Some("finance"));
    }

    #[test]
    fn test_keyword_tie_by_classifier_score() {
        let config = RouterConfig {
            tie_break: TieBreak::ClassifierScore,
            ..RouterConfig::default()
        };
        let router = router(Arc::new(DownEmbedder), config);
        let decision = router.decide("payment problem", Some(&[0.1, 0.5, 1.0]));
        assert_eq!(decision.domain_id.as_deref(), Some("support"));
    }

    #[test]
    fn test_equal_scores_prefer_first_registered() {
        let router = router(Arc::new(DownEmbedder), RouterConfig::default());
        let decision = router.decide("anything", Some(&[1.0, 1.0, 0.0]));
        assert_eq!(decision.method, RoutingMethod::Escalated);
        // Both score ~0.707; a lower threshold routes to the first
        let config = RouterConfig {
            primary_threshold: 0.7,
            ..RouterConfig::default()
        };
        let router = IntentRouter::new(registry(), Arc::new(DownEmbedder), config);
        let decision = router.decide("anything", Some(&[1.0, 1.0, 0.0]));
        assert_eq!(decision.domain_id.as_deref(), Some("finance"));
    }

    #[test]
    fn test_fallback_can_be_disabled() {
        let config = RouterConfig {
            keyword_fallback: false,
            ..RouterConfig::default()
        };
        let router = router(Arc::new(DownEmbedder), config);
        assert!(router.decide("check my balance", None).is_escalated());
    }
}
