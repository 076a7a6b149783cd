// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Retriever
//!
//! Ranked pattern lookup for a query embedding.
//!
//! 1. Candidates: members of the `candidate_clusters` clusters nearest the
//!    query when clustering is on and clusters exist, otherwise every pattern.
//! 2. Candidates below `match_threshold` cosine similarity are dropped.
//! 3. Ranking is either plain similarity top-k or Maximal Marginal
//!    Relevance: `lambda * relevance - (1 - lambda) * max_sim_to_selected`.
//!
//! Confidence blends similarity with the pattern's track record:
//! `sim * (1 - 0.2u - 0.2q) + 0.1u + 0.1q`, `u = min(usage / 10, 1)`,
//! `q = success_rate`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::application::pattern_store::PatternStore;
use crate::domain::{cosine_similarity, Pattern, PatternId, RetrievalConfig};

const USAGE_SATURATION: f64 = 10.0;
const RELIABILITY_WEIGHT: f64 = 0.2;
const RELIABILITY_BONUS: f64 = 0.1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern: Pattern,
    pub similarity: f32,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ranking {
    TopK,
    Mmr { lambda: f32 },
}

#[derive(Debug, Clone)]
pub struct Retriever {
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Ranking selected by configuration: MMR unless diversity is off
    pub fn default_ranking(&self) -> Ranking {
        if self.config.diversity {
            Ranking::Mmr {
                lambda: self.config.lambda,
            }
        } else {
            Ranking::TopK
        }
    }

    pub fn find_matches(&self, store: &PatternStore, query: &[f32], k: usize) -> Vec<PatternMatch> {
        self.find_matches_ranked(store, query, k, self.default_ranking())
    }

    pub fn find_matches_ranked(
        &self,
        store: &PatternStore,
        query: &[f32],
        k: usize,
        ranking: Ranking,
    ) -> Vec<PatternMatch> {
        if k == 0 || store.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(&Pattern, f32)> = self
            .candidates(store, query)
            .into_iter()
            .map(|p| (p, cosine_similarity(&p.embedding, query)))
            .filter(|(_, sim)| *sim >= self.config.match_threshold)
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });

        let selected = match ranking {
            Ranking::TopK => {
                scored.truncate(k);
                scored
            }
            Ranking::Mmr { lambda } => mmr_select(scored, k, lambda),
        };

        selected
            .into_iter()
            .map(|(pattern, similarity)| PatternMatch {
                confidence: match_confidence(similarity, pattern),
                pattern: pattern.clone(),
                similarity,
            })
            .collect()
    }

    fn candidates<'a>(&self, store: &'a PatternStore, query: &[f32]) -> Vec<&'a Pattern> {
        let clusters = store.cluster_index();
        if store.config().clustering_enabled && !clusters.is_empty() {
            let ids: Vec<PatternId> = clusters.candidates(query, self.config.candidate_clusters);
            return ids.iter().filter_map(|id| store.get(id)).collect();
        }
        store.patterns().collect()
    }
}

/// Greedy MMR over candidates sorted by descending similarity.
/// Ties keep the earlier candidate, so `lambda = 1.0` reproduces top-k order.
fn mmr_select(mut remaining: Vec<(&Pattern, f32)>, k: usize, lambda: f32) -> Vec<(&Pattern, f32)> {
    let mut selected: Vec<(&Pattern, f32)> = Vec::with_capacity(k.min(remaining.len()));

    while selected.len() < k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (idx, (candidate, relevance)) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|(s, _)| cosine_similarity(&candidate.embedding, &s.embedding))
                .fold(0.0f32, f32::max);
            let score = lambda * relevance - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_idx = idx;
            }
        }

        selected.push(remaining.remove(best_idx));
    }

    selected
}

pub fn match_confidence(similarity: f32, pattern: &Pattern) -> f64 {
    let usage = (pattern.usage_count as f64 / USAGE_SATURATION).min(1.0);
    let quality = pattern.success_rate;
    let similarity = similarity as f64;
    (similarity * (1.0 - RELIABILITY_WEIGHT * usage - RELIABILITY_WEIGHT * quality)
        + RELIABILITY_BONUS * usage
        + RELIABILITY_BONUS * quality)
        .clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CortexConfig, HistoryLimits};

    fn store(clustering: bool) -> PatternStore {
        let mut config = CortexConfig::default().with_embedding_dim(3);
        config.pattern.clustering_enabled = clustering;
        config.pattern.seed = Some(3);
        PatternStore::new(&config)
    }

    fn add(store: &mut PatternStore, embedding: [f32; 3]) -> PatternId {
        store.insert(Pattern::new("p", "d", embedding.to_vec(), "s", 0.5, HistoryLimits::default()))
    }

    #[test]
    fn test_threshold_filters_candidates() {
        let mut s = store(false);
        let close = add(&mut s, [1.0, 0.1, 0.0]);
        add(&mut s, [0.0, 1.0, 0.0]);

        let matches = Retriever::new(RetrievalConfig::default()).find_matches(&s, &[1.0, 0.0, 0.0], 5);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].pattern.id, close);
    }

    #[test]
    fn test_mmr_prefers_diverse_results() {
        let mut s = store(false);
        let best = add(&mut s, [1.0, 0.3, 0.0]);
        let twin = add(&mut s, [1.0, 0.33, 0.0]);
        let other = add(&mut s, [1.0, 0.0, 0.5]);
        let mut config = RetrievalConfig::default();
        config.lambda = 0.5;
        let retriever = Retriever::new(config);

        let top = retriever.find_matches_ranked(&s, &[1.0, 0.0, 0.0], 2, Ranking::TopK);
        assert_eq!(top.iter().map(|m| m.pattern.id).collect::<Vec<_>>(), vec![best, twin]);

        let diverse = retriever.find_matches(&s, &[1.0, 0.0, 0.0], 2);
        assert_eq!(diverse.iter().map(|m| m.pattern.id).collect::<Vec<_>>(), vec![best, other]);
    }

    #[test]
    fn test_cluster_pruning_skips_far_clusters() {
        let mut s = store(true);
        let near = add(&mut s, [1.0, 0.0, 0.0]);
        add(&mut s, [0.0, 1.0, 0.0]);
        add(&mut s, [0.0, 0.0, 1.0]);
        let mut config = RetrievalConfig::default();
        config.candidate_clusters = 1;
        config.match_threshold = 0.0;

        let matches = Retriever::new(config).find_matches(&s, &[0.9, 0.1, 0.0], 10);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].pattern.id, near);
    }

    #[test]
    fn test_confidence_formula() {
        let mut p = Pattern::new("p", "d", vec![1.0], "s", 0.5, HistoryLimits::default());
        p.usage_count = 5;
        // 0.9 * (1 - 0.1 - 0.1) + 0.05 + 0.05
        assert!((match_confidence(0.9, &p) - 0.82).abs() < 1e-6);

        p.usage_count = 50;
        p.success_rate = 1.0;
        assert!((match_confidence(0.9, &p) - (0.9 * 0.6 + 0.2)).abs() < 1e-6);
    }

    #[test]
    fn test_zero_k_or_empty_store() {
        let s = store(true);
        let retriever = Retriever::new(RetrievalConfig::default());
        assert!(retriever.find_matches(&s, &[1.0, 0.0, 0.0], 3).is_empty());
    }
}
