// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PatternStore
//!
//! Exclusive owner of every [`Pattern`], plus the [`ClusterIndex`] used to
//! narrow retrieval candidates. All mutations run to completion under the
//! caller's write lock; the cluster index and the optional external vector
//! index only ever see pattern ids and embeddings.
//!
//! ## Deduplication
//!
//! Extraction never creates a pattern within `duplicate_threshold` (default
//! 0.95) cosine similarity of an existing one. The existing pattern absorbs
//! the observation instead: EMA update, quality history append, usage + 1.
//!
//! ## Overflow
//!
//! When the store grows past `max_patterns`, the lowest 20% by
//! `success_rate * ln(usage + 1)` are dropped.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::application::distiller::condensed_strategy;
use crate::domain::{
    cosine_similarity, perturb, trajectory_embedding, weighted_average, ClusterIndex, CortexConfig,
    CortexError, CortexResult, DistilledMemory, EvolutionType, HistoryLimits, ModeConfig, Outcome,
    Pattern, PatternConfig, PatternEvolution, PatternId, Trajectory,
};
use crate::infrastructure::IndexSync;

const PRUNE_FRACTION: f64 = 0.2;
const SPLIT_DISCOUNT: f64 = 0.9;
const MIN_SPLIT: usize = 2;
const NAME_LEN: usize = 48;

/// Result of a single extraction
#[derive(Debug, Clone)]
pub struct Extraction {
    pub pattern: Pattern,
    /// False when an existing near-duplicate absorbed the trajectory
    pub created: bool,
}

/// Serializable copy of every pattern in a store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSnapshot {
    pub exported_at: DateTime<Utc>,
    pub patterns: Vec<Pattern>,
}

pub struct PatternStore {
    patterns: HashMap<PatternId, Pattern>,
    clusters: ClusterIndex,
    config: PatternConfig,
    quality_threshold: f64,
    embedding_dim: usize,
    rng: StdRng,
    index_sync: Option<IndexSync>,
}

impl PatternStore {
    pub fn new(config: &CortexConfig) -> Self {
        let mode = config.mode_config();
        let pattern = config.pattern.clone();
        let rng = match pattern.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        Self {
            patterns: HashMap::new(),
            clusters: ClusterIndex::new(
                mode.pattern_clusters,
                pattern.cluster_join_threshold,
                pattern.rebuild_iterations,
                pattern.seed,
            ),
            quality_threshold: mode.quality_threshold,
            embedding_dim: config.embedding_dim,
            config: pattern,
            rng,
            index_sync: None,
        }
    }

    /// Mirror inserts and deletes into an external vector index
    pub fn with_index_sync(mut self, sync: IndexSync) -> Self {
        self.index_sync = Some(sync);
        self
    }

    pub fn set_index_sync(&mut self, sync: Option<IndexSync>) {
        self.index_sync = sync;
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    pub fn quality_threshold(&self) -> f64 {
        self.quality_threshold
    }

    pub fn limits(&self) -> HistoryLimits {
        self.config.history_limits()
    }

    /// Apply a new mode: extraction threshold and cluster target.
    /// The cluster index is rebuilt when its target changes.
    pub fn apply_mode(&mut self, mode: &ModeConfig) {
        self.quality_threshold = mode.quality_threshold;
        if self.clusters.num_clusters() != mode.pattern_clusters.max(1) {
            self.clusters.set_num_clusters(mode.pattern_clusters);
            self.rebuild_clusters();
        }
    }

    /// Turn a completed trajectory into a pattern, or fold it into a near-duplicate.
    ///
    /// `None` for incomplete trajectories and those below the mode's quality threshold.
    pub fn extract(
        &mut self,
        trajectory: &Trajectory,
        memory: Option<&DistilledMemory>,
    ) -> Option<Extraction> {
        if !trajectory.is_complete || trajectory.quality_score < self.quality_threshold {
            debug!(
                trajectory_id = %trajectory.id,
                quality = trajectory.quality_score,
                threshold = self.quality_threshold,
                "Trajectory not eligible for pattern extraction"
            );
            return None;
        }

        let memory = memory.or(trajectory.distilled_memory.as_ref());
        let embedding = match memory {
            Some(m) => m.embedding.clone(),
            None => {
                let states: Vec<&[f32]> =
                    trajectory.steps.iter().map(|s| s.state_after.as_slice()).collect();
                trajectory_embedding(&states, self.embedding_dim)
            }
        };

        if let Some(existing) = self.nearest_duplicate(&embedding) {
            let learning_rate = self.config.learning_rate;
            if let Some(pattern) = self.patterns.get_mut(&existing) {
                pattern.observe(trajectory.quality_score, learning_rate);
                pattern.usage_count += 1;
                debug!(
                    pattern_id = %existing,
                    success_rate = pattern.success_rate,
                    "Trajectory absorbed by existing pattern"
                );
                return Some(Extraction {
                    pattern: pattern.clone(),
                    created: false,
                });
            }
        }

        let outcome = trajectory
            .verdict
            .as_ref()
            .map(|v| v.outcome)
            .unwrap_or_else(|| Outcome::from_quality(trajectory.quality_score));
        let strategy = memory
            .map(|m| m.strategy.clone())
            .unwrap_or_else(|| condensed_strategy(trajectory));

        let mut pattern = Pattern::new(
            pattern_name(&trajectory.context, &trajectory.domain),
            trajectory.domain.clone(),
            embedding,
            strategy,
            trajectory.quality_score,
            self.limits(),
        )
        .with_outcome(outcome);
        if let Some(m) = memory {
            pattern = pattern.with_source_memory(m.id);
        }

        let created = pattern.clone();
        self.insert(pattern);
        Some(Extraction {
            pattern: created,
            created: true,
        })
    }

    /// Extract every eligible trajectory; rebuilds clusters after a large batch.
    pub fn extract_batch(&mut self, trajectories: &[Trajectory]) -> Vec<Extraction> {
        let extracted: Vec<Extraction> = trajectories
            .iter()
            .filter_map(|t| self.extract(t, None))
            .collect();

        let created = extracted.iter().filter(|e| e.created).count();
        if created > self.config.batch_rebuild_threshold {
            info!(created, "Large extraction batch, rebuilding cluster index");
            self.rebuild_clusters();
        }
        extracted
    }

    /// Insert a pattern as-is, with no duplicate check.
    pub fn insert(&mut self, pattern: Pattern) -> PatternId {
        let id = pattern.id;
        if self.config.clustering_enabled {
            self.clusters.insert(id, &pattern.embedding);
        }
        if let Some(sync) = &self.index_sync {
            sync.insert(id, pattern.embedding.clone());
        }
        self.patterns.insert(id, pattern);

        if self.patterns.len() > self.config.max_patterns {
            self.prune();
        }
        id
    }

    /// Insert a caller-built pattern after checking its embedding dimension.
    pub fn add(&mut self, pattern: Pattern) -> CortexResult<PatternId> {
        if pattern.embedding.len() != self.embedding_dim {
            return Err(CortexError::EmbeddingDimensionMismatch {
                expected: self.embedding_dim,
                actual: pattern.embedding.len(),
            });
        }
        Ok(self.insert(pattern))
    }

    pub fn evolve(
        &mut self,
        id: PatternId,
        quality: f64,
        context: Option<&str>,
    ) -> CortexResult<PatternEvolution> {
        let learning_rate = self.config.learning_rate;
        let pattern = self
            .patterns
            .get_mut(&id)
            .ok_or(CortexError::UnknownPattern(id))?;
        Ok(pattern.evolve(quality, learning_rate, context))
    }

    /// Merge two patterns into the one with the higher success rate.
    ///
    /// `Ok(None)` when both ids are the same pattern.
    pub fn merge(&mut self, a: PatternId, b: PatternId) -> CortexResult<Option<Pattern>> {
        if !self.patterns.contains_key(&a) {
            return Err(CortexError::UnknownPattern(a));
        }
        if !self.patterns.contains_key(&b) {
            return Err(CortexError::UnknownPattern(b));
        }
        if a == b {
            return Ok(None);
        }

        let (base_id, absorbed_id) = match (self.patterns.get(&a), self.patterns.get(&b)) {
            (Some(pa), Some(pb)) if pb.success_rate > pa.success_rate => (b, a),
            _ => (a, b),
        };
        let absorbed = self
            .patterns
            .remove(&absorbed_id)
            .ok_or(CortexError::UnknownPattern(absorbed_id))?;
        let base = self
            .patterns
            .get_mut(&base_id)
            .ok_or(CortexError::UnknownPattern(base_id))?;

        let base_weight = base.usage_count.max(1) as f32;
        let absorbed_weight = absorbed.usage_count.max(1) as f32;
        if let Some(embedding) = weighted_average(&[
            (base.embedding.as_slice(), base_weight),
            (absorbed.embedding.as_slice(), absorbed_weight),
        ]) {
            base.embedding = embedding;
        }

        let previous = base.success_rate;
        base.quality_history = base.quality_history.concat(&absorbed.quality_history);
        base.success_rate = base
            .quality_history
            .mean()
            .unwrap_or((previous + absorbed.success_rate) / 2.0)
            .clamp(0.0, 1.0);
        base.usage_count += absorbed.usage_count;
        base.record_evolution(
            EvolutionType::Merge,
            previous,
            format!("merged pattern {}", absorbed_id),
        );
        let merged = base.clone();

        if let Some(sync) = &self.index_sync {
            sync.delete(absorbed_id);
            sync.insert(base_id, merged.embedding.clone());
        }
        self.rebuild_clusters();

        info!(base = %base_id, absorbed = %absorbed_id, "Patterns merged");
        Ok(Some(merged))
    }

    /// Replace a pattern with `n` perturbed copies (at least two).
    pub fn split(&mut self, id: PatternId, n: usize) -> CortexResult<Vec<Pattern>> {
        let original = self
            .patterns
            .remove(&id)
            .ok_or(CortexError::UnknownPattern(id))?;
        if let Some(sync) = &self.index_sync {
            sync.delete(id);
        }

        let n = n.max(MIN_SPLIT);
        let usage = (original.usage_count / n as u64).max(1);
        let mut children = Vec::with_capacity(n);

        for i in 0..n {
            let embedding = perturb(&original.embedding, self.config.split_perturbation, &mut self.rng);
            let mut child = Pattern::new(
                format!("{}-split-{}", original.name, i + 1),
                original.domain.clone(),
                embedding,
                original.strategy.clone(),
                original.success_rate * SPLIT_DISCOUNT,
                original.limits(),
            )
            .with_outcome(original.outcome);
            child.source_memory = original.source_memory;
            child.usage_count = usage;
            child.record_evolution(
                EvolutionType::Split,
                original.success_rate,
                format!("split {} of {} from pattern {}", i + 1, n, id),
            );

            if let Some(sync) = &self.index_sync {
                sync.insert(child.id, child.embedding.clone());
            }
            self.patterns.insert(child.id, child.clone());
            children.push(child);
        }

        if self.patterns.len() > self.config.max_patterns {
            self.prune();
        }
        self.rebuild_clusters();

        info!(pattern_id = %id, parts = n, "Pattern split");
        Ok(children)
    }

    /// Drop the lowest-retention 20% when over `max_patterns`. Returns the count removed.
    pub fn prune(&mut self) -> usize {
        if self.patterns.len() <= self.config.max_patterns {
            return 0;
        }

        let mut ranked: Vec<(PatternId, f64)> = self
            .patterns
            .values()
            .map(|p| (p.id, p.retention_score()))
            .collect();
        ranked.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let count = ((ranked.len() as f64 * PRUNE_FRACTION).floor() as usize).max(1);
        let doomed: Vec<PatternId> = ranked.into_iter().take(count).map(|(id, _)| id).collect();
        let removed = self.remove_all(&doomed);
        info!(removed, remaining = self.patterns.len(), "Pattern store pruned");
        removed
    }

    /// Remove a set of patterns in one step. Each id simply leaves its
    /// cluster; centroids of the clusters it left are refreshed.
    pub fn remove_all(&mut self, ids: &[PatternId]) -> usize {
        let mut removed = 0;
        for id in ids {
            if self.patterns.remove(id).is_none() {
                continue;
            }
            removed += 1;
            let patterns = &self.patterns;
            self.clusters
                .remove(id, |member| patterns.get(member).map(|p| p.embedding.as_slice()));
            if let Some(sync) = &self.index_sync {
                sync.delete(*id);
            }
        }
        removed
    }

    pub fn rebuild_clusters(&mut self) {
        if !self.config.clustering_enabled {
            return;
        }
        let mut ordered: Vec<&Pattern> = self.patterns.values().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let entries: Vec<(PatternId, &[f32])> = ordered
            .iter()
            .map(|p| (p.id, p.embedding.as_slice()))
            .collect();
        self.clusters.rebuild(&entries);
        debug!(
            patterns = entries.len(),
            clusters = self.clusters.len(),
            "Cluster index rebuilt"
        );
    }

    pub fn get(&self, id: &PatternId) -> Option<&Pattern> {
        self.patterns.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &PatternId) -> Option<&mut Pattern> {
        self.patterns.get_mut(id)
    }

    pub fn contains(&self, id: &PatternId) -> bool {
        self.patterns.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.values()
    }

    pub fn find_by_domain(&self, domain: &str) -> Vec<&Pattern> {
        let mut found: Vec<&Pattern> = self.patterns.values().filter(|p| p.domain == domain).collect();
        found.sort_by(|a, b| {
            b.success_rate
                .partial_cmp(&a.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        found
    }

    /// Highest success rate in `domain`
    pub fn best_pattern(&self, domain: &str) -> Option<&Pattern> {
        self.find_by_domain(domain).into_iter().next()
    }

    pub fn cluster_index(&self) -> &ClusterIndex {
        &self.clusters
    }

    pub fn average_success_rate(&self) -> f64 {
        if self.patterns.is_empty() {
            return 0.0;
        }
        self.patterns.values().map(|p| p.success_rate).sum::<f64>() / self.patterns.len() as f64
    }

    pub fn export_snapshot(&self) -> PatternSnapshot {
        let mut patterns: Vec<Pattern> = self.patterns.values().cloned().collect();
        patterns.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        PatternSnapshot {
            exported_at: Utc::now(),
            patterns,
        }
    }

    /// Replace the store's contents with a snapshot. Returns the imported count.
    pub fn import_snapshot(&mut self, snapshot: PatternSnapshot) -> usize {
        if let Some(sync) = &self.index_sync {
            for id in self.patterns.keys() {
                sync.delete(*id);
            }
        }
        self.patterns.clear();
        self.clusters.clear();

        for pattern in snapshot.patterns {
            if let Some(sync) = &self.index_sync {
                sync.insert(pattern.id, pattern.embedding.clone());
            }
            self.patterns.insert(pattern.id, pattern);
        }
        self.rebuild_clusters();
        self.patterns.len()
    }

    fn nearest_duplicate(&self, embedding: &[f32]) -> Option<PatternId> {
        self.patterns
            .values()
            .map(|p| (p.id, cosine_similarity(&p.embedding, embedding)))
            .filter(|(_, sim)| *sim >= self.config.duplicate_threshold)
            .max_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.0.cmp(&a.0))
            })
            .map(|(id, _)| id)
    }
}

fn pattern_name(context: &str, domain: &str) -> String {
    let trimmed = context.trim();
    if trimmed.is_empty() {
        return format!("{}-pattern", domain);
    }
    trimmed.chars().take(NAME_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LearningMode, Outcome};

    const DIM: usize = 4;

    fn config() -> CortexConfig {
        let mut config = CortexConfig::default()
            .with_mode(LearningMode::Balanced)
            .with_embedding_dim(DIM);
        config.pattern.seed = Some(7);
        config
    }

    fn trajectory(embedding: [f32; DIM], quality: f64, steps: usize) -> Trajectory {
        let mut t = Trajectory::new("deploy service", "ops");
        for i in 0..steps {
            t.push_step(format!("step-{i}"), 1.0, embedding.to_vec(), None);
        }
        t.seal(Some(quality));
        t
    }

    fn direct(store: &mut PatternStore, embedding: [f32; DIM], rate: f64) -> PatternId {
        store.insert(Pattern::new("p", "ops", embedding.to_vec(), "a", rate, store.limits()))
    }

    #[test]
    fn test_extract_rejects_ineligible() {
        let mut store = PatternStore::new(&config());
        let low = trajectory([1.0, 0.0, 0.0, 0.0], 0.2, 3);
        assert!(store.extract(&low, None).is_none());

        let mut open = Trajectory::new("ctx", "ops");
        open.push_step("a", 1.0, vec![1.0; DIM], None);
        assert!(store.extract(&open, None).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_extract_creates_pattern() {
        let mut store = PatternStore::new(&config());
        let t = trajectory([1.0, 0.0, 0.0, 0.0], 0.8, 5);

        let extraction = store.extract(&t, None).unwrap();
        assert!(extraction.created);
        let p = extraction.pattern;
        assert_eq!(p.success_rate, 0.8);
        assert_eq!(p.usage_count, 1);
        assert_eq!(p.embedding.len(), DIM);
        assert_eq!(p.outcome, Outcome::Success);
        assert_eq!(p.strategy, "step-0 → step-1 → ... → step-4");
        assert_eq!(store.len(), 1);
        assert_eq!(store.cluster_index().len(), 1);
    }

    #[test]
    fn test_extract_updates_near_duplicate() {
        let mut store = PatternStore::new(&config());
        store.extract(&trajectory([1.0, 0.0, 0.0, 0.0], 0.8, 2), None);
        let again = store
            .extract(&trajectory([1.0, 0.01, 0.0, 0.0], 0.6, 2), None)
            .unwrap();

        assert!(!again.created);
        assert_eq!(store.len(), 1);
        assert_eq!(again.pattern.usage_count, 2);
        assert!((again.pattern.success_rate - 0.78).abs() < 1e-9);
        assert_eq!(again.pattern.quality_history.len(), 1);
    }

    #[test]
    fn test_extract_batch_rebuilds_after_large_batch() {
        let mut store = PatternStore::new(&config());
        let batch: Vec<Trajectory> = (0..12)
            .map(|i| {
                let mut e = [0.0; DIM];
                e[i % DIM] = 1.0;
                e[(i + 1) % DIM] = i as f32 * 0.7;
                trajectory(e, 0.9, 1)
            })
            .collect();

        let extracted = store.extract_batch(&batch);
        assert!(extracted.iter().filter(|e| e.created).count() > 0);
        let clustered: usize = store.cluster_index().clusters().iter().map(|c| c.members.len()).sum();
        assert_eq!(clustered, store.len());
    }

    #[test]
    fn test_evolve_unknown_pattern() {
        let mut store = PatternStore::new(&config());
        let id = PatternId::new();
        assert_eq!(
            store.evolve(id, 0.5, None).unwrap_err(),
            CortexError::UnknownPattern(id)
        );
    }

    #[test]
    fn test_merge_keeps_higher_success_rate_as_base() {
        let mut store = PatternStore::new(&config());
        let weak = direct(&mut store, [1.0, 0.0, 0.0, 0.0], 0.4);
        let strong = direct(&mut store, [0.0, 1.0, 0.0, 0.0], 0.9);
        store.get_mut(&weak).unwrap().usage_count = 3;
        store.evolve(weak, 0.4, None).unwrap();
        store.evolve(strong, 0.9, None).unwrap();

        let merged = store.merge(weak, strong).unwrap().unwrap();
        assert_eq!(merged.id, strong);
        assert_eq!(merged.usage_count, 4);
        assert_eq!(merged.quality_history.len(), 2);
        assert!((merged.success_rate - 0.65).abs() < 1e-9);
        // usage-weighted: weak counts three times as much
        assert!((merged.embedding[0] - 0.75).abs() < 1e-6);
        assert!((merged.embedding[1] - 0.25).abs() < 1e-6);
        assert_eq!(
            merged.evolution_history.last().unwrap().evolution_type,
            EvolutionType::Merge
        );

        assert!(!store.contains(&weak));
        assert!(store.cluster_index().cluster_of(&weak).is_none());
        assert!(store.cluster_index().cluster_of(&strong).is_some());
        assert!(store.merge(strong, strong).unwrap().is_none());
        assert!(store.merge(weak, strong).is_err());
    }

    #[test]
    fn test_split_replaces_original() {
        let mut store = PatternStore::new(&config());
        let id = direct(&mut store, [1.0, 0.5, 0.0, 0.0], 0.8);
        store.get_mut(&id).unwrap().usage_count = 6;
        store.evolve(id, 0.9, None).unwrap();
        let rate = store.get(&id).unwrap().success_rate;

        let children = store.split(id, 3).unwrap();
        assert_eq!(children.len(), 3);
        assert!(!store.contains(&id));
        assert_eq!(store.len(), 3);
        for child in &children {
            assert!((child.success_rate - rate * 0.9).abs() < 1e-9);
            assert!(child.quality_history.is_empty());
            assert_eq!(child.evolution_history.len(), 1);
            assert_eq!(child.usage_count, 2);
            assert!(cosine_similarity(&child.embedding, &[1.0, 0.5, 0.0, 0.0]) > 0.99);
            assert!(store.cluster_index().cluster_of(&child.id).is_some());
        }
        assert!(store.split(id, 2).is_err());
    }

    #[test]
    fn test_overflow_prunes_lowest_retention() {
        let mut cfg = config();
        cfg.pattern.max_patterns = 10;
        let mut store = PatternStore::new(&cfg);

        let mut weakest = Vec::new();
        for i in 0..10 {
            let mut e = [0.0; DIM];
            e[i % DIM] = 1.0;
            e[(i + 2) % DIM] = i as f32;
            let id = direct(&mut store, e, 0.1 + i as f64 * 0.08);
            if i < 2 {
                weakest.push(id);
            }
        }
        assert_eq!(store.len(), 10);

        direct(&mut store, [0.3, 0.3, 0.3, 0.3], 0.99);
        // 11 patterns, floor(11 * 0.2) = 2 removed
        assert_eq!(store.len(), 9);
        for id in weakest {
            assert!(!store.contains(&id));
        }
    }

    #[test]
    fn test_domain_queries() {
        let mut store = PatternStore::new(&config());
        direct(&mut store, [1.0, 0.0, 0.0, 0.0], 0.5);
        let best = direct(&mut store, [0.0, 1.0, 0.0, 0.0], 0.9);
        store.insert(Pattern::new("q", "web", vec![0.0, 0.0, 1.0, 0.0], "b", 0.99, store.limits()));

        assert_eq!(store.find_by_domain("ops").len(), 2);
        assert_eq!(store.best_pattern("ops").unwrap().id, best);
        assert!(store.best_pattern("missing").is_none());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut store = PatternStore::new(&config());
        direct(&mut store, [1.0, 0.0, 0.0, 0.0], 0.5);
        direct(&mut store, [0.0, 1.0, 0.0, 0.0], 0.7);
        let json = serde_json::to_string(&store.export_snapshot()).unwrap();

        let mut restored = PatternStore::new(&config());
        let snapshot: PatternSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.import_snapshot(snapshot), 2);
        assert_eq!(restored.cluster_index().len(), 1);
        assert!((restored.average_success_rate() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_apply_mode_rebuilds_clusters() {
        let mut store = PatternStore::new(&config());
        for i in 0..DIM {
            let mut e = [0.0; DIM];
            e[i] = 1.0;
            direct(&mut store, e, 0.5);
        }
        assert_eq!(store.cluster_index().len(), DIM);

        store.apply_mode(&LearningMode::Edge.config());
        assert_eq!(store.quality_threshold(), 0.8);
        assert_eq!(store.cluster_index().num_clusters(), 15);
        // ceil(4 / 5) = 1 cluster after the rebuild
        assert_eq!(store.cluster_index().len(), 1);
    }

    #[test]
    fn test_add_checks_dimension() {
        let mut store = PatternStore::new(&config());
        let wrong = Pattern::new("p", "ops", vec![1.0, 0.0], "a", 0.5, store.limits());
        assert_eq!(
            store.add(wrong).unwrap_err(),
            CortexError::EmbeddingDimensionMismatch { expected: DIM, actual: 2 }
        );
        assert!(store.is_empty());

        let right = Pattern::new("p", "ops", vec![1.0, 0.0, 0.0, 0.0], "a", 0.5, store.limits());
        let id = store.add(right).unwrap();
        assert!(store.contains(&id));
    }

    #[test]
    fn test_remove_all_leaves_other_clusters_intact() {
        let mut store = PatternStore::new(&config());
        let a = direct(&mut store, [1.0, 0.0, 0.0, 0.0], 0.8);
        let b = direct(&mut store, [1.0, 0.2, 0.0, 0.0], 0.8);
        let far = direct(&mut store, [0.0, 0.0, 0.0, 1.0], 0.8);
        let shared = store.cluster_index().cluster_of(&b).unwrap();
        let far_cluster = store.cluster_index().cluster_of(&far).unwrap();
        assert_eq!(store.cluster_index().cluster_of(&a), Some(shared));

        assert_eq!(store.remove_all(&[a, PatternId::new()]), 1);

        assert!(store.cluster_index().cluster_of(&a).is_none());
        assert_eq!(store.cluster_index().cluster_of(&b), Some(shared));
        assert_eq!(store.cluster_index().cluster_of(&far), Some(far_cluster));
        let cluster = store
            .cluster_index()
            .clusters()
            .iter()
            .find(|c| c.id == shared)
            .unwrap();
        assert_eq!(cluster.centroid, vec![1.0, 0.2, 0.0, 0.0]);

        store.remove_all(&[far]);
        assert_eq!(store.cluster_index().len(), 1);
    }
}
