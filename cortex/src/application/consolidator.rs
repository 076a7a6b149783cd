// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Consolidator
//!
//! Periodic clean-up pass over the pattern store. One O(n²) sweep over a
//! stable ordering (creation time, then id) decides everything before the
//! store is touched:
//!
//! 1. **Dedup**: pairs at or above `dedup_threshold` collapse into the one
//!    with the higher `usage_count * confidence` (older pattern on ties),
//!    whatever their outcome labels. The survivor absorbs usage and quality
//!    history.
//! 2. **Contradictions**: surviving pairs at or above
//!    `contradiction_threshold` whose outcomes differ are reported and logged,
//!    never removed.
//! 3. **Pruning**: survivors older than `prune_age_days`, below
//!    `min_confidence_keep` and used fewer than `min_usage_keep` times.
//!
//! Pairwise similarities are computed once and shared by both passes.
//! Removals are applied together at the end.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

use crate::application::pattern_store::PatternStore;
use crate::domain::{cosine_similarity, ConsolidationConfig, Contradiction, EvolutionType, Pattern, PatternId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub removed_duplicates: usize,
    pub contradictions_detected: usize,
    pub pruned_patterns: usize,
    /// Survivors that absorbed at least one duplicate
    pub merged_patterns: usize,
    /// Survivors whose latest evolution flagged them for pruning; kept for review
    #[serde(default)]
    pub flagged_patterns: usize,
    pub contradictions: Vec<Contradiction>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Consolidator {
    config: ConsolidationConfig,
}

impl Consolidator {
    pub fn new(config: ConsolidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    pub fn consolidate(&self, store: &mut PatternStore) -> ConsolidationReport {
        let started = Instant::now();

        let mut ordered: Vec<&Pattern> = store.patterns().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let pairs = self.close_pairs(&ordered);
        let (removed, absorbed) = self.find_duplicates(&ordered, &pairs);
        let contradictions = self.find_contradictions(&ordered, &pairs, &removed);
        let pruned = self.find_stale(&ordered, &removed);
        let flagged_patterns = ordered
            .iter()
            .enumerate()
            .filter(|(i, p)| !removed[*i] && !pruned.contains(&p.id) && p.is_flagged_for_prune())
            .count();

        for c in &contradictions {
            warn!(
                first = %c.first,
                second = %c.second,
                similarity = c.similarity,
                first_outcome = ?c.first_outcome,
                second_outcome = ?c.second_outcome,
                "Contradicting patterns detected"
            );
        }

        let duplicates: Vec<PatternId> = absorbed
            .iter()
            .flat_map(|(_, losers)| losers.iter().copied())
            .collect();

        // Everything below mutates; all decisions are already made.
        let absorbed_payload: Vec<(PatternId, Vec<Pattern>)> = absorbed
            .into_iter()
            .map(|(survivor, losers)| {
                let copies = losers
                    .iter()
                    .filter_map(|id| store.get(id).cloned())
                    .collect();
                (survivor, copies)
            })
            .collect();

        let mut merged_patterns = 0;
        for (survivor_id, losers) in absorbed_payload {
            let Some(survivor) = store.get_mut(&survivor_id) else {
                continue;
            };
            let previous = survivor.success_rate;
            for loser in &losers {
                survivor.usage_count += loser.usage_count;
                survivor.quality_history = survivor.quality_history.concat(&loser.quality_history);
            }
            survivor.record_evolution(
                EvolutionType::Merge,
                previous,
                format!("absorbed {} duplicate(s) during consolidation", losers.len()),
            );
            merged_patterns += 1;
        }

        let removed_duplicates = duplicates.len();
        let pruned_patterns = pruned.len();
        let doomed: Vec<PatternId> = duplicates.into_iter().chain(pruned).collect();
        store.remove_all(&doomed);

        let duration_ms = started.elapsed().as_millis() as u64;
        if duration_ms > self.config.max_duration_ms {
            warn!(
                duration_ms,
                budget_ms = self.config.max_duration_ms,
                patterns = store.len(),
                "Consolidation exceeded its time budget"
            );
        }

        let report = ConsolidationReport {
            removed_duplicates,
            contradictions_detected: contradictions.len(),
            pruned_patterns,
            merged_patterns,
            flagged_patterns,
            contradictions,
            duration_ms,
        };
        info!(
            removed_duplicates = report.removed_duplicates,
            contradictions = report.contradictions_detected,
            pruned = report.pruned_patterns,
            merged = report.merged_patterns,
            flagged = report.flagged_patterns,
            duration_ms,
            "Consolidation pass completed"
        );
        report
    }

    /// Every pair `(i, j)`, `i < j`, close enough to matter to either pass.
    /// Each cosine is computed once.
    fn close_pairs(&self, ordered: &[&Pattern]) -> Vec<(usize, usize, f32)> {
        let floor = self
            .config
            .dedup_threshold
            .min(self.config.contradiction_threshold);
        let mut pairs = Vec::new();
        for (i, first) in ordered.iter().enumerate() {
            for (j, second) in ordered.iter().enumerate().skip(i + 1) {
                let similarity = cosine_similarity(&first.embedding, &second.embedding);
                if similarity >= floor {
                    pairs.push((i, j, similarity));
                }
            }
        }
        pairs
    }

    /// Returns a removed flag per ordered position and survivor -> absorbed
    /// losers, in decision order. Outcome labels play no part here.
    fn find_duplicates(
        &self,
        ordered: &[&Pattern],
        pairs: &[(usize, usize, f32)],
    ) -> (Vec<bool>, Vec<(PatternId, Vec<PatternId>)>) {
        let mut removed = vec![false; ordered.len()];
        let mut absorbed: Vec<(PatternId, Vec<PatternId>)> = Vec::new();

        for &(i, j, similarity) in pairs {
            if removed[i] || removed[j] || similarity < self.config.dedup_threshold {
                continue;
            }

            let (winner, loser) = if survival_score(ordered[j]) > survival_score(ordered[i]) {
                (j, i)
            } else {
                (i, j)
            };
            removed[loser] = true;

            let loser_id = ordered[loser].id;
            let mut inherited = match absorbed.iter().position(|(s, _)| *s == loser_id) {
                Some(pos) => absorbed.remove(pos).1,
                None => Vec::new(),
            };
            inherited.push(loser_id);

            let winner_id = ordered[winner].id;
            match absorbed.iter_mut().find(|(s, _)| *s == winner_id) {
                Some((_, losers)) => losers.extend(inherited),
                None => absorbed.push((winner_id, inherited)),
            }
        }

        (removed, absorbed)
    }

    fn find_contradictions(
        &self,
        ordered: &[&Pattern],
        pairs: &[(usize, usize, f32)],
        removed: &[bool],
    ) -> Vec<Contradiction> {
        pairs
            .iter()
            .filter(|(i, j, similarity)| {
                !removed[*i]
                    && !removed[*j]
                    && *similarity >= self.config.contradiction_threshold
                    && ordered[*i].outcome != ordered[*j].outcome
            })
            .map(|&(i, j, similarity)| Contradiction {
                first: ordered[i].id,
                second: ordered[j].id,
                similarity,
                first_outcome: ordered[i].outcome,
                second_outcome: ordered[j].outcome,
            })
            .collect()
    }

    fn find_stale(&self, ordered: &[&Pattern], removed: &[bool]) -> Vec<PatternId> {
        let cutoff = Utc::now() - Duration::days(self.config.prune_age_days);
        ordered
            .iter()
            .enumerate()
            .filter(|(i, _)| !removed[*i])
            .map(|(_, p)| p)
            .filter(|p| {
                p.created_at < cutoff
                    && p.confidence() < self.config.min_confidence_keep
                    && p.usage_count < self.config.min_usage_keep
            })
            .map(|p| p.id)
            .collect()
    }
}

fn survival_score(pattern: &Pattern) -> f64 {
    pattern.usage_count as f64 * pattern.confidence()
}
