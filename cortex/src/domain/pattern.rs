// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Pattern Aggregate
//!
//! A [`Pattern`] is a reusable strategy distilled from one or more successful
//! trajectories. Its `success_rate` is an exponential moving average of every
//! quality observation fed to it; the raw observations and the evolution log
//! live in fixed-capacity ring buffers (100 and 50 entries by default).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::history::BoundedHistory;
use super::judge::Outcome;
use super::memory::MemoryId;
use super::trajectory::clamp_unit;

/// Deltas above this classify an evolution as an improvement.
pub const IMPROVEMENT_DELTA: f64 = 0.05;
/// Deltas below this flag the pattern for possible pruning.
pub const PRUNE_DELTA: f64 = -0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternId(pub Uuid);

impl PatternId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PatternId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionType {
    Improvement,
    Merge,
    Split,
    Prune,
}

impl EvolutionType {
    /// Classify an observation delta (`quality - previous success rate`).
    ///
    /// Deltas between the two thresholds also map to `Improvement`. That
    /// default is kept for compatibility with existing evolution logs and is
    /// pending product review.
    pub fn classify(delta: f64) -> Self {
        if delta > IMPROVEMENT_DELTA {
            EvolutionType::Improvement
        } else if delta < PRUNE_DELTA {
            EvolutionType::Prune
        } else {
            EvolutionType::Improvement
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEvolution {
    pub timestamp: DateTime<Utc>,
    pub evolution_type: EvolutionType,
    pub previous_quality: f64,
    pub new_quality: f64,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLimits {
    pub quality: usize,
    pub evolution: usize,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            quality: 100,
            evolution: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    pub name: String,
    pub domain: String,
    pub embedding: Vec<f32>,
    pub strategy: String,
    pub success_rate: f64,
    pub usage_count: u64,
    /// Outcome label used for contradiction detection. Fixed at creation.
    pub outcome: Outcome,
    pub quality_history: BoundedHistory<f64>,
    pub evolution_history: BoundedHistory<PatternEvolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_memory: Option<MemoryId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pattern {
    pub fn new(
        name: impl Into<String>,
        domain: impl Into<String>,
        embedding: Vec<f32>,
        strategy: impl Into<String>,
        success_rate: f64,
        limits: HistoryLimits,
    ) -> Self {
        let now = Utc::now();
        let success_rate = clamp_unit(success_rate);
        Self {
            id: PatternId::new(),
            name: name.into(),
            domain: domain.into(),
            embedding,
            strategy: strategy.into(),
            success_rate,
            usage_count: 1,
            outcome: Outcome::from_quality(success_rate),
            quality_history: BoundedHistory::new(limits.quality),
            evolution_history: BoundedHistory::new(limits.evolution),
            source_memory: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_source_memory(mut self, memory: MemoryId) -> Self {
        self.source_memory = Some(memory);
        self
    }

    pub fn limits(&self) -> HistoryLimits {
        HistoryLimits {
            quality: self.quality_history.capacity(),
            evolution: self.evolution_history.capacity(),
        }
    }

    /// Fold one quality observation into the moving average.
    /// Returns the previous success rate.
    pub fn observe(&mut self, quality: f64, learning_rate: f64) -> f64 {
        let quality = clamp_unit(quality);
        let previous = self.success_rate;
        self.success_rate = clamp_unit(previous * (1.0 - learning_rate) + quality * learning_rate);
        self.quality_history.push(quality);
        self.updated_at = Utc::now();
        previous
    }

    /// Observe `quality` and log a classified evolution record.
    pub fn evolve(
        &mut self,
        quality: f64,
        learning_rate: f64,
        context: Option<&str>,
    ) -> PatternEvolution {
        let previous = self.observe(quality, learning_rate);
        let evolution_type = EvolutionType::classify(clamp_unit(quality) - previous);
        let description = match context {
            Some(ctx) => format!("observed quality {:.3}: {}", quality, ctx),
            None => format!("observed quality {:.3}", quality),
        };
        self.record_evolution(evolution_type, previous, description)
    }

    pub fn record_evolution(
        &mut self,
        evolution_type: EvolutionType,
        previous_quality: f64,
        description: impl Into<String>,
    ) -> PatternEvolution {
        let record = PatternEvolution {
            timestamp: Utc::now(),
            evolution_type,
            previous_quality,
            new_quality: self.success_rate,
            description: description.into(),
        };
        self.evolution_history.push(record.clone());
        self.updated_at = record.timestamp;
        record
    }

    /// Reliability estimate used by consolidation.
    pub fn confidence(&self) -> f64 {
        self.success_rate
    }

    /// Ranking used when the store overflows: `success_rate * ln(usage + 1)`.
    pub fn retention_score(&self) -> f64 {
        self.success_rate * ((self.usage_count as f64) + 1.0).ln()
    }

    /// True when the latest evolution record flagged the pattern for pruning.
    pub fn is_flagged_for_prune(&self) -> bool {
        matches!(
            self.evolution_history.last().map(|e| e.evolution_type),
            Some(EvolutionType::Prune)
        )
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }
}
