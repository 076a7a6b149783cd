// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Domain events for the Cortex bounded context.
//! Emitted through the [`EventBus`](crate::infrastructure::EventBus) to external listeners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::config::LearningMode;
use super::judge::Outcome;
use super::pattern::{EvolutionType, PatternId};
use super::trajectory::TrajectoryId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CortexEvent {
    /// A trajectory was opened
    TrajectoryStarted {
        trajectory_id: TrajectoryId,
        domain: String,
        timestamp: DateTime<Utc>,
    },

    /// A trajectory was sealed with its final quality
    TrajectoryCompleted {
        trajectory_id: TrajectoryId,
        quality_score: f64,
        step_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A pattern was returned by retrieval
    PatternMatched {
        pattern_id: PatternId,
        similarity: f32,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },

    /// A pattern's success rate moved
    PatternEvolved {
        pattern_id: PatternId,
        evolution_type: EvolutionType,
        previous_quality: f64,
        new_quality: f64,
        timestamp: DateTime<Utc>,
    },

    /// Completed trajectories reached the learning threshold
    LearningTriggered {
        completed_trajectories: usize,
        batch_size: usize,
        timestamp: DateTime<Utc>,
    },

    /// Policy backends consumed a learning batch
    LearningCompleted {
        batch_size: usize,
        evicted_trajectories: usize,
        /// backend name -> reported metrics
        metrics: BTreeMap<String, BTreeMap<String, f64>>,
        timestamp: DateTime<Utc>,
    },

    ModeChanged {
        previous: LearningMode,
        current: LearningMode,
        timestamp: DateTime<Utc>,
    },

    /// Consolidation pass finished
    MemoryConsolidated {
        removed_duplicates: usize,
        contradictions_detected: usize,
        pruned_patterns: usize,
        merged_patterns: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

/// Two near-identical patterns that disagree on outcome. Kept for operator review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub first: PatternId,
    pub second: PatternId,
    pub similarity: f32,
    pub first_outcome: Outcome,
    pub second_outcome: Outcome,
}

impl CortexEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CortexEvent::TrajectoryStarted { timestamp, .. } => *timestamp,
            CortexEvent::TrajectoryCompleted { timestamp, .. } => *timestamp,
            CortexEvent::PatternMatched { timestamp, .. } => *timestamp,
            CortexEvent::PatternEvolved { timestamp, .. } => *timestamp,
            CortexEvent::LearningTriggered { timestamp, .. } => *timestamp,
            CortexEvent::LearningCompleted { timestamp, .. } => *timestamp,
            CortexEvent::ModeChanged { timestamp, .. } => *timestamp,
            CortexEvent::MemoryConsolidated { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            CortexEvent::TrajectoryStarted { .. } => "trajectory_started",
            CortexEvent::TrajectoryCompleted { .. } => "trajectory_completed",
            CortexEvent::PatternMatched { .. } => "pattern_matched",
            CortexEvent::PatternEvolved { .. } => "pattern_evolved",
            CortexEvent::LearningTriggered { .. } => "learning_triggered",
            CortexEvent::LearningCompleted { .. } => "learning_completed",
            CortexEvent::ModeChanged { .. } => "mode_changed",
            CortexEvent::MemoryConsolidated { .. } => "memory_consolidated",
        }
    }
}
