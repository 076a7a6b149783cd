// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Trajectory Aggregate
//!
//! A [`Trajectory`] records one task attempt as an ordered list of
//! [`TrajectoryStep`]s. Steps are append-only while the trajectory is open;
//! [`Trajectory::seal`] finalises the quality score and freezes it.
//!
//! ## Running quality
//!
//! After every step the score is recomputed as
//! `0.8 * mean_reward + 0.2 * min(1, 10 / step_count)` and clamped to `[0, 1]`.
//! Short trajectories get the full brevity bonus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use super::judge::TrajectoryVerdict;
use super::memory::DistilledMemory;

const REWARD_WEIGHT: f64 = 0.8;
const BREVITY_WEIGHT: f64 = 0.2;
const BREVITY_STEPS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrajectoryId(pub Uuid);

impl TrajectoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrajectoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrajectoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One action taken inside a trajectory. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryStep {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub state_before: Vec<f32>,
    pub state_after: Vec<f32>,
    pub reward: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    pub id: TrajectoryId,
    pub context: String,
    pub domain: String,
    pub steps: Vec<TrajectoryStep>,
    pub quality_score: f64,
    pub is_complete: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub verdict: Option<TrajectoryVerdict>,
    pub distilled_memory: Option<DistilledMemory>,
}

impl Trajectory {
    pub fn new(context: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            id: TrajectoryId::new(),
            context: context.into(),
            domain: domain.into(),
            steps: Vec::new(),
            quality_score: 0.0,
            is_complete: false,
            started_at: Utc::now(),
            ended_at: None,
            verdict: None,
            distilled_memory: None,
        }
    }

    /// Append a step and refresh the running quality score.
    ///
    /// `state_before` is the previous step's `state_after`, or the given
    /// embedding itself for the first step. Returns `false` (and changes
    /// nothing) once the trajectory is sealed.
    pub fn push_step(
        &mut self,
        action: impl Into<String>,
        reward: f64,
        state_embedding: Vec<f32>,
        metadata: Option<HashMap<String, String>>,
    ) -> bool {
        if self.is_complete {
            return false;
        }

        let state_before = self
            .steps
            .last()
            .map(|s| s.state_after.clone())
            .unwrap_or_else(|| state_embedding.clone());

        self.steps.push(TrajectoryStep {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action: action.into(),
            state_before,
            state_after: state_embedding,
            reward,
            metadata,
        });
        self.quality_score = self.running_quality();
        true
    }

    /// Seal the trajectory. `final_quality` overrides the running score.
    pub fn seal(&mut self, final_quality: Option<f64>) -> bool {
        if self.is_complete {
            return false;
        }
        if let Some(q) = final_quality {
            self.quality_score = clamp_unit(q);
        }
        self.is_complete = true;
        self.ended_at = Some(Utc::now());
        true
    }

    pub fn running_quality(&self) -> f64 {
        let n = self.steps.len();
        if n == 0 {
            return 0.0;
        }
        let brevity = (BREVITY_STEPS / n as f64).min(1.0);
        clamp_unit(REWARD_WEIGHT * self.mean_reward() + BREVITY_WEIGHT * brevity)
    }

    pub fn mean_reward(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        self.steps.iter().map(|s| s.reward).sum::<f64>() / self.steps.len() as f64
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn last_step(&self) -> Option<&TrajectoryStep> {
        self.steps.last()
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.action.as_str())
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at.map(|end| (end - self.started_at).num_milliseconds())
    }
}

pub(crate) fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        return 0.0;
    }
    v.clamp(0.0, 1.0)
}
