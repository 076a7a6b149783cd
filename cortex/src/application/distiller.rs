// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Distiller: judged trajectory -> [`DistilledMemory`].

use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{
    trajectory_embedding, CortexError, CortexResult, DistilledMemory, MemoryId, Outcome,
    Trajectory, TrajectoryJudge, TrajectoryVerdict,
};

/// Trajectories up to this many steps keep their full action sequence
const FULL_STRATEGY_STEPS: usize = 3;
const ARROW: &str = " → ";

pub struct Distiller {
    judge: Arc<dyn TrajectoryJudge>,
    threshold: f64,
    embedding_dim: usize,
}

impl Distiller {
    pub fn new(judge: Arc<dyn TrajectoryJudge>, threshold: f64, embedding_dim: usize) -> Self {
        Self {
            judge,
            threshold,
            embedding_dim,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Distill a completed trajectory, judging it first when no verdict is attached.
    ///
    /// Below the distillation threshold the trajectory is left untouched and
    /// `Ok(None)` is returned. On success the verdict and the memory are both
    /// attached to `trajectory`.
    pub fn distill(&self, trajectory: &mut Trajectory) -> CortexResult<Option<DistilledMemory>> {
        if !trajectory.is_complete {
            return Err(CortexError::IncompleteTrajectory(trajectory.id));
        }
        if trajectory.quality_score < self.threshold {
            debug!(
                trajectory_id = %trajectory.id,
                quality = trajectory.quality_score,
                threshold = self.threshold,
                "Trajectory below distillation threshold"
            );
            return Ok(None);
        }

        if trajectory.verdict.is_none() {
            trajectory.verdict = Some(self.judge.judge(trajectory)?);
        }

        let states: Vec<&[f32]> = trajectory.steps.iter().map(|s| s.state_after.as_slice()).collect();
        let memory = DistilledMemory {
            id: MemoryId::new(),
            source_trajectory: trajectory.id,
            domain: trajectory.domain.clone(),
            strategy: condensed_strategy(trajectory),
            key_learnings: key_learnings(trajectory, trajectory.verdict.as_ref()),
            embedding: trajectory_embedding(&states, self.embedding_dim),
            quality: trajectory.quality_score,
            usage_count: 0,
            last_used: None,
            created_at: Utc::now(),
        };

        trajectory.distilled_memory = Some(memory.clone());
        debug!(
            trajectory_id = %trajectory.id,
            memory_id = %memory.id,
            learnings = memory.key_learnings.len(),
            "Trajectory distilled"
        );
        Ok(Some(memory))
    }
}

/// Action sequence joined with arrows. Longer trajectories keep the first
/// two actions and the last one around an ellipsis.
pub fn condensed_strategy(trajectory: &Trajectory) -> String {
    let actions: Vec<&str> = trajectory.actions().collect();
    match actions.len() {
        0 => "(no actions)".to_string(),
        n if n <= FULL_STRATEGY_STEPS => actions.join(ARROW),
        n => [actions[0], actions[1], "...", actions[n - 1]].join(ARROW),
    }
}

fn key_learnings(trajectory: &Trajectory, verdict: Option<&TrajectoryVerdict>) -> Vec<String> {
    let mut learnings = Vec::new();

    if let Some(verdict) = verdict {
        learnings.extend(verdict.strengths.iter().cloned());
        if verdict.outcome != Outcome::Success {
            learnings.extend(verdict.improvements.iter().cloned());
        }
    }

    let best = trajectory
        .steps
        .iter()
        .max_by(|a, b| a.reward.partial_cmp(&b.reward).unwrap_or(std::cmp::Ordering::Equal));
    if let Some(step) = best {
        learnings.push(format!(
            "Most rewarding action in {}: {} ({:.2})",
            trajectory.domain, step.action, step.reward
        ));
    }

    if learnings.is_empty() {
        learnings.push(format!(
            "Completed '{}' with quality {:.2}",
            trajectory.context, trajectory.quality_score
        ));
    }
    learnings
}
