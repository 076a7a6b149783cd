// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{CortexError, CortexResult};
use super::trajectory::Trajectory;

/// Outcome label attached to verdicts and patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Partial,
    Failure,
}

impl Outcome {
    /// Label derived from a quality score alone, using the default judge thresholds.
    pub fn from_quality(quality: f64) -> Self {
        let t = JudgeThresholds::default();
        if quality >= t.success_quality {
            Outcome::Success
        } else if quality < t.failure_quality {
            Outcome::Failure
        } else {
            Outcome::Partial
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryVerdict {
    pub outcome: Outcome,
    pub success: bool,
    pub confidence: f64,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub improvements: Vec<String>,
    pub relevance: f64,
    pub evidence: Vec<String>,
    pub judged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JudgeThresholds {
    pub success_quality: f64,
    pub success_reward: f64,
    pub failure_quality: f64,
    pub failure_reward: f64,
    /// Trajectories longer than this are reported as inefficient.
    pub long_trajectory_steps: usize,
}

impl Default for JudgeThresholds {
    fn default() -> Self {
        Self {
            success_quality: 0.8,
            success_reward: 0.7,
            failure_quality: 0.4,
            failure_reward: 0.3,
            long_trajectory_steps: 10,
        }
    }
}

pub trait TrajectoryJudge: Send + Sync {
    /// Produces a verdict for a sealed trajectory. Never mutates it.
    fn judge(&self, trajectory: &Trajectory) -> CortexResult<TrajectoryVerdict>;
}

/// Rule-based judge: pure threshold evaluation, no model calls.
#[derive(Debug, Clone, Default)]
pub struct RuleJudge {
    thresholds: JudgeThresholds,
}

impl RuleJudge {
    pub fn new(thresholds: JudgeThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &JudgeThresholds {
        &self.thresholds
    }

    fn classify(&self, quality: f64, avg_reward: f64) -> Outcome {
        let t = &self.thresholds;
        if quality >= t.success_quality && avg_reward >= t.success_reward {
            Outcome::Success
        } else if quality < t.failure_quality || avg_reward < t.failure_reward {
            Outcome::Failure
        } else {
            Outcome::Partial
        }
    }
}

impl TrajectoryJudge for RuleJudge {
    fn judge(&self, trajectory: &Trajectory) -> CortexResult<TrajectoryVerdict> {
        if !trajectory.is_complete {
            return Err(CortexError::IncompleteTrajectory(trajectory.id));
        }

        let t = &self.thresholds;
        let quality = trajectory.quality_score;
        let avg_reward = trajectory.mean_reward();
        let steps = trajectory.step_count();
        let outcome = self.classify(quality, avg_reward);

        let mut evidence = vec![
            format!("quality_score={:.3}", quality),
            format!("avg_reward={:.3}", avg_reward),
            format!("step_count={}", steps),
        ];
        match trajectory.last_step() {
            Some(last) => evidence.push(format!(
                "final_step action={} reward={:.3}",
                last.action, last.reward
            )),
            None => evidence.push("final_step none".to_string()),
        }

        let mut strengths = Vec::new();
        let mut weaknesses = Vec::new();
        let mut improvements = Vec::new();

        if quality >= t.success_quality {
            strengths.push(format!("High overall quality ({:.2})", quality));
        }
        if avg_reward >= t.success_reward {
            strengths.push(format!("Consistently high rewards ({:.2} average)", avg_reward));
        }
        if outcome == Outcome::Success && steps <= t.long_trajectory_steps {
            strengths.push(format!("Efficient: completed in {} steps", steps));
        }

        if quality < t.failure_quality {
            weaknesses.push(format!("Low overall quality ({:.2})", quality));
            improvements.push("Revisit the strategy before reusing it".to_string());
        }
        if avg_reward < t.failure_reward {
            weaknesses.push(format!("Low average reward ({:.2})", avg_reward));
            improvements.push("Prefer actions that earned higher rewards in similar contexts".to_string());
        }
        if steps > t.long_trajectory_steps {
            weaknesses.push(format!("Long trajectory ({} steps)", steps));
            improvements.push("Shorten the action sequence".to_string());
        }
        let negative = trajectory.steps.iter().filter(|s| s.reward < 0.0).count();
        if negative > 0 {
            weaknesses.push(format!("{} steps with negative reward", negative));
            improvements.push("Avoid the actions that produced negative rewards".to_string());
        }
        if outcome == Outcome::Partial && improvements.is_empty() {
            improvements.push(format!(
                "Raise quality above {:.2} and average reward above {:.2} to reach success",
                t.success_quality, t.success_reward
            ));
        }

        let combined = (quality + avg_reward.clamp(0.0, 1.0)) / 2.0;
        let confidence = match outcome {
            Outcome::Success => combined,
            Outcome::Failure => 1.0 - combined,
            Outcome::Partial => 0.5,
        }
        .clamp(0.0, 1.0);

        let relevance = (quality * (steps as f64 / 3.0).min(1.0)).clamp(0.0, 1.0);

        Ok(TrajectoryVerdict {
            outcome,
            success: outcome == Outcome::Success,
            confidence,
            strengths,
            weaknesses,
            improvements,
            relevance,
            evidence,
            judged_at: Utc::now(),
        })
    }
}
