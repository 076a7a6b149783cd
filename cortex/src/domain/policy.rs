// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Policy Backend Contract
//!
//! Learning backends (PPO, DQN, tabular Q-learning, ...) live outside this
//! crate. The cortex only hands them quality-filtered batches of completed
//! trajectories and records whatever metrics they report.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::trajectory::Trajectory;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyMetrics {
    pub values: BTreeMap<String, f64>,
}

impl PolicyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: f64) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

pub trait PolicyBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Consume one learning batch. Nothing in the cortex depends on the result.
    fn update(&mut self, trajectories: &[Trajectory]) -> PolicyMetrics;

    fn get_action(&self, state: &[f32]) -> Option<String>;
}
