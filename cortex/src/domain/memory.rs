// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::trajectory::TrajectoryId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Condensed, reusable lesson extracted from one judged trajectory.
///
/// `quality` mirrors the source trajectory's final quality score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistilledMemory {
    pub id: MemoryId,
    pub source_trajectory: TrajectoryId,
    pub domain: String,
    pub strategy: String,
    pub key_learnings: Vec<String>,
    pub embedding: Vec<f32>,
    pub quality: f64,
    pub usage_count: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DistilledMemory {
    /// Record that the memory was handed to a caller.
    pub fn touch(&mut self) {
        self.usage_count += 1;
        self.last_used = Some(Utc::now());
    }
}
