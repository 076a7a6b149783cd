// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Error taxonomy for the Cortex bounded context.
//!
//! Over-capacity stores and below-threshold extraction are not errors: the
//! former evict or prune silently, the latter return `Ok(None)`.

use thiserror::Error;

use super::pattern::PatternId;
use super::trajectory::TrajectoryId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CortexError {
    #[error("Trajectory {0} is not complete")]
    IncompleteTrajectory(TrajectoryId),

    #[error("Unknown trajectory: {0}")]
    UnknownTrajectory(TrajectoryId),

    #[error("Unknown pattern: {0}")]
    UnknownPattern(PatternId),

    #[error("Invalid domain tag: {0:?}")]
    InvalidDomain(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type CortexResult<T> = Result<T, CortexError>;
