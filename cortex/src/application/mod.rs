// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application layer: stores, retrieval, distillation, consolidation and the
//! service facade that wires them to events and policy backends.

pub mod consolidation_scheduler;
pub mod consolidator;
pub mod cortex_service;
pub mod distiller;
pub mod pattern_store;
pub mod retriever;
pub mod trajectory_store;

pub use consolidation_scheduler::{ConsolidationScheduler, ConsolidationTarget};
pub use consolidator::{ConsolidationReport, Consolidator};
pub use cortex_service::{CortexService, CortexStats};
pub use distiller::{condensed_strategy, Distiller};
pub use pattern_store::{Extraction, PatternSnapshot, PatternStore};
pub use retriever::{match_confidence, PatternMatch, Ranking, Retriever};
pub use trajectory_store::{LearningBatch, TrajectoryStore};
