// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Reasoning Cortex
//!
//! Continual-learning memory for agents: records execution trajectories,
//! distills the good ones into reusable patterns, retrieves patterns for new
//! tasks and periodically consolidates what it has learned.
//!
//! # Architecture
//!
//! - **Layer:** Learning & Memory Layer
//! - **Entry point:** [`CortexService`]

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::*;
pub use domain::*;
pub use infrastructure::*;
