// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer of the learning cortex.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Aggregates (trajectories, patterns, memories), the cluster
//!   index, pure vector math and the rule-based judge. No locking, no I/O.

pub mod cluster;
pub mod config;
pub mod domain_tag;
pub mod errors;
pub mod events;
pub mod history;
pub mod judge;
pub mod memory;
pub mod pattern;
pub mod policy;
pub mod trajectory;
pub mod vector;

pub use cluster::*;
pub use config::*;
pub use domain_tag::*;
pub use errors::*;
pub use events::*;
pub use history::*;
pub use judge::*;
pub use memory::*;
pub use pattern::*;
pub use policy::*;
pub use trajectory::*;
pub use vector::*;
