// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Infrastructure layer for the Cortex bounded context

pub mod event_bus;
pub mod telemetry;
pub mod vector_index;

pub use event_bus::{EventBus, EventBusError, EventReceiver, SubscriptionId};
pub use telemetry::{init_tracing, LogFormat};
pub use vector_index::{rank_by_similarity, InMemoryVectorIndex, IndexSync, VectorIndex};
