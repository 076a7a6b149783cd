// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Event Bus Implementation - Observer Registry for Cortex Events
//
// Listeners are registered under a SubscriptionId and invoked synchronously,
// in registration order, on every emit. A listener that returns an error or
// panics is logged and skipped; the remaining listeners still run.
//
// Every emitted event is also forwarded to a tokio broadcast channel so async
// consumers (log shippers, SSE endpoints) can stream events without
// registering a callback.

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::CortexEvent;

pub type SubscriptionId = u64;

type Listener = Arc<dyn Fn(&CortexEvent) -> anyhow::Result<()> + Send + Sync>;

struct Registry {
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<CortexEvent>,
}

/// Cloneable handle to a shared listener registry
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    /// Create a bus whose broadcast bridge buffers `capacity` events per receiver
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            registry: Arc::new(Registry {
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                sender,
            }),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&CortexEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.listeners.write().push((id, Arc::new(listener)));
        debug!(subscription_id = id, "Event listener registered");
        id
    }

    /// Returns false when the id was never issued or is already removed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.registry.listeners.write();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    pub fn emit(&self, event: CortexEvent) {
        // Listeners may subscribe or unsubscribe from inside a callback, so the
        // registry lock is released before any of them runs.
        let listeners: Vec<(SubscriptionId, Listener)> = self.registry.listeners.read().clone();

        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    subscription_id = id,
                    event_type = event.event_type(),
                    "Event listener failed: {}",
                    e
                ),
                Err(_) => warn!(
                    subscription_id = id,
                    event_type = event.event_type(),
                    "Event listener panicked"
                ),
            }
        }

        if self.registry.sender.send(event).is_err() {
            debug!("No channel subscribers listening to event");
        }
    }

    /// Stream every emitted event through a broadcast receiver
    pub fn subscribe_channel(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.registry.sender.subscribe(),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry.listeners.read().len()
    }

    pub fn channel_subscriber_count(&self) -> usize {
        self.registry.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<CortexEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<CortexEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    pub fn try_recv(&mut self) -> Result<CortexEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
