// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Consolidation Scheduler - Background task for time-triggered consolidation
//!
//! Runs a consolidation pass every `interval_seconds` until cancelled. Volume
//! triggered passes happen inline in the service and are independent of this
//! loop.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Periodic memory maintenance for the pattern store

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::consolidator::ConsolidationReport;
use crate::application::cortex_service::CortexService;
use crate::domain::ConsolidationConfig;

/// Anything the scheduler can consolidate
pub trait ConsolidationTarget: Send + Sync {
    fn consolidate(&self) -> ConsolidationReport;
}

impl ConsolidationTarget for CortexService {
    fn consolidate(&self) -> ConsolidationReport {
        CortexService::consolidate(self)
    }
}

pub struct ConsolidationScheduler {
    target: Arc<dyn ConsolidationTarget>,
    interval_seconds: u64,
    enabled: bool,
    shutdown_token: CancellationToken,
}

impl ConsolidationScheduler {
    pub fn new(target: Arc<dyn ConsolidationTarget>, config: &ConsolidationConfig) -> Self {
        Self {
            target,
            interval_seconds: config.interval_seconds.max(1),
            enabled: config.enabled,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start the scheduler. The first pass runs immediately.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.enabled {
            info!("Consolidation scheduler is disabled");
            return;
        }

        info!(
            interval_seconds = self.interval_seconds,
            "Starting consolidation scheduler"
        );

        let mut tick = interval(Duration::from_secs(self.interval_seconds));

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    debug!("Running scheduled consolidation");
                    let report = self.cycle();
                    info!(
                        removed_duplicates = report.removed_duplicates,
                        contradictions = report.contradictions_detected,
                        pruned = report.pruned_patterns,
                        "Scheduled consolidation completed"
                    );
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping consolidation scheduler");
                    break;
                }
            }
        }

        info!("Consolidation scheduler stopped");
    }

    fn cycle(&self) -> ConsolidationReport {
        self.target.consolidate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockTarget {
        runs: AtomicUsize,
    }

    impl ConsolidationTarget for MockTarget {
        fn consolidate(&self) -> ConsolidationReport {
            self.runs.fetch_add(1, Ordering::SeqCst);
            ConsolidationReport {
                removed_duplicates: 2,
                ..Default::default()
            }
        }
    }

    #[test]
    fn test_cycle_delegates_to_target() {
        let target = Arc::new(MockTarget::default());
        let scheduler = ConsolidationScheduler::new(target.clone(), &ConsolidationConfig::default());

        assert_eq!(scheduler.cycle().removed_duplicates, 2);
        assert_eq!(target.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scheduler_runs_and_stops() {
        let target = Arc::new(MockTarget::default());
        let scheduler = Arc::new(ConsolidationScheduler::new(
            target.clone(),
            &ConsolidationConfig::default(),
        ));
        let token = scheduler.shutdown_token();
        let handle = scheduler.start();

        for _ in 0..100 {
            if target.runs.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        token.cancel();
        handle.await.unwrap();

        // hourly interval: only the immediate first tick ran
        assert_eq!(target.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scheduler_disabled() {
        let target = Arc::new(MockTarget::default());
        let config = ConsolidationConfig {
            enabled: false,
            ..Default::default()
        };
        let scheduler = Arc::new(ConsolidationScheduler::new(target.clone(), &config));

        scheduler.start().await.unwrap();
        assert_eq!(target.runs.load(Ordering::SeqCst), 0);
    }
}
