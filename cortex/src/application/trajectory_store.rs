// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # TrajectoryStore
//!
//! Owns every in-flight and completed [`Trajectory`] until eviction.
//!
//! ## Capacity policy
//!
//! Once completed trajectories reach 80% of `capacity`, a learning trigger
//! fires: the quality-filtered completed set is handed out as a
//! [`LearningBatch`] and the lowest-quality completed trajectories are evicted
//! until at most 50% of capacity remain. In-flight trajectories are never
//! evicted. Beginning a trajectory on a full store evicts the single worst
//! completed trajectory; if none exists the store grows past capacity.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tracing::{debug, warn};

use crate::domain::{
    validate_domain, CortexResult, DistilledMemory, Trajectory, TrajectoryId, TrajectoryVerdict,
};

const TRIGGER_FRACTION: f64 = 0.8;
const RETAIN_FRACTION: f64 = 0.5;

/// Completed trajectories released by a learning trigger
#[derive(Debug, Clone)]
pub struct LearningBatch {
    /// Completed trajectories in the store when the trigger fired
    pub completed_trajectories: usize,
    /// Completed trajectories at or above the quality threshold
    pub trajectories: Vec<Trajectory>,
    pub evicted: usize,
}

pub struct TrajectoryStore {
    trajectories: HashMap<TrajectoryId, Trajectory>,
    capacity: usize,
    embedding_dim: usize,
}

impl TrajectoryStore {
    pub fn new(capacity: usize, embedding_dim: usize) -> Self {
        Self {
            trajectories: HashMap::new(),
            capacity: capacity.max(1),
            embedding_dim,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn begin(&mut self, context: &str, domain: &str) -> CortexResult<TrajectoryId> {
        validate_domain(domain)?;

        if self.trajectories.len() >= self.capacity {
            self.evict_lowest_completed(self.trajectories.len() + 1 - self.capacity);
        }

        let trajectory = Trajectory::new(context, domain);
        let id = trajectory.id;
        self.trajectories.insert(id, trajectory);
        debug!(trajectory_id = %id, domain, "Trajectory started");
        Ok(id)
    }

    /// Append a step. Unknown ids, sealed trajectories and embeddings of the
    /// wrong dimension are ignored; the return value says whether a step was recorded.
    pub fn record_step(
        &mut self,
        id: TrajectoryId,
        action: &str,
        reward: f64,
        state_embedding: Vec<f32>,
        metadata: Option<HashMap<String, String>>,
    ) -> bool {
        if state_embedding.len() != self.embedding_dim {
            warn!(
                trajectory_id = %id,
                expected = self.embedding_dim,
                actual = state_embedding.len(),
                "Ignoring step with mismatched embedding dimension"
            );
            return false;
        }

        match self.trajectories.get_mut(&id) {
            Some(trajectory) => trajectory.push_step(action, reward, state_embedding, metadata),
            None => {
                debug!(trajectory_id = %id, "Ignoring step for unknown trajectory");
                false
            }
        }
    }

    /// Seal a trajectory. `None` if it is unknown or already complete.
    pub fn complete(&mut self, id: TrajectoryId, final_quality: Option<f64>) -> Option<Trajectory> {
        let trajectory = self.trajectories.get_mut(&id)?;
        if !trajectory.seal(final_quality) {
            return None;
        }
        debug!(
            trajectory_id = %id,
            quality = trajectory.quality_score,
            steps = trajectory.step_count(),
            "Trajectory completed"
        );
        Some(trajectory.clone())
    }

    /// Fire the learning trigger when completed trajectories reach 80% of capacity.
    pub fn check_learning_trigger(&mut self, quality_threshold: f64) -> Option<LearningBatch> {
        let completed = self.completed_count();
        if (completed as f64) < TRIGGER_FRACTION * self.capacity as f64 {
            return None;
        }

        let mut trajectories: Vec<Trajectory> = self
            .trajectories
            .values()
            .filter(|t| t.is_complete && t.quality_score >= quality_threshold)
            .cloned()
            .collect();
        trajectories.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));

        let retain = (RETAIN_FRACTION * self.capacity as f64).floor() as usize;
        let evicted = self.evict_lowest_completed(completed.saturating_sub(retain));

        debug!(
            completed,
            batch_size = trajectories.len(),
            evicted,
            "Learning trigger fired"
        );

        Some(LearningBatch {
            completed_trajectories: completed,
            trajectories,
            evicted,
        })
    }

    pub fn get(&self, id: &TrajectoryId) -> Option<&Trajectory> {
        self.trajectories.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &TrajectoryId) -> Option<&mut Trajectory> {
        self.trajectories.get_mut(id)
    }

    /// Copy judge and distiller results back onto a stored trajectory.
    /// Returns false when the trajectory was evicted in the meantime.
    pub fn annotate(
        &mut self,
        id: TrajectoryId,
        verdict: Option<TrajectoryVerdict>,
        memory: Option<DistilledMemory>,
    ) -> bool {
        match self.trajectories.entry(id) {
            Entry::Occupied(mut entry) => {
                let trajectory = entry.get_mut();
                if verdict.is_some() {
                    trajectory.verdict = verdict;
                }
                if memory.is_some() {
                    trajectory.distilled_memory = memory;
                }
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Mark the trajectory's distilled memory as used. False when there is none.
    pub fn touch_memory(&mut self, id: &TrajectoryId) -> bool {
        match self
            .trajectories
            .get_mut(id)
            .and_then(|t| t.distilled_memory.as_mut())
        {
            Some(memory) => {
                memory.touch();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.trajectories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.trajectories.values().filter(|t| !t.is_complete).count()
    }

    pub fn completed_count(&self) -> usize {
        self.trajectories.values().filter(|t| t.is_complete).count()
    }

    pub fn completed(&self) -> impl Iterator<Item = &Trajectory> {
        self.trajectories.values().filter(|t| t.is_complete)
    }

    /// Evict up to `count` completed trajectories, lowest quality first.
    fn evict_lowest_completed(&mut self, count: usize) -> usize {
        if count == 0 {
            return 0;
        }

        let mut completed: Vec<(TrajectoryId, f64)> = self
            .trajectories
            .values()
            .filter(|t| t.is_complete)
            .map(|t| (t.id, t.quality_score))
            .collect();
        completed.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut evicted = 0;
        for (id, _) in completed.into_iter().take(count) {
            self.trajectories.remove(&id);
            evicted += 1;
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CortexError;

    fn store(capacity: usize) -> TrajectoryStore {
        TrajectoryStore::new(capacity, 3)
    }

    fn finished(store: &mut TrajectoryStore, quality: f64) -> TrajectoryId {
        let id = store.begin("task", "test").unwrap();
        store.record_step(id, "act", 1.0, vec![1.0, 0.0, 0.0], None);
        store.complete(id, Some(quality));
        id
    }

    #[test]
    fn test_begin_rejects_malformed_domain() {
        let mut s = store(10);
        assert_eq!(
            s.begin("task", "bad domain"),
            Err(CortexError::InvalidDomain("bad domain".to_string()))
        );
        assert!(s.is_empty());
    }

    #[test]
    fn test_record_step_ignores_invalid_input() {
        let mut s = store(10);
        let unknown = TrajectoryId::new();
        assert!(!s.record_step(unknown, "a", 1.0, vec![0.0; 3], None));

        let id = s.begin("task", "test").unwrap();
        assert!(!s.record_step(id, "a", 1.0, vec![0.0; 5], None));
        assert!(s.record_step(id, "a", 1.0, vec![0.0; 3], None));

        s.complete(id, None);
        assert!(!s.record_step(id, "late", 1.0, vec![0.0; 3], None));
        assert_eq!(s.get(&id).unwrap().step_count(), 1);
    }

    #[test]
    fn test_complete_is_idempotent() {
        let mut s = store(10);
        let id = s.begin("task", "test").unwrap();
        s.record_step(id, "a", 0.5, vec![1.0, 0.0, 0.0], None);
        let running = s.get(&id).unwrap().quality_score;

        let sealed = s.complete(id, None).unwrap();
        assert_eq!(sealed.quality_score, running);
        assert!(s.complete(id, Some(0.1)).is_none());
        assert!(s.complete(TrajectoryId::new(), None).is_none());
    }

    #[test]
    fn test_learning_trigger_at_eighty_percent() {
        let mut s = store(10);
        for i in 0..7 {
            finished(&mut s, 0.1 * i as f64);
            assert!(s.check_learning_trigger(0.5).is_none());
        }
        finished(&mut s, 0.95);

        let batch = s.check_learning_trigger(0.5).unwrap();
        assert_eq!(batch.completed_trajectories, 8);
        assert!(batch.trajectories.iter().all(|t| t.quality_score >= 0.5));
        assert_eq!(batch.evicted, 3);
        assert_eq!(s.completed_count(), 5);
        assert!(s.check_learning_trigger(0.5).is_none());

        // the survivors are the best five
        let min_kept = s.completed().map(|t| t.quality_score).fold(f64::MAX, f64::min);
        assert!(min_kept >= 0.3 - 1e-9);
    }

    #[test]
    fn test_in_flight_trajectories_are_never_evicted() {
        let mut s = store(4);
        let open: Vec<TrajectoryId> = (0..3).map(|_| s.begin("open", "test").unwrap()).collect();
        finished(&mut s, 0.2);
        // store is full: the only completed trajectory makes room
        let extra = s.begin("extra", "test").unwrap();

        for id in open.iter().chain(std::iter::once(&extra)) {
            assert!(s.get(id).is_some());
        }
        assert_eq!(s.completed_count(), 0);

        // nothing left to evict: the store grows instead of dropping open work
        s.begin("overflow", "test").unwrap();
        assert_eq!(s.active_count(), 5);
    }

    #[test]
    fn test_annotate_missing_trajectory() {
        let mut s = store(4);
        assert!(!s.annotate(TrajectoryId::new(), None, None));
    }

    #[test]
    fn test_touch_memory_requires_a_memory() {
        let mut s = store(4);
        let id = s.begin("task", "ops").unwrap();
        assert!(!s.touch_memory(&id));
    }
}
