// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # CortexService - Learning Loop Facade
//!
//! Owns the trajectory store, the pattern store (with its cluster index), the
//! judge, distiller, retriever and consolidator, the event bus and any
//! registered policy backends.
//!
//! ## Locking
//!
//! Each store sits behind its own `parking_lot::RwLock`: one exclusive writer,
//! any number of readers. Locks are always released before events are
//! emitted, so listeners may call back into the service. When both stores are
//! needed the trajectory lock is taken first.
//!
//! ## Automatic maintenance
//!
//! - **Learning trigger:** completing a trajectory may hand a batch to every
//!   registered [`PolicyBackend`] (see [`TrajectoryStore`]).
//! - **Volume trigger:** after `consolidation.volume_trigger` newly created
//!   patterns, [`CortexService::consolidate`] runs inline.
//! - **Time trigger:** see [`ConsolidationScheduler`](crate::application::ConsolidationScheduler).

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::application::consolidator::{ConsolidationReport, Consolidator};
use crate::application::distiller::Distiller;
use crate::application::pattern_store::{Extraction, PatternSnapshot, PatternStore};
use crate::application::retriever::{PatternMatch, Ranking, Retriever};
use crate::application::trajectory_store::{LearningBatch, TrajectoryStore};
use crate::domain::{
    CortexConfig, CortexError, CortexEvent, CortexResult, DistilledMemory, EvolutionType,
    LearningMode, Pattern, PatternEvolution, PatternId, PolicyBackend, RuleJudge, Trajectory,
    TrajectoryId, TrajectoryJudge, TrajectoryVerdict,
};
use crate::infrastructure::{rank_by_similarity, EventBus, IndexSync, VectorIndex};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CortexStats {
    pub mode: LearningMode,
    pub trajectories_active: usize,
    pub trajectories_completed: usize,
    pub patterns: usize,
    pub clusters: usize,
    pub learning_triggers: u64,
    pub consolidations: u64,
    pub avg_success_rate: f64,
}

pub struct CortexService {
    config: RwLock<CortexConfig>,
    trajectories: RwLock<TrajectoryStore>,
    patterns: RwLock<PatternStore>,
    judge: Arc<dyn TrajectoryJudge>,
    distiller: Distiller,
    retriever: Retriever,
    consolidator: Consolidator,
    event_bus: EventBus,
    backends: Mutex<Vec<Box<dyn PolicyBackend>>>,
    vector_index: Option<Arc<dyn VectorIndex>>,
    learning_triggers: AtomicU64,
    consolidations: AtomicU64,
    created_since_consolidation: AtomicUsize,
}

impl CortexService {
    pub fn new(config: CortexConfig) -> CortexResult<Self> {
        config
            .validate()
            .map_err(|e| CortexError::InvalidConfig(e.to_string()))?;

        let mode = config.mode_config();
        let judge: Arc<dyn TrajectoryJudge> = Arc::new(RuleJudge::default());

        info!(
            mode = %config.mode,
            embedding_dim = config.embedding_dim,
            trajectory_capacity = mode.trajectory_capacity,
            pattern_clusters = mode.pattern_clusters,
            "Cortex service initialised"
        );

        Ok(Self {
            trajectories: RwLock::new(TrajectoryStore::new(
                mode.trajectory_capacity,
                config.embedding_dim,
            )),
            patterns: RwLock::new(PatternStore::new(&config)),
            distiller: Distiller::new(judge.clone(), config.distillation_threshold, config.embedding_dim),
            judge,
            retriever: Retriever::new(config.retrieval.clone()),
            consolidator: Consolidator::new(config.consolidation.clone()),
            event_bus: EventBus::with_default_capacity(),
            backends: Mutex::new(Vec::new()),
            vector_index: None,
            learning_triggers: AtomicU64::new(0),
            consolidations: AtomicU64::new(0),
            created_since_consolidation: AtomicUsize::new(0),
            config: RwLock::new(config),
        })
    }

    /// Replace the rule-based judge
    pub fn with_judge(mut self, judge: Arc<dyn TrajectoryJudge>) -> Self {
        let config = self.config.read();
        self.distiller = Distiller::new(judge.clone(), config.distillation_threshold, config.embedding_dim);
        drop(config);
        self.judge = judge;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Attach an external vector index. Must be called inside a tokio runtime:
    /// pattern writes are mirrored to the index by a spawned task.
    pub fn with_vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        let (sync, _handle) = IndexSync::spawn(index.clone());
        self.patterns.get_mut().set_index_sync(Some(sync));
        self.vector_index = Some(index);
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn config(&self) -> CortexConfig {
        self.config.read().clone()
    }

    pub fn mode(&self) -> LearningMode {
        self.config.read().mode
    }

    pub fn register_backend(&self, backend: Box<dyn PolicyBackend>) {
        info!(backend = backend.name(), "Policy backend registered");
        self.backends.lock().push(backend);
    }

    /// Suggested action from the first backend that has one
    pub fn suggest_action(&self, state: &[f32]) -> Option<String> {
        self.backends.lock().iter().find_map(|b| b.get_action(state))
    }

    // ========================================================================
    // Trajectories
    // ========================================================================

    pub fn begin_trajectory(&self, context: &str, domain: &str) -> CortexResult<TrajectoryId> {
        let id = self.trajectories.write().begin(context, domain)?;
        metrics::counter!("cortex_trajectories_started_total").increment(1);

        self.event_bus.emit(CortexEvent::TrajectoryStarted {
            trajectory_id: id,
            domain: domain.to_string(),
            timestamp: Utc::now(),
        });
        Ok(id)
    }

    pub fn record_step(&self, id: TrajectoryId, action: &str, reward: f64, state_embedding: Vec<f32>) -> bool {
        self.trajectories
            .write()
            .record_step(id, action, reward, state_embedding, None)
    }

    pub fn record_step_with_metadata(
        &self,
        id: TrajectoryId,
        action: &str,
        reward: f64,
        state_embedding: Vec<f32>,
        metadata: HashMap<String, String>,
    ) -> bool {
        self.trajectories
            .write()
            .record_step(id, action, reward, state_embedding, Some(metadata))
    }

    /// Seal a trajectory and run the learning trigger if it fires.
    pub fn complete_trajectory(&self, id: TrajectoryId, final_quality: Option<f64>) -> Option<Trajectory> {
        let quality_threshold = self.config.read().mode_config().quality_threshold;
        let (completed, batch) = {
            let mut store = self.trajectories.write();
            let completed = store.complete(id, final_quality)?;
            let batch = store.check_learning_trigger(quality_threshold);
            (completed, batch)
        };
        metrics::counter!("cortex_trajectories_completed_total").increment(1);

        self.event_bus.emit(CortexEvent::TrajectoryCompleted {
            trajectory_id: id,
            quality_score: completed.quality_score,
            step_count: completed.step_count(),
            timestamp: Utc::now(),
        });

        if let Some(batch) = batch {
            self.run_learning(batch);
        }
        Some(completed)
    }

    pub fn get_trajectory(&self, id: &TrajectoryId) -> Option<Trajectory> {
        self.trajectories.read().get(id).cloned()
    }

    pub fn judge_trajectory(&self, id: TrajectoryId) -> CortexResult<TrajectoryVerdict> {
        let trajectory = self
            .get_trajectory(&id)
            .ok_or(CortexError::UnknownTrajectory(id))?;
        let verdict = self.judge.judge(&trajectory)?;
        self.trajectories.write().annotate(id, Some(verdict.clone()), None);
        Ok(verdict)
    }

    pub fn distill_trajectory(&self, id: TrajectoryId) -> CortexResult<Option<DistilledMemory>> {
        let mut store = self.trajectories.write();
        let trajectory = store.get_mut(&id).ok_or(CortexError::UnknownTrajectory(id))?;
        self.distiller.distill(trajectory)
    }

    /// Complete (if still open), judge, distill and extract in one call.
    ///
    /// Works on a copy of the trajectory, so a learning trigger that evicts
    /// it mid-way does not interrupt the pipeline.
    pub fn learn_from_trajectory(
        &self,
        id: TrajectoryId,
        final_quality: Option<f64>,
    ) -> CortexResult<Option<Pattern>> {
        let mut trajectory = match self.complete_trajectory(id, final_quality) {
            Some(t) => t,
            None => self
                .get_trajectory(&id)
                .ok_or(CortexError::UnknownTrajectory(id))?,
        };

        if trajectory.verdict.is_none() {
            trajectory.verdict = Some(self.judge.judge(&trajectory)?);
        }
        let memory = self.distiller.distill(&mut trajectory)?;
        self.trajectories
            .write()
            .annotate(id, trajectory.verdict.clone(), memory.clone());

        Ok(self.extract_pattern(&trajectory, memory.as_ref()))
    }

    // ========================================================================
    // Patterns
    // ========================================================================

    /// Extract a pattern. A memory consumed by the extraction is marked used
    /// on the stored trajectory.
    pub fn extract_pattern(&self, trajectory: &Trajectory, memory: Option<&DistilledMemory>) -> Option<Pattern> {
        let consumes_memory = memory.or(trajectory.distilled_memory.as_ref()).is_some();
        let extraction = self.patterns.write().extract(trajectory, memory)?;
        if consumes_memory {
            self.trajectories.write().touch_memory(&trajectory.id);
        }
        self.after_extraction(std::slice::from_ref(&extraction));
        Some(extraction.pattern)
    }

    pub fn extract_batch(&self, trajectories: &[Trajectory]) -> Vec<Pattern> {
        let extracted = self.patterns.write().extract_batch(trajectories);
        self.after_extraction(&extracted);
        extracted.into_iter().map(|e| e.pattern).collect()
    }

    /// Store a caller-built pattern as-is. Counts towards the volume trigger.
    pub fn add_pattern(&self, pattern: Pattern) -> CortexResult<PatternId> {
        let created = pattern.clone();
        let id = self.patterns.write().add(pattern)?;
        self.after_extraction(&[Extraction {
            pattern: created,
            created: true,
        }]);
        Ok(id)
    }

    /// Ranked matches for `query` using the configured ranking
    pub fn find_patterns(&self, query: &[f32], k: usize) -> Vec<PatternMatch> {
        self.find_patterns_ranked(query, k, self.retriever.default_ranking())
    }

    pub fn find_patterns_ranked(&self, query: &[f32], k: usize, ranking: Ranking) -> Vec<PatternMatch> {
        let started = Instant::now();
        let matches = {
            let store = self.patterns.read();
            self.retriever.find_matches_ranked(&store, query, k, ranking)
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!("cortex_find_matches_seconds").record(elapsed_ms / 1000.0);

        let budget_ms = self.config.read().mode_config().max_latency_ms;
        if elapsed_ms > budget_ms {
            warn!(elapsed_ms, budget_ms, k, "Pattern retrieval exceeded latency budget");
        }

        metrics::counter!("cortex_pattern_matches_total").increment(matches.len() as u64);
        for m in &matches {
            self.event_bus.emit(CortexEvent::PatternMatched {
                pattern_id: m.pattern.id,
                similarity: m.similarity,
                confidence: m.confidence,
                timestamp: Utc::now(),
            });
        }
        matches
    }

    /// Nearest pattern ids from the external index, or a brute-force scan when none is attached
    pub async fn search_index(&self, query: &[f32], k: usize) -> anyhow::Result<Vec<PatternId>> {
        if let Some(index) = &self.vector_index {
            return index.search(query, k).await;
        }
        let store = self.patterns.read();
        Ok(rank_by_similarity(
            store.patterns().map(|p| (p.id, p.embedding.as_slice())),
            query,
            k,
        ))
    }

    pub fn get_pattern(&self, id: &PatternId) -> Option<Pattern> {
        self.patterns.read().get(id).cloned()
    }

    pub fn best_pattern(&self, domain: &str) -> Option<Pattern> {
        self.patterns.read().best_pattern(domain).cloned()
    }

    pub fn find_by_domain(&self, domain: &str) -> Vec<Pattern> {
        self.patterns
            .read()
            .find_by_domain(domain)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn evolve_pattern(
        &self,
        id: PatternId,
        quality: f64,
        context: Option<&str>,
    ) -> CortexResult<PatternEvolution> {
        let evolution = self.patterns.write().evolve(id, quality, context)?;
        self.emit_evolution(id, &evolution);
        Ok(evolution)
    }

    pub fn merge_patterns(&self, a: PatternId, b: PatternId) -> CortexResult<Option<Pattern>> {
        let merged = self.patterns.write().merge(a, b)?;
        if let Some(pattern) = &merged {
            if let Some(evolution) = pattern.evolution_history.last() {
                self.emit_evolution(pattern.id, evolution);
            }
        }
        Ok(merged)
    }

    pub fn split_pattern(&self, id: PatternId, parts: usize) -> CortexResult<Vec<Pattern>> {
        let children = self.patterns.write().split(id, parts)?;
        for child in &children {
            if let Some(evolution) = child.evolution_history.last() {
                self.emit_evolution(child.id, evolution);
            }
        }
        Ok(children)
    }

    pub fn snapshot_patterns(&self) -> PatternSnapshot {
        self.patterns.read().export_snapshot()
    }

    pub fn restore_patterns(&self, snapshot: PatternSnapshot) -> usize {
        self.patterns.write().import_snapshot(snapshot)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    pub fn consolidate(&self) -> ConsolidationReport {
        let started = Instant::now();
        let report = {
            let mut store = self.patterns.write();
            self.consolidator.consolidate(&mut store)
        };
        metrics::histogram!("cortex_consolidation_seconds").record(started.elapsed().as_secs_f64());
        self.created_since_consolidation.store(0, Ordering::SeqCst);
        self.consolidations.fetch_add(1, Ordering::SeqCst);

        self.event_bus.emit(CortexEvent::MemoryConsolidated {
            removed_duplicates: report.removed_duplicates,
            contradictions_detected: report.contradictions_detected,
            pruned_patterns: report.pruned_patterns,
            merged_patterns: report.merged_patterns,
            duration_ms: report.duration_ms,
            timestamp: Utc::now(),
        });
        report
    }

    /// Switch mode. Trajectory capacity and the cluster target follow the new preset.
    pub fn set_mode(&self, mode: LearningMode) {
        let (previous, mode_config) = {
            let mut config = self.config.write();
            let previous = config.mode;
            if previous == mode && config.mode_override.is_none() {
                return;
            }
            config.mode = mode;
            config.mode_override = None;
            (previous, config.mode_config())
        };

        self.trajectories.write().set_capacity(mode_config.trajectory_capacity);
        self.patterns.write().apply_mode(&mode_config);
        info!(previous = %previous, current = %mode, "Learning mode changed");

        self.event_bus.emit(CortexEvent::ModeChanged {
            previous,
            current: mode,
            timestamp: Utc::now(),
        });
    }

    pub fn stats(&self) -> CortexStats {
        let mode = self.mode();
        let (trajectories_active, trajectories_completed) = {
            let store = self.trajectories.read();
            (store.active_count(), store.completed_count())
        };
        let (patterns, clusters, avg_success_rate) = {
            let store = self.patterns.read();
            (store.len(), store.cluster_index().len(), store.average_success_rate())
        };

        CortexStats {
            mode,
            trajectories_active,
            trajectories_completed,
            patterns,
            clusters,
            learning_triggers: self.learning_triggers.load(Ordering::SeqCst),
            consolidations: self.consolidations.load(Ordering::SeqCst),
            avg_success_rate,
        }
    }

    fn run_learning(&self, batch: LearningBatch) {
        self.learning_triggers.fetch_add(1, Ordering::SeqCst);
        metrics::counter!("cortex_learning_triggers_total").increment(1);
        info!(
            completed = batch.completed_trajectories,
            batch_size = batch.trajectories.len(),
            evicted = batch.evicted,
            "Learning triggered"
        );

        self.event_bus.emit(CortexEvent::LearningTriggered {
            completed_trajectories: batch.completed_trajectories,
            batch_size: batch.trajectories.len(),
            timestamp: Utc::now(),
        });

        let mut reports: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for backend in self.backends.lock().iter_mut() {
            let reported = backend.update(&batch.trajectories);
            debug!(backend = backend.name(), metrics = ?reported.values, "Policy backend updated");
            reports.insert(backend.name().to_string(), reported.values);
        }

        self.event_bus.emit(CortexEvent::LearningCompleted {
            batch_size: batch.trajectories.len(),
            evicted_trajectories: batch.evicted,
            metrics: reports,
            timestamp: Utc::now(),
        });
    }

    fn after_extraction(&self, extracted: &[Extraction]) {
        let created = extracted.iter().filter(|e| e.created).count();
        if created == 0 {
            return;
        }
        metrics::counter!("cortex_patterns_created_total").increment(created as u64);

        let config = self.config.read();
        let trigger = config.consolidation.volume_trigger;
        let enabled = config.consolidation.enabled;
        drop(config);

        let pending = self.created_since_consolidation.fetch_add(created, Ordering::SeqCst) + created;
        if enabled && trigger > 0 && pending >= trigger {
            info!(pending, trigger, "Pattern volume reached, consolidating");
            self.consolidate();
        }
    }

    fn emit_evolution(&self, id: PatternId, evolution: &PatternEvolution) {
        if evolution.evolution_type == EvolutionType::Prune {
            debug!(pattern_id = %id, "Pattern flagged for pruning");
        }
        self.event_bus.emit(CortexEvent::PatternEvolved {
            pattern_id: id,
            evolution_type: evolution.evolution_type,
            previous_quality: evolution.previous_quality,
            new_quality: evolution.new_quality,
            timestamp: evolution.timestamp,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PolicyMetrics;

    const DIM: usize = 4;

    fn service() -> CortexService {
        let mut config = CortexConfig::default().with_embedding_dim(DIM);
        config.pattern.seed = Some(5);
        CortexService::new(config).unwrap()
    }

    fn run(service: &CortexService, embedding: [f32; DIM], reward: f64, steps: usize) -> TrajectoryId {
        let id = service.begin_trajectory("task", "test").unwrap();
        for i in 0..steps {
            service.record_step(id, &format!("step-{i}"), reward, embedding.to_vec());
        }
        id
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = CortexConfig::default();
        config.retrieval.lambda = 2.0;
        assert!(matches!(
            CortexService::new(config),
            Err(CortexError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_learn_from_trajectory_creates_pattern() {
        let service = service();
        let id = run(&service, [1.0, 0.0, 0.0, 0.0], 0.9, 3);

        let pattern = service.learn_from_trajectory(id, Some(0.85)).unwrap().unwrap();
        assert_eq!(pattern.success_rate, 0.85);
        assert!(pattern.source_memory.is_some());

        let stored = service.get_trajectory(&id).unwrap();
        assert!(stored.verdict.is_some());
        let memory = stored.distilled_memory.unwrap();
        assert_eq!(memory.usage_count, 1);
        assert!(memory.last_used.is_some());
        assert_eq!(service.stats().patterns, 1);
    }

    #[test]
    fn test_judge_unknown_and_incomplete() {
        let service = service();
        let unknown = TrajectoryId::new();
        assert_eq!(
            service.judge_trajectory(unknown).unwrap_err(),
            CortexError::UnknownTrajectory(unknown)
        );

        let open = run(&service, [1.0, 0.0, 0.0, 0.0], 0.5, 1);
        assert_eq!(
            service.judge_trajectory(open).unwrap_err(),
            CortexError::IncompleteTrajectory(open)
        );
    }

    #[test]
    fn test_set_mode_emits_once_and_updates_capacity() {
        let service = service();
        let mut receiver = service.event_bus().subscribe_channel();

        service.set_mode(LearningMode::Edge);
        service.set_mode(LearningMode::Edge);

        assert_eq!(service.mode(), LearningMode::Edge);
        assert_eq!(service.trajectories.read().capacity(), 200);
        assert!(matches!(
            receiver.try_recv(),
            Ok(CortexEvent::ModeChanged { current: LearningMode::Edge, .. })
        ));
        assert!(receiver.try_recv().is_err());
    }

    struct CountingBackend {
        seen: usize,
    }

    impl PolicyBackend for CountingBackend {
        fn name(&self) -> &str {
            "counting"
        }

        fn update(&mut self, trajectories: &[Trajectory]) -> PolicyMetrics {
            self.seen += trajectories.len();
            PolicyMetrics::new().with("seen", self.seen as f64)
        }

        fn get_action(&self, _state: &[f32]) -> Option<String> {
            Some("retry".to_string())
        }
    }

    #[test]
    fn test_backends_receive_learning_batches() {
        let mut config = CortexConfig::default()
            .with_embedding_dim(DIM)
            .with_mode_override(crate::domain::ModeConfig {
                trajectory_capacity: 5,
                pattern_clusters: 4,
                quality_threshold: 0.5,
                max_latency_ms: 10.0,
                memory_budget_mb: 1,
            });
        config.pattern.seed = Some(5);
        let service = CortexService::new(config).unwrap();
        service.register_backend(Box::new(CountingBackend { seen: 0 }));
        let mut receiver = service.event_bus().subscribe_channel();

        for i in 0..4 {
            let id = run(&service, [1.0, 0.0, 0.0, 0.0], 0.9, 1);
            service.complete_trajectory(id, Some(if i == 0 { 0.2 } else { 0.9 }));
        }

        let mut completed = None;
        while let Ok(event) = receiver.try_recv() {
            if let CortexEvent::LearningCompleted { batch_size, metrics, .. } = event {
                completed = Some((batch_size, metrics));
            }
        }
        let (batch_size, metrics) = completed.unwrap();
        assert_eq!(batch_size, 3);
        assert_eq!(metrics["counting"]["seen"], 3.0);
        assert_eq!(service.stats().learning_triggers, 1);
        assert_eq!(service.suggest_action(&[0.0; DIM]), Some("retry".to_string()));
    }

    #[test]
    fn test_volume_trigger_runs_consolidation() {
        let mut config = CortexConfig::default().with_embedding_dim(DIM);
        config.consolidation.volume_trigger = 2;
        config.pattern.seed = Some(5);
        let service = CortexService::new(config).unwrap();

        for axis in 0..2 {
            let mut e = [0.0; DIM];
            e[axis] = 1.0;
            let id = run(&service, e, 0.9, 2);
            service.learn_from_trajectory(id, Some(0.9)).unwrap();
        }

        assert_eq!(service.stats().consolidations, 1);
    }
}
