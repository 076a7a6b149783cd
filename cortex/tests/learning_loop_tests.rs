// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use reasoning_cortex::application::consolidation_scheduler::ConsolidationScheduler;
use reasoning_cortex::application::cortex_service::CortexService;
use reasoning_cortex::domain::{
    ConsolidationConfig, CortexConfig, CortexError, CortexEvent, EvolutionType, LearningMode,
    ModeConfig, Pattern,
};
use reasoning_cortex::infrastructure::{InMemoryVectorIndex, VectorIndex};
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;

const DIM: usize = 768;

fn axis(i: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[i % DIM] = 1.0;
    v
}

fn service_with(config: CortexConfig) -> CortexService {
    let mut config = config.with_embedding_dim(DIM);
    config.pattern.seed = Some(7);
    CortexService::new(config).unwrap()
}

#[test]
fn test_five_step_trajectory_becomes_pattern_and_evolves() {
    let service = service_with(CortexConfig::default());

    let id = service.begin_trajectory("refactor module", "code.rust").unwrap();
    for step in 0..5 {
        assert!(service.record_step(id, &format!("edit-{step}"), 0.8, axis(3)));
    }

    let pattern = service.learn_from_trajectory(id, Some(0.8)).unwrap().unwrap();
    let memory = service.get_trajectory(&id).unwrap().distilled_memory.unwrap();
    assert_eq!(memory.embedding.len(), DIM);
    assert!((memory.quality - 0.8).abs() < 1e-9);
    assert_eq!(pattern.source_memory, Some(memory.id));
    assert_eq!(pattern.success_rate, 0.8);
    assert_eq!(pattern.usage_count, 1);
    assert_eq!(pattern.domain, "code.rust");

    let evolution = service.evolve_pattern(pattern.id, 0.6, Some("regression")).unwrap();
    let evolved = service.get_pattern(&pattern.id).unwrap();
    assert!((evolved.success_rate - 0.78).abs() < 1e-9);
    assert_eq!(evolution.previous_quality, 0.8);
    // 0.6 - 0.8 is below the prune delta
    assert_eq!(evolution.evolution_type, EvolutionType::Prune);
}

#[test]
fn test_learning_trigger_fires_once_at_eighty_percent() {
    let service = service_with(CortexConfig::default().with_mode_override(ModeConfig {
        trajectory_capacity: 10,
        pattern_clusters: 4,
        quality_threshold: 0.5,
        max_latency_ms: 10.0,
        memory_budget_mb: 1,
    }));
    let triggered = Arc::new(Mutex::new(Vec::new()));
    let sink = triggered.clone();
    service.event_bus().subscribe(move |event| {
        if let CortexEvent::LearningTriggered { completed_trajectories, .. } = event {
            sink.lock().push(*completed_trajectories);
        }
        Ok(())
    });

    for i in 0..8 {
        let id = service.begin_trajectory("task", "batch").unwrap();
        service.record_step(id, "act", 0.9, axis(i));
        service.complete_trajectory(id, Some(0.9));

        let stats = service.stats();
        if i < 7 {
            assert_eq!(stats.learning_triggers, 0);
        }
    }

    let stats = service.stats();
    assert_eq!(stats.learning_triggers, 1);
    assert_eq!(*triggered.lock(), vec![8]);
    assert!(stats.trajectories_completed <= 5);
}

#[test]
fn test_end_to_end_retrieval_after_learning() {
    let service = service_with(CortexConfig::default());

    for (i, quality) in [0.9, 0.85, 0.7].into_iter().enumerate() {
        let id = service.begin_trajectory("deploy service", "ops").unwrap();
        service.record_step(id, "plan", quality, axis(i));
        service.record_step(id, "apply", quality, axis(i));
        service.learn_from_trajectory(id, Some(quality)).unwrap();
    }
    assert_eq!(service.stats().patterns, 3);

    let matches = service.find_patterns(&axis(0), 2);
    assert!(!matches.is_empty());
    assert!(matches[0].similarity > 0.99);
    assert_eq!(matches[0].pattern.success_rate, 0.9);

    let best = service.best_pattern("ops").unwrap();
    assert_eq!(best.success_rate, 0.9);
    assert_eq!(service.find_by_domain("ops").len(), 3);
}

#[test]
fn test_listeners_observe_lifecycle_in_order() {
    let service = service_with(CortexConfig::default());
    let seen: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let subscription = service.event_bus().subscribe(move |event| {
        sink.lock().push(event.event_type());
        Ok(())
    });
    // a failing listener must not block the one above
    service
        .event_bus()
        .subscribe(|_| Err(anyhow::anyhow!("listener offline")));

    let id = service.begin_trajectory("answer question", "qa").unwrap();
    service.record_step(id, "search", 0.9, axis(1));
    let pattern = service.learn_from_trajectory(id, Some(0.9)).unwrap().unwrap();
    service.find_patterns(&axis(1), 1);
    service.evolve_pattern(pattern.id, 0.95, None).unwrap();
    service.set_mode(LearningMode::Research);
    service.consolidate();

    assert_eq!(
        *seen.lock(),
        vec![
            "trajectory_started",
            "trajectory_completed",
            "pattern_matched",
            "pattern_evolved",
            "mode_changed",
            "memory_consolidated",
        ]
    );

    assert!(service.event_bus().unsubscribe(subscription));
    service.consolidate();
    assert_eq!(seen.lock().len(), 6);
}

#[tokio::test]
async fn test_channel_subscribers_receive_events() {
    let service = service_with(CortexConfig::default());
    let mut receiver = service.event_bus().subscribe_channel();

    let id = service.begin_trajectory("stream", "events").unwrap();
    match receiver.recv().await.unwrap() {
        CortexEvent::TrajectoryStarted { trajectory_id, domain, .. } => {
            assert_eq!(trajectory_id, id);
            assert_eq!(domain, "events");
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_search_index_with_and_without_external_index() {
    let plain = service_with(CortexConfig::default());
    let id = plain.begin_trajectory("index", "search").unwrap();
    plain.record_step(id, "lookup", 0.9, axis(5));
    let pattern = plain.learn_from_trajectory(id, Some(0.9)).unwrap().unwrap();
    assert_eq!(plain.search_index(&axis(5), 3).await.unwrap(), vec![pattern.id]);

    let index = Arc::new(InMemoryVectorIndex::new());
    let indexed = service_with(CortexConfig::default()).with_vector_index(index.clone());
    let id = indexed.begin_trajectory("index", "search").unwrap();
    indexed.record_step(id, "lookup", 0.9, axis(9));
    let pattern = indexed.learn_from_trajectory(id, Some(0.9)).unwrap().unwrap();

    // the index is fed asynchronously
    let mut found = Vec::new();
    for _ in 0..50 {
        found = index.search(&axis(9), 3).await.unwrap();
        if !found.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(found, vec![pattern.id]);
    assert_eq!(indexed.search_index(&axis(9), 3).await.unwrap(), vec![pattern.id]);
}

#[tokio::test]
async fn test_scheduler_consolidates_until_cancelled() {
    let service = Arc::new(service_with(CortexConfig::default()));
    let scheduler = Arc::new(ConsolidationScheduler::new(
        service.clone(),
        &ConsolidationConfig::default(),
    ));
    let token = scheduler.shutdown_token();
    let handle = scheduler.start();

    for _ in 0..100 {
        if service.stats().consolidations > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    token.cancel();
    handle.await.unwrap();

    assert_eq!(service.stats().consolidations, 1);
}

#[test]
fn test_snapshot_restores_into_fresh_service() {
    let source = service_with(CortexConfig::default());
    for i in 0..3 {
        let id = source.begin_trajectory("migrate", "db").unwrap();
        source.record_step(id, "dump", 0.8, axis(20 + i));
        source.learn_from_trajectory(id, Some(0.8)).unwrap();
    }
    let snapshot = source.snapshot_patterns();
    let json = serde_json::to_string(&snapshot).unwrap();

    let target = service_with(CortexConfig::default());
    let restored = target.restore_patterns(serde_json::from_str(&json).unwrap());
    assert_eq!(restored, 3);
    assert_eq!(target.stats().patterns, 3);
    assert_eq!(target.find_patterns(&axis(21), 1).len(), 1);
}

#[test]
fn test_add_pattern_rejects_wrong_dimension() {
    let service = service_with(CortexConfig::default());
    let limits = service.config().pattern.history_limits();

    let wrong = Pattern::new("manual", "ops", vec![1.0; 4], "check", 0.7, limits);
    assert_eq!(
        service.add_pattern(wrong).unwrap_err(),
        CortexError::EmbeddingDimensionMismatch { expected: DIM, actual: 4 }
    );

    let id = service
        .add_pattern(Pattern::new("manual", "ops", axis(2), "check", 0.7, limits))
        .unwrap();
    assert_eq!(service.get_pattern(&id).unwrap().name, "manual");
}
