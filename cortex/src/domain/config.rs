// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Cortex Configuration Types
//
// Defines the configuration schema for the learning cortex:
// - Learning modes and their static resource presets
// - Pattern store, retrieval and consolidation tuning
// - YAML loading and validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use super::pattern::HistoryLimits;

/// Operating mode. Each mode carries a static [`ModeConfig`] preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LearningMode {
    RealTime,
    #[default]
    Balanced,
    Research,
    Edge,
    Batch,
}

impl LearningMode {
    pub fn config(&self) -> ModeConfig {
        match self {
            LearningMode::RealTime => ModeConfig {
                trajectory_capacity: 1000,
                pattern_clusters: 25,
                quality_threshold: 0.7,
                max_latency_ms: 0.5,
                memory_budget_mb: 25,
            },
            LearningMode::Balanced => ModeConfig {
                trajectory_capacity: 3000,
                pattern_clusters: 50,
                quality_threshold: 0.5,
                max_latency_ms: 18.0,
                memory_budget_mb: 50,
            },
            LearningMode::Research => ModeConfig {
                trajectory_capacity: 10000,
                pattern_clusters: 100,
                quality_threshold: 0.2,
                max_latency_ms: 100.0,
                memory_budget_mb: 100,
            },
            LearningMode::Edge => ModeConfig {
                trajectory_capacity: 200,
                pattern_clusters: 15,
                quality_threshold: 0.8,
                max_latency_ms: 1.0,
                memory_budget_mb: 5,
            },
            LearningMode::Batch => ModeConfig {
                trajectory_capacity: 5000,
                pattern_clusters: 75,
                quality_threshold: 0.4,
                max_latency_ms: 50.0,
                memory_budget_mb: 75,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LearningMode::RealTime => "real-time",
            LearningMode::Balanced => "balanced",
            LearningMode::Research => "research",
            LearningMode::Edge => "edge",
            LearningMode::Batch => "batch",
        }
    }
}

impl fmt::Display for LearningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static per-mode resource settings. Read, never cross-validated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeConfig {
    pub trajectory_capacity: usize,
    /// Target cluster count of the pattern index
    pub pattern_clusters: usize,
    /// Minimum trajectory quality for pattern extraction and learning batches
    pub quality_threshold: f64,
    pub max_latency_ms: f64,
    pub memory_budget_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    #[serde(default = "default_max_patterns")]
    pub max_patterns: usize,

    /// EMA learning rate used by evolve and in-place extraction updates
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Extraction updates an existing pattern instead of creating one at or above this similarity
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f32,

    #[serde(default = "default_quality_history")]
    pub quality_history_capacity: usize,

    #[serde(default = "default_evolution_history")]
    pub evolution_history_capacity: usize,

    #[serde(default = "default_true")]
    pub clustering_enabled: bool,

    #[serde(default = "default_cluster_join_threshold")]
    pub cluster_join_threshold: f32,

    #[serde(default = "default_rebuild_iterations")]
    pub rebuild_iterations: usize,

    /// Batch extractions creating more than this many patterns rebuild the index
    #[serde(default = "default_batch_rebuild_threshold")]
    pub batch_rebuild_threshold: usize,

    #[serde(default = "default_split_perturbation")]
    pub split_perturbation: f32,

    /// Fixed RNG seed for reproducible clustering and splits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl PatternConfig {
    pub fn history_limits(&self) -> HistoryLimits {
        HistoryLimits {
            quality: self.quality_history_capacity,
            evolution: self.evolution_history_capacity,
        }
    }
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            max_patterns: default_max_patterns(),
            learning_rate: default_learning_rate(),
            duplicate_threshold: default_duplicate_threshold(),
            quality_history_capacity: default_quality_history(),
            evolution_history_capacity: default_evolution_history(),
            clustering_enabled: true,
            cluster_join_threshold: default_cluster_join_threshold(),
            rebuild_iterations: default_rebuild_iterations(),
            batch_rebuild_threshold: default_batch_rebuild_threshold(),
            split_perturbation: default_split_perturbation(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,

    /// MMR relevance/diversity balance: 1.0 is pure relevance
    #[serde(default = "default_lambda")]
    pub lambda: f32,

    /// Use MMR ranking; plain similarity top-k otherwise
    #[serde(default = "default_true")]
    pub diversity: bool,

    #[serde(default = "default_candidate_clusters")]
    pub candidate_clusters: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            match_threshold: default_match_threshold(),
            lambda: default_lambda(),
            diversity: true,
            candidate_clusters: default_candidate_clusters(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,

    #[serde(default = "default_contradiction_threshold")]
    pub contradiction_threshold: f32,

    #[serde(default = "default_prune_age_days")]
    pub prune_age_days: i64,

    #[serde(default = "default_min_confidence_keep")]
    pub min_confidence_keep: f64,

    #[serde(default = "default_min_usage_keep")]
    pub min_usage_keep: u64,

    /// New patterns since the last pass that trigger an automatic consolidation
    #[serde(default = "default_volume_trigger")]
    pub volume_trigger: usize,

    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: default_dedup_threshold(),
            contradiction_threshold: default_contradiction_threshold(),
            prune_age_days: default_prune_age_days(),
            min_confidence_keep: default_min_confidence_keep(),
            min_usage_keep: default_min_usage_keep(),
            volume_trigger: default_volume_trigger(),
            interval_seconds: default_interval_seconds(),
            enabled: true,
            max_duration_ms: default_max_duration_ms(),
        }
    }
}

/// Top-level cortex configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CortexConfig {
    #[serde(default)]
    pub mode: LearningMode,

    /// Replaces the preset of `mode` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_override: Option<ModeConfig>,

    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    #[serde(default = "default_distillation_threshold")]
    pub distillation_threshold: f64,

    #[serde(default)]
    pub pattern: PatternConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub consolidation: ConsolidationConfig,
}

impl Default for CortexConfig {
    fn default() -> Self {
        Self {
            mode: LearningMode::default(),
            mode_override: None,
            embedding_dim: default_embedding_dim(),
            distillation_threshold: default_distillation_threshold(),
            pattern: PatternConfig::default(),
            retrieval: RetrievalConfig::default(),
            consolidation: ConsolidationConfig::default(),
        }
    }
}

impl CortexConfig {
    /// Effective mode settings: the override if present, else the mode preset
    pub fn mode_config(&self) -> ModeConfig {
        self.mode_override.unwrap_or_else(|| self.mode.config())
    }

    pub fn with_mode(mut self, mode: LearningMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_mode_override(mut self, mode_config: ModeConfig) -> Self {
        self.mode_override = Some(mode_config);
        self
    }

    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.embedding_dim == 0 {
            anyhow::bail!("embedding_dim must be greater than zero");
        }

        let mode = self.mode_config();
        if mode.trajectory_capacity == 0 {
            anyhow::bail!("trajectory_capacity must be greater than zero");
        }
        if mode.pattern_clusters == 0 {
            anyhow::bail!("pattern_clusters must be greater than zero");
        }
        check_unit("quality_threshold", mode.quality_threshold)?;
        check_unit("distillation_threshold", self.distillation_threshold)?;

        if self.pattern.max_patterns == 0 {
            anyhow::bail!("pattern.max_patterns must be greater than zero");
        }
        check_unit("pattern.learning_rate", self.pattern.learning_rate)?;
        check_unit("pattern.duplicate_threshold", self.pattern.duplicate_threshold as f64)?;
        check_unit("pattern.cluster_join_threshold", self.pattern.cluster_join_threshold as f64)?;

        check_unit("retrieval.match_threshold", self.retrieval.match_threshold as f64)?;
        check_unit("retrieval.lambda", self.retrieval.lambda as f64)?;
        if self.retrieval.candidate_clusters == 0 {
            anyhow::bail!("retrieval.candidate_clusters must be greater than zero");
        }

        check_unit("consolidation.dedup_threshold", self.consolidation.dedup_threshold as f64)?;
        check_unit(
            "consolidation.contradiction_threshold",
            self.consolidation.contradiction_threshold as f64,
        )?;
        check_unit("consolidation.min_confidence_keep", self.consolidation.min_confidence_keep)?;
        if self.consolidation.prune_age_days < 0 {
            anyhow::bail!("consolidation.prune_age_days cannot be negative");
        }

        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> anyhow::Result<()> {
    if !(0.0..=1.0).contains(&value) {
        anyhow::bail!("{} must be within [0, 1], got {}", name, value);
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

fn default_embedding_dim() -> usize {
    768
}

fn default_distillation_threshold() -> f64 {
    0.6
}

fn default_max_patterns() -> usize {
    5000
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_duplicate_threshold() -> f32 {
    0.95
}

fn default_quality_history() -> usize {
    100
}

fn default_evolution_history() -> usize {
    50
}

fn default_cluster_join_threshold() -> f32 {
    0.7
}

fn default_rebuild_iterations() -> usize {
    10
}

fn default_batch_rebuild_threshold() -> usize {
    10
}

fn default_split_perturbation() -> f32 {
    0.01
}

fn default_match_threshold() -> f32 {
    0.7
}

fn default_lambda() -> f32 {
    0.7
}

fn default_candidate_clusters() -> usize {
    3
}

fn default_dedup_threshold() -> f32 {
    0.95
}

fn default_contradiction_threshold() -> f32 {
    0.85
}

fn default_prune_age_days() -> i64 {
    30
}

fn default_min_confidence_keep() -> f64 {
    0.3
}

fn default_min_usage_keep() -> u64 {
    3
}

fn default_volume_trigger() -> usize {
    100
}

fn default_interval_seconds() -> u64 {
    3600
}

fn default_max_duration_ms() -> u64 {
    100
}
