//! Configuration for the ERNE engine.
//!
//! Maps directly to `erne.toml`. Every field has a serde default, so a
//! partial file (or an empty one) yields the documented defaults.

use serde::{Deserialize, Serialize};

use crate::error::{ErneError, Result};

/// Top-level engine configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Experience store capacity and immediate-pattern detection.
    #[serde(default)]
    pub store: StoreConfig,
    /// Strength decay.
    #[serde(default)]
    pub decay: DecayConfig,
    /// Periodic consolidation into semantic memories.
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    /// Recall ranking.
    #[serde(default)]
    pub recall: RecallConfig,
    /// Novelty tracking.
    #[serde(default)]
    pub novelty: NoveltyConfig,
    /// Attention selection.
    #[serde(default)]
    pub attention: AttentionConfig,
    /// Exploration target tracking.
    #[serde(default)]
    pub exploration: ExplorationConfig,
    /// Curiosity estimation.
    #[serde(default)]
    pub curiosity: CuriosityConfig,
    /// Reconstructive recall noise.
    #[serde(default)]
    pub reconstruction: ReconstructionConfig,
    /// Persistence / save settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ErneError::Config` if the TOML is invalid or fails validation.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ErneError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    /// Returns `ErneError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.general.log_level.to_ascii_lowercase().as_str()) {
            return Err(ErneError::Config(format!(
                "general.log_level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }
        if self.store.max_experiences == 0 {
            return Err(ErneError::Config("store.max_experiences must be > 0".into()));
        }
        if self.consolidation.min_cluster_size < 2 {
            return Err(ErneError::Config(
                "consolidation.min_cluster_size must be >= 2".into(),
            ));
        }
        if self.exploration.retain_on_overflow > self.exploration.max_targets {
            return Err(ErneError::Config(
                "exploration.retain_on_overflow must not exceed exploration.max_targets".into(),
            ));
        }
        if self.attention.histogram_bins == 0 {
            return Err(ErneError::Config("attention.histogram_bins must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.exploration.exploration_bias) {
            return Err(ErneError::Config(
                "exploration.exploration_bias must be within [0, 1]".into(),
            ));
        }
        if self.decay.min_strength <= 0.0 || self.decay.min_strength > 1.0 {
            return Err(ErneError::Config("decay.min_strength must be within (0, 1]".into()));
        }
        if self.novelty.quantization_scale <= 0.0 {
            return Err(ErneError::Config("novelty.quantization_scale must be > 0".into()));
        }
        for (name, secs) in [
            ("decay.interval_secs", self.decay.interval_secs),
            ("consolidation.interval_secs", self.consolidation.interval_secs),
            ("persistence.flush_interval_secs", self.persistence.flush_interval_secs),
        ] {
            if secs == 0 {
                return Err(ErneError::Config(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Accepted values for [`GeneralConfig::log_level`].
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default log filter the host should install: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Experience store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Hard cap on stored experiences; the weakest are pruned beyond it.
    #[serde(default = "default_10000")]
    pub max_experiences: usize,
    /// Run the immediate-pattern check on every store.
    #[serde(default = "default_true")]
    pub immediate_consolidation: bool,
    /// Sensory similarity above which an existing experience counts as a match.
    #[serde(default = "default_0_8")]
    pub immediate_similarity: f32,
    /// Number of matching existing experiences needed to consolidate.
    #[serde(default = "default_2_usize")]
    pub immediate_min_matches: usize,
    /// How many of the most recent experiences the immediate check scans.
    #[serde(default = "default_512")]
    pub immediate_scan_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_experiences: 10_000,
            immediate_consolidation: true,
            immediate_similarity: 0.8,
            immediate_min_matches: 2,
            immediate_scan_limit: 512,
        }
    }
}

/// Strength decay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    /// Seconds between decay passes.
    #[serde(default = "default_60")]
    pub interval_secs: u64,
    /// Exponential decay constant per hour of age.
    #[serde(default = "default_decay_rate")]
    pub rate_per_hour: f64,
    /// Residual strength decay never goes below.
    #[serde(default = "default_0_01")]
    pub min_strength: f32,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            rate_per_hour: 0.001,
            min_strength: 0.01,
        }
    }
}

/// Periodic consolidation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Seconds between consolidation passes.
    #[serde(default = "default_300")]
    pub interval_secs: u64,
    /// Pairwise sensory similarity needed to join a cluster.
    #[serde(default = "default_0_7")]
    pub similarity_threshold: f32,
    /// Minimum cluster size that produces a semantic memory.
    #[serde(default = "default_3_usize")]
    pub min_cluster_size: usize,
    /// Cap on semantic memories; the weakest are evicted beyond it.
    #[serde(default = "default_1000")]
    pub max_semantic: usize,
    /// Similarity above which a new pattern reinforces an existing semantic
    /// memory instead of creating another.
    #[serde(default = "default_0_8")]
    pub reinforce_similarity: f32,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            similarity_threshold: 0.7,
            min_cluster_size: 3,
            max_semantic: 1000,
            reinforce_similarity: 0.8,
        }
    }
}

/// Recall ranking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallConfig {
    /// Results returned when the caller does not give a limit.
    #[serde(default = "default_10_usize")]
    pub default_limit: usize,
    /// Multiplicative strength boost applied to every recalled experience.
    #[serde(default = "default_recall_boost")]
    pub recall_boost: f32,
    /// Recency time constant in days.
    #[serde(default = "default_7_0")]
    pub recency_days: f64,
    /// Recall count at which the frequency factor saturates.
    #[serde(default = "default_10_u32")]
    pub frequency_saturation: u32,
    /// Per-factor weights.
    #[serde(default)]
    pub weights: RecallWeights,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            recall_boost: 1.05,
            recency_days: 7.0,
            frequency_saturation: 10,
            weights: RecallWeights::default(),
        }
    }
}

/// Recall scoring weights. Absent query fields drop their factor entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallWeights {
    /// Weight for current strength.
    #[serde(default = "default_0_3")]
    pub strength: f32,
    /// Weight for recency.
    #[serde(default = "default_0_2")]
    pub recency: f32,
    /// Weight for recall frequency.
    #[serde(default = "default_0_1")]
    pub frequency: f32,
    /// Weight for sensory similarity (query carries a sensory probe).
    #[serde(default = "default_0_2")]
    pub similarity: f32,
    /// Weight for emotional similarity (query carries an emotion).
    #[serde(default = "default_0_15")]
    pub emotional: f32,
    /// Weight for attention-target match.
    #[serde(default = "default_0_05")]
    pub attention: f32,
}

impl Default for RecallWeights {
    fn default() -> Self {
        Self {
            strength: 0.30,
            recency: 0.20,
            frequency: 0.10,
            similarity: 0.20,
            emotional: 0.15,
            attention: 0.05,
        }
    }
}

/// Novelty tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoveltyConfig {
    /// Leading dimensions that participate in the bucket hash.
    #[serde(default = "default_10_usize")]
    pub hash_dimensions: usize,
    /// Components are multiplied by this before rounding to an integer.
    #[serde(default = "default_10_0_f32")]
    pub quantization_scale: f32,
    /// Fraction of remaining unfamiliarity removed per encounter.
    #[serde(default = "default_0_1")]
    pub familiarity_gain: f32,
    /// Time constant (seconds) of the staleness boost.
    #[serde(default = "default_300_f64")]
    pub time_constant_secs: f64,
    /// Maximum tracked buckets; least recently encountered are dropped.
    #[serde(default = "default_10000")]
    pub max_buckets: usize,
}

impl Default for NoveltyConfig {
    fn default() -> Self {
        Self {
            hash_dimensions: 10,
            quantization_scale: 10.0,
            familiarity_gain: 0.1,
            time_constant_secs: 300.0,
            max_buckets: 10_000,
        }
    }
}

/// Widths of each modality slice inside a combined sensory vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModalityLayout {
    /// Visual slice width.
    #[serde(default = "default_32")]
    pub visual: usize,
    /// Tactile slice width.
    #[serde(default = "default_16")]
    pub tactile: usize,
    /// Auditory slice width.
    #[serde(default = "default_16")]
    pub auditory: usize,
    /// Proprioceptive slice width.
    #[serde(default = "default_16")]
    pub proprioceptive: usize,
}

impl Default for ModalityLayout {
    fn default() -> Self {
        Self {
            visual: 32,
            tactile: 16,
            auditory: 16,
            proprioceptive: 16,
        }
    }
}

/// Attention selection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionConfig {
    /// Minimum winning-modality novelty for an attention event.
    #[serde(default = "default_0_3")]
    pub novelty_threshold: f32,
    /// Histogram bins for the entropy part of feature complexity.
    #[serde(default = "default_10_usize")]
    pub histogram_bins: usize,
    /// Length of the rolling attention history.
    #[serde(default = "default_100")]
    pub history_size: usize,
    /// Modality slice widths.
    #[serde(default)]
    pub layout: ModalityLayout,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            novelty_threshold: 0.3,
            histogram_bins: 10,
            history_size: 100,
            layout: ModalityLayout::default(),
        }
    }
}

/// Exploration target tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationConfig {
    /// Capacity before an overflow trim.
    #[serde(default = "default_100")]
    pub max_targets: usize,
    /// Targets kept (highest information gain) after an overflow trim.
    #[serde(default = "default_50")]
    pub retain_on_overflow: usize,
    /// Similarity above which targets are merged.
    #[serde(default = "default_0_8")]
    pub merge_similarity: f32,
    /// Blend toward the time-since-visit bonus when choosing a goal.
    #[serde(default = "default_0_3")]
    pub exploration_bias: f32,
    /// Seconds after which the revisit bonus saturates.
    #[serde(default = "default_300_f64")]
    pub revisit_horizon_secs: f64,
    /// Accessibility assigned to newly discovered targets.
    #[serde(default = "default_1_0")]
    pub default_accessibility: f32,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            max_targets: 100,
            retain_on_overflow: 50,
            merge_similarity: 0.8,
            exploration_bias: 0.3,
            revisit_horizon_secs: 300.0,
            default_accessibility: 1.0,
        }
    }
}

/// Curiosity estimation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuriosityConfig {
    /// Multiplier on the raw prediction error.
    #[serde(default = "default_2_0")]
    pub error_gain: f32,
    /// Multiplier on error above the recent average.
    #[serde(default = "default_3_0")]
    pub surprise_gain: f32,
    /// Recorded errors needed before surprise is considered.
    #[serde(default = "default_10_usize")]
    pub min_history: usize,
    /// Length of the prediction-error history.
    #[serde(default = "default_100")]
    pub history_size: usize,
    /// Weight of exploration-target diversity.
    #[serde(default = "default_0_2")]
    pub diversity_weight: f32,
    /// Weight of the unvisited-target fraction.
    #[serde(default = "default_0_2")]
    pub unvisited_weight: f32,
    /// Seconds after which a target counts as unvisited.
    #[serde(default = "default_60_f64")]
    pub unvisited_after_secs: f64,
    /// Multiplicative decay applied on every update.
    #[serde(default = "default_curiosity_decay")]
    pub decay_per_tick: f32,
    /// Lower bound of the curiosity level.
    #[serde(default = "default_0_1")]
    pub floor: f32,
}

impl Default for CuriosityConfig {
    fn default() -> Self {
        Self {
            error_gain: 2.0,
            surprise_gain: 3.0,
            min_history: 10,
            history_size: 100,
            diversity_weight: 0.2,
            unvisited_weight: 0.2,
            unvisited_after_secs: 60.0,
            decay_per_tick: 0.0001,
            floor: 0.1,
        }
    }
}

/// Reconstructive recall configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionConfig {
    /// Age (days) at which the age factor saturates.
    #[serde(default = "default_30_0")]
    pub age_horizon_days: f64,
    /// Noise contributed by a fully aged memory.
    #[serde(default = "default_0_3")]
    pub age_noise: f32,
    /// Noise contributed by a zero-strength memory.
    #[serde(default = "default_0_2")]
    pub weakness_noise: f32,
    /// Fixed RNG seed for reproducible reconstructions.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            age_horizon_days: 30.0,
            age_noise: 0.3,
            weakness_noise: 0.2,
            seed: None,
        }
    }
}

/// Encoding used for save-slot blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotFormat {
    /// Human-readable JSON.
    #[default]
    Json,
    /// Compact bincode.
    Bincode,
    /// MessagePack with named fields.
    Msgpack,
}

/// Persistence / save configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Seconds between background flushes of dirty state.
    #[serde(default = "default_300")]
    pub flush_interval_secs: u64,
    /// Slot the background flush writes to.
    #[serde(default = "default_autosave_slot")]
    pub autosave_slot: String,
    /// Blob encoding.
    #[serde(default)]
    pub format: SnapshotFormat,
    /// Include full experience / semantic / tracker state, not only statistics.
    #[serde(default = "default_true")]
    pub full_snapshot: bool,
    /// Append every stored experience to the persistence log.
    #[serde(default = "default_true")]
    pub write_through: bool,
    /// Use WAL mode for the SQLite backend.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// Detect save corruption via checksums.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 300,
            autosave_slot: "autosave".to_string(),
            format: SnapshotFormat::Json,
            full_snapshot: true,
            write_through: true,
            wal_mode: true,
            checksum_enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_autosave_slot() -> String { "autosave".to_string() }
fn default_0_01() -> f32 { 0.01 }
fn default_0_05() -> f32 { 0.05 }
fn default_0_1() -> f32 { 0.1 }
fn default_0_15() -> f32 { 0.15 }
fn default_0_2() -> f32 { 0.2 }
fn default_0_3() -> f32 { 0.3 }
fn default_0_7() -> f32 { 0.7 }
fn default_0_8() -> f32 { 0.8 }
fn default_1_0() -> f32 { 1.0 }
fn default_2_0() -> f32 { 2.0 }
fn default_3_0() -> f32 { 3.0 }
fn default_10_0_f32() -> f32 { 10.0 }
fn default_recall_boost() -> f32 { 1.05 }
fn default_curiosity_decay() -> f32 { 0.0001 }
fn default_decay_rate() -> f64 { 0.001 }
fn default_7_0() -> f64 { 7.0 }
fn default_30_0() -> f64 { 30.0 }
fn default_60_f64() -> f64 { 60.0 }
fn default_300_f64() -> f64 { 300.0 }
fn default_10_u32() -> u32 { 10 }
fn default_60() -> u64 { 60 }
fn default_300() -> u64 { 300 }
fn default_2_usize() -> usize { 2 }
fn default_3_usize() -> usize { 3 }
fn default_10_usize() -> usize { 10 }
fn default_16() -> usize { 16 }
fn default_32() -> usize { 32 }
fn default_50() -> usize { 50 }
fn default_100() -> usize { 100 }
fn default_512() -> usize { 512 }
fn default_1000() -> usize { 1000 }
fn default_10000() -> usize { 10_000 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = EngineConfig::from_toml("").expect("parse");
        assert_eq!(config.store.max_experiences, 10_000);
        assert_eq!(config.decay.interval_secs, 60);
        assert_eq!(config.consolidation.interval_secs, 300);
        assert!((config.recall.weights.strength - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.persistence.format, SnapshotFormat::Json);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config = EngineConfig::from_toml(
            r#"
            [store]
            max_experiences = 500

            [persistence]
            format = "bincode"
            autosave_slot = "slot-a"

            [attention.layout]
            visual = 8
            "#,
        )
        .expect("parse");
        assert_eq!(config.store.max_experiences, 500);
        assert!(config.store.immediate_consolidation);
        assert_eq!(config.persistence.format, SnapshotFormat::Bincode);
        assert_eq!(config.persistence.autosave_slot, "slot-a");
        assert_eq!(config.attention.layout.visual, 8);
        assert_eq!(config.attention.layout.tactile, 16);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            EngineConfig::from_toml("[store]\nmax_experiences = 0"),
            Err(ErneError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml("[exploration]\nmax_targets = 10\nretain_on_overflow = 20"),
            Err(ErneError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml("[decay]\ninterval_secs = 0"),
            Err(ErneError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml("[general]\nlog_level = \"loud\""),
            Err(ErneError::Config(_))
        ));
        assert!(EngineConfig::from_toml("[general]\nlog_level = \"DEBUG\"").is_ok());
        assert!(EngineConfig::from_toml("not = [valid").is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("erne.toml");
        std::fs::write(&path, "[decay]\nrate_per_hour = 0.01\n").expect("write");
        let config = EngineConfig::from_file(&path).expect("load");
        assert!((config.decay.rate_per_hour - 0.01).abs() < f64::EPSILON);
    }
}
