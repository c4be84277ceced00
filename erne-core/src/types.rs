//! Core type definitions for the ERNE engine.
//!
//! All types are serializable so that snapshots can be handed to the
//! persistence boundary without a separate DTO layer.

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Unique identifier for a stored experience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExperienceId(pub Uuid);

impl ExperienceId {
    /// Create a new random experience ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExperienceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExperienceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a semantic (consolidated) memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SemanticId(pub Uuid);

impl SemanticId {
    /// Create a new random semantic memory ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SemanticId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SemanticId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Wall-clock instant used throughout the engine.
pub type Timestamp = DateTime<Utc>;

/// Seconds elapsed from `earlier` to `later`, saturating at zero.
#[must_use]
pub fn seconds_between(earlier: Timestamp, later: Timestamp) -> f64 {
    let millis = (later - earlier).num_milliseconds();
    if millis <= 0 {
        0.0
    } else {
        millis as f64 / 1000.0
    }
}

/// Hours elapsed from `earlier` to `later`, saturating at zero.
#[must_use]
pub fn hours_between(earlier: Timestamp, later: Timestamp) -> f64 {
    seconds_between(earlier, later) / 3600.0
}

/// Days elapsed from `earlier` to `later`, saturating at zero.
#[must_use]
pub fn days_between(earlier: Timestamp, later: Timestamp) -> f64 {
    seconds_between(earlier, later) / 86_400.0
}

// ---------------------------------------------------------------------------
// Emotion
// ---------------------------------------------------------------------------

/// Two-axis emotional state attached to every experience.
///
/// - **Valence**: unpleasant (-1) → pleasant (+1)
/// - **Arousal**: calm (0) → excited (1), negative values are tolerated
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Emotion {
    /// Unpleasant (-1.0) to pleasant (+1.0).
    pub valence: f32,
    /// Calm to excited.
    pub arousal: f32,
}

impl Emotion {
    /// Neutral emotional state.
    pub const NEUTRAL: Self = Self {
        valence: 0.0,
        arousal: 0.0,
    };

    /// Create a new emotion tuple.
    #[must_use]
    pub fn new(valence: f32, arousal: f32) -> Self {
        Self { valence, arousal }
    }

    /// Emotional intensity: magnitude of the (valence, arousal) vector.
    #[must_use]
    pub fn intensity(&self) -> f32 {
        (self.valence * self.valence + self.arousal * self.arousal).sqrt()
    }

    /// Similarity in [0, 1]: `1 - mean(|Δvalence|, |Δarousal|)`.
    #[must_use]
    pub fn similarity(&self, other: &Self) -> f32 {
        let dv = (self.valence - other.valence).abs();
        let da = (self.arousal - other.arousal).abs();
        (1.0 - (dv + da) / 2.0).clamp(0.0, 1.0)
    }

    /// Whether both components are finite numbers.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.valence.is_finite() && self.arousal.is_finite()
    }
}

impl Default for Emotion {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

// ---------------------------------------------------------------------------
// Feature vectors
// ---------------------------------------------------------------------------

/// A dense numeric feature vector (a sensory slice or a combined sensory
/// vector) as produced by the external encoder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub Vec<f32>);

impl FeatureVector {
    /// Cosine similarity between two vectors.
    /// Returns 0.0 if the lengths differ or either vector has zero magnitude.
    #[must_use]
    pub fn cosine_similarity(&self, other: &Self) -> f32 {
        cosine_similarity(&self.0, &other.0)
    }

    /// Dimensionality of the vector.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    /// Whether the vector has no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every component is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|x| x.is_finite())
    }

    /// Borrow the raw components.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Element-wise mean of a set of vectors.
    ///
    /// Vectors shorter than the longest one contribute only to the
    /// dimensions they have. Returns an empty vector for an empty input.
    #[must_use]
    pub fn mean<'a, I>(vectors: I) -> Self
    where
        I: IntoIterator<Item = &'a FeatureVector>,
    {
        let mut sums: Vec<f32> = Vec::new();
        let mut counts: Vec<u32> = Vec::new();
        for v in vectors {
            if v.0.len() > sums.len() {
                sums.resize(v.0.len(), 0.0);
                counts.resize(v.0.len(), 0);
            }
            for (i, x) in v.0.iter().enumerate() {
                sums[i] += x;
                counts[i] += 1;
            }
        }
        Self(
            sums.into_iter()
                .zip(counts)
                .map(|(s, c)| if c == 0 { 0.0 } else { s / c as f32 })
                .collect(),
        )
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(v: Vec<f32>) -> Self {
        Self(v)
    }
}

/// Cosine similarity over raw slices. Returns 0.0 for mismatched lengths
/// or zero-magnitude input.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0_f32, 0.0_f32, 0.0_f32);
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

// ---------------------------------------------------------------------------
// Modalities & attention targets
// ---------------------------------------------------------------------------

/// Sensory modality a feature slice belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Vision.
    Visual,
    /// Touch / contact.
    Tactile,
    /// Hearing.
    Auditory,
    /// Body position and movement.
    Proprioceptive,
}

impl Modality {
    /// Every modality, in the fixed order used to split combined vectors.
    pub const ALL: [Self; 4] = [
        Self::Visual,
        Self::Tactile,
        Self::Auditory,
        Self::Proprioceptive,
    ];
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Visual => "visual",
            Self::Tactile => "tactile",
            Self::Auditory => "auditory",
            Self::Proprioceptive => "proprioceptive",
        };
        f.write_str(name)
    }
}

/// Identity of an attention / exploration target: the modality plus the
/// quantized bucket of its feature slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId {
    /// Modality the target was perceived through.
    pub modality: Modality,
    /// Quantized feature bucket (see [`crate::hashing::FeatureHasher`]).
    pub bucket: u64,
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:016x}", self.modality, self.bucket)
    }
}

// ---------------------------------------------------------------------------
// Recall Score
// ---------------------------------------------------------------------------

/// Composite score used to rank experiences during recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecallScore(pub OrderedFloat<f32>);

impl RecallScore {
    /// Create a recall score from a raw f32.
    #[must_use]
    pub fn new(score: f32) -> Self {
        Self(OrderedFloat(score))
    }

    /// Get the raw score value.
    #[must_use]
    pub fn value(self) -> f32 {
        self.0.into_inner()
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Point-in-time statistics for the whole engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Number of stored experiences.
    pub episodic_count: usize,
    /// Number of semantic memories.
    pub semantic_count: usize,
    /// Mean strength across stored experiences (0.0 when empty).
    pub average_strength: f32,
    /// Sum of recall counts across stored experiences.
    pub total_recalls: u64,
    /// Number of tracked novelty buckets.
    pub novelty_buckets: usize,
    /// Number of tracked exploration targets.
    pub exploration_targets: usize,
    /// Entries in the rolling attention history.
    pub attention_history: usize,
    /// Current curiosity level.
    pub curiosity_level: f32,
    /// When the last decay pass ran.
    pub last_decay: Option<Timestamp>,
    /// When the last consolidation pass ran.
    pub last_consolidation: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_and_orthogonal() {
        let a = FeatureVector(vec![1.0, 0.0, 0.0]);
        let b = FeatureVector(vec![0.0, 1.0, 0.0]);
        assert!((a.cosine_similarity(&a) - 1.0).abs() < 1e-6);
        assert!(a.cosine_similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_or_zero_is_zero() {
        let a = FeatureVector(vec![1.0, 0.0]);
        let b = FeatureVector(vec![1.0, 0.0, 0.0]);
        let z = FeatureVector(vec![0.0, 0.0]);
        assert_eq!(a.cosine_similarity(&b), 0.0);
        assert_eq!(a.cosine_similarity(&z), 0.0);
    }

    #[test]
    fn mean_of_vectors() {
        let a = FeatureVector(vec![1.0, 2.0]);
        let b = FeatureVector(vec![3.0, 4.0]);
        let m = FeatureVector::mean([&a, &b]);
        assert_eq!(m.0, vec![2.0, 3.0]);
        assert!(FeatureVector::mean(std::iter::empty::<&FeatureVector>()).is_empty());
    }

    #[test]
    fn emotion_intensity_and_similarity() {
        let e = Emotion::new(0.6, 0.8);
        assert!((e.intensity() - 1.0).abs() < 1e-6);
        assert!((e.similarity(&e) - 1.0).abs() < 1e-6);
        let far = Emotion::new(-1.0, -1.0);
        assert_eq!(Emotion::new(1.0, 1.0).similarity(&far), 0.0);
    }

    #[test]
    fn elapsed_helpers_saturate() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::hours(2);
        assert!((hours_between(t0, t1) - 2.0).abs() < 1e-9);
        assert_eq!(seconds_between(t1, t0), 0.0);
    }

    #[test]
    fn target_id_display() {
        let id = TargetId {
            modality: Modality::Auditory,
            bucket: 0xff,
        };
        assert_eq!(id.to_string(), "auditory:00000000000000ff");
    }
}
