//! Recall ranking: weighted multi-factor scoring over stored experiences.
//!
//!   Score = Σ active weighted factors / number of active factors
//!
//! Strength, recency and frequency are always active; similarity, emotion
//! and attention join only when the query (and, for attention, the
//! experience) supplies their input. Ties go to the newer experience, then
//! to the lower id so the ordering is total.

pub mod scoring;

use serde::{Deserialize, Serialize};

use crate::config::RecallConfig;
use crate::memory::Experience;
use crate::types::{Emotion, FeatureVector, RecallScore, TargetId, Timestamp};

/// What to recall. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecallQuery {
    /// Sensory probe compared against combined sensory vectors.
    #[serde(default)]
    pub sensory: Option<FeatureVector>,
    /// Emotion to match.
    #[serde(default, alias = "emotions")]
    pub emotion: Option<Emotion>,
    /// Attention target to match.
    #[serde(default)]
    pub attention_target: Option<TargetId>,
}

impl RecallQuery {
    /// An empty query (strength / recency / frequency only).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sensory probe.
    #[must_use]
    pub fn with_sensory(mut self, probe: impl Into<FeatureVector>) -> Self {
        self.sensory = Some(probe.into());
        self
    }

    /// Add an emotion to match.
    #[must_use]
    pub fn with_emotion(mut self, emotion: Emotion) -> Self {
        self.emotion = Some(emotion);
        self
    }

    /// Add an attention target to match.
    #[must_use]
    pub fn with_attention_target(mut self, target: TargetId) -> Self {
        self.attention_target = Some(target);
        self
    }
}

/// Weighted per-factor contributions for one experience.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Strength contribution.
    pub strength: f32,
    /// Recency contribution.
    pub recency: f32,
    /// Frequency contribution.
    pub frequency: f32,
    /// Sensory similarity contribution, if active.
    pub similarity: Option<f32>,
    /// Emotional similarity contribution, if active.
    pub emotional: Option<f32>,
    /// Attention match contribution, if active.
    pub attention: Option<f32>,
}

impl ScoreBreakdown {
    /// Number of factors that took part.
    #[must_use]
    pub fn active_factors(&self) -> usize {
        3 + [self.similarity, self.emotional, self.attention]
            .iter()
            .filter(|f| f.is_some())
            .count()
    }

    /// Sum of active factors divided by their count.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score(&self) -> f32 {
        let sum = self.strength
            + self.recency
            + self.frequency
            + self.similarity.unwrap_or(0.0)
            + self.emotional.unwrap_or(0.0)
            + self.attention.unwrap_or(0.0);
        sum / self.active_factors() as f32
    }
}

/// One ranked result. `index` points into the slice that was ranked.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedExperience {
    /// Position in the ranked slice.
    pub index: usize,
    /// Combined score.
    pub score: RecallScore,
    /// Per-factor breakdown.
    pub breakdown: ScoreBreakdown,
}

/// A scored recall result handed back to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredExperience {
    /// The experience after recall side effects were applied.
    pub experience: Experience,
    /// Combined score (computed before the side effects).
    pub score: f32,
    /// Per-factor breakdown.
    pub breakdown: ScoreBreakdown,
}

/// Ranks experiences for a query.
#[derive(Debug, Clone)]
pub struct RecallRanker {
    config: RecallConfig,
}

impl RecallRanker {
    /// Create a ranker.
    #[must_use]
    pub fn new(config: &RecallConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Score every experience and return the best `limit`, best first.
    #[must_use]
    pub fn rank(
        &self,
        experiences: &[Experience],
        query: &RecallQuery,
        now: Timestamp,
        limit: usize,
    ) -> Vec<RankedExperience> {
        let mut results: Vec<RankedExperience> = experiences
            .iter()
            .enumerate()
            .map(|(index, e)| {
                let breakdown = scoring::compute_breakdown(e, query, now, &self.config);
                RankedExperience {
                    index,
                    score: RecallScore::new(breakdown.score()),
                    breakdown,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            let (ea, eb) = (&experiences[a.index], &experiences[b.index]);
            b.score
                .cmp(&a.score)
                .then_with(|| eb.timestamp.cmp(&ea.timestamp))
                .then_with(|| ea.id.cmp(&eb.id))
        });
        results.truncate(limit);
        results
    }
}

impl Default for RecallRanker {
    fn default() -> Self {
        Self::new(&RecallConfig::default())
    }
}
