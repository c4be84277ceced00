//! Experiences: one stored episode per perception cycle.
//!
//! The engine reads only the numeric parts of an experience bundle: the
//! per-modality feature slices, the prediction error, the emotion tuple and
//! the curiosity scalar. Everything else the host attaches stays outside.

use serde::{Deserialize, Serialize};

use crate::attention::Attention;
use crate::config::ModalityLayout;
use crate::error::{ErneError, Result};
use crate::types::{Emotion, ExperienceId, FeatureVector, Modality, Timestamp};

// ---------------------------------------------------------------------------
// Inbound payload
// ---------------------------------------------------------------------------

/// Feature slices for each sensory modality, as produced by the encoder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensoryInput {
    /// Visual features.
    #[serde(default)]
    pub visual: Vec<f32>,
    /// Tactile features.
    #[serde(default)]
    pub tactile: Vec<f32>,
    /// Auditory features.
    #[serde(default)]
    pub auditory: Vec<f32>,
    /// Proprioceptive features.
    #[serde(default)]
    pub proprioceptive: Vec<f32>,
}

impl SensoryInput {
    /// Split a combined vector into modality slices using `layout`.
    ///
    /// Slices are taken in [`Modality::ALL`] order. A short vector yields
    /// short (or empty) trailing slices; components past the layout's total
    /// width are dropped.
    #[must_use]
    pub fn from_combined(combined: &[f32], layout: &ModalityLayout) -> Self {
        let mut rest = combined;
        let mut take = |width: usize| {
            let n = width.min(rest.len());
            let (head, tail) = rest.split_at(n);
            rest = tail;
            head.to_vec()
        };
        Self {
            visual: take(layout.visual),
            tactile: take(layout.tactile),
            auditory: take(layout.auditory),
            proprioceptive: take(layout.proprioceptive),
        }
    }

    /// Borrow one modality's slice.
    #[must_use]
    pub fn channel(&self, modality: Modality) -> &[f32] {
        match modality {
            Modality::Visual => &self.visual,
            Modality::Tactile => &self.tactile,
            Modality::Auditory => &self.auditory,
            Modality::Proprioceptive => &self.proprioceptive,
        }
    }

    /// Mutably borrow one modality's slice.
    pub fn channel_mut(&mut self, modality: Modality) -> &mut Vec<f32> {
        match modality {
            Modality::Visual => &mut self.visual,
            Modality::Tactile => &mut self.tactile,
            Modality::Auditory => &mut self.auditory,
            Modality::Proprioceptive => &mut self.proprioceptive,
        }
    }

    /// Concatenation of every slice in [`Modality::ALL`] order.
    #[must_use]
    pub fn combined(&self) -> FeatureVector {
        let mut out = Vec::with_capacity(self.len());
        for modality in Modality::ALL {
            out.extend_from_slice(self.channel(modality));
        }
        FeatureVector(out)
    }

    /// Total number of components across all modalities.
    #[must_use]
    pub fn len(&self) -> usize {
        Modality::ALL.iter().map(|m| self.channel(*m).len()).sum()
    }

    /// Whether every slice is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every component is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        Modality::ALL
            .iter()
            .all(|m| self.channel(*m).iter().all(|x| x.is_finite()))
    }
}

/// Output of the external network for this cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NeuralOutput {
    /// Raw activations, stored but not interpreted.
    #[serde(default)]
    pub activations: Vec<f32>,
    /// Prediction error for the cycle.
    pub prediction_error: f32,
}

impl NeuralOutput {
    /// Output with no activations and the given prediction error.
    #[must_use]
    pub fn with_error(prediction_error: f32) -> Self {
        Self {
            activations: Vec::new(),
            prediction_error,
        }
    }
}

/// Everything the host hands over for one perception cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceInput {
    /// Sensory feature slices.
    pub sensory: SensoryInput,
    /// Network output (prediction error feeds strength).
    pub neural_output: NeuralOutput,
    /// Emotional state at the time.
    pub emotion: Emotion,
    /// Attention event for the cycle, if any.
    #[serde(default)]
    pub attention: Option<Attention>,
    /// Curiosity level at the time.
    pub curiosity: f32,
}

impl ExperienceInput {
    /// Bundle without an attention event.
    #[must_use]
    pub fn new(
        sensory: SensoryInput,
        neural_output: NeuralOutput,
        emotion: Emotion,
        curiosity: f32,
    ) -> Self {
        Self {
            sensory,
            neural_output,
            emotion,
            attention: None,
            curiosity,
        }
    }

    /// Attach an attention event.
    #[must_use]
    pub fn with_attention(mut self, attention: Attention) -> Self {
        self.attention = Some(attention);
        self
    }

    /// Parse a JSON bundle.
    ///
    /// # Errors
    /// Returns `ErneError::InvalidInput` when required fields are missing,
    /// mistyped, or fail [`Self::validate`].
    pub fn from_json(json: &str) -> Result<Self> {
        let input: Self = serde_json::from_str(json).map_err(|e| ErneError::invalid(e.to_string()))?;
        input.validate()?;
        Ok(input)
    }

    /// Reject payloads the engine cannot score.
    ///
    /// # Errors
    /// Returns `ErneError::InvalidInput` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.sensory.is_empty() {
            return Err(ErneError::invalid("sensory input has no features"));
        }
        if !self.sensory.is_finite() {
            return Err(ErneError::invalid("sensory input contains non-finite values"));
        }
        if !self.neural_output.prediction_error.is_finite() {
            return Err(ErneError::invalid("prediction_error must be finite"));
        }
        if !self.emotion.is_finite() {
            return Err(ErneError::invalid("emotion must be finite"));
        }
        if !self.curiosity.is_finite() {
            return Err(ErneError::invalid("curiosity must be finite"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stored experience
// ---------------------------------------------------------------------------

/// Strength an experience starts with:
///
///   0.5 + 0.3 · |emotion| + 0.2 · curiosity + min(0.3, 0.2 · prediction error)
///
/// clamped to [0.1, 1.0].
#[must_use]
pub fn initial_strength(emotion: &Emotion, curiosity: f32, prediction_error: f32) -> f32 {
    let raw = 0.5
        + 0.3 * emotion.intensity()
        + 0.2 * curiosity
        + (0.2 * prediction_error).min(0.3);
    if raw.is_nan() {
        return 0.1;
    }
    raw.clamp(0.1, 1.0)
}

/// A stored episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    /// Unique identifier.
    pub id: ExperienceId,
    /// Creation time.
    pub timestamp: Timestamp,
    /// Sensory feature slices.
    pub sensory: SensoryInput,
    /// Network output.
    pub neural_output: NeuralOutput,
    /// Emotion at creation.
    pub emotion: Emotion,
    /// Attention event of the cycle, if any.
    pub attention: Option<Attention>,
    /// Curiosity at creation.
    pub curiosity: f32,
    /// Retention strength. Starts in [0.1, 1.0], decays toward 0.01.
    pub strength: f32,
    /// Successful recalls.
    pub recall_count: u32,
    /// Last recall (creation time until first recalled).
    pub last_recalled: Timestamp,
    /// Last time decay was applied (creation time initially).
    pub last_decayed: Timestamp,
    /// Combined sensory vector, cached for similarity.
    pub features: FeatureVector,
}

impl Experience {
    /// Build a stored experience from a validated input.
    #[must_use]
    pub fn from_input(input: ExperienceInput, now: Timestamp) -> Self {
        let strength = initial_strength(
            &input.emotion,
            input.curiosity,
            input.neural_output.prediction_error,
        );
        let features = input.sensory.combined();
        Self {
            id: ExperienceId::new(),
            timestamp: now,
            sensory: input.sensory,
            neural_output: input.neural_output,
            emotion: input.emotion,
            attention: input.attention,
            curiosity: input.curiosity,
            strength,
            recall_count: 0,
            last_recalled: now,
            last_decayed: now,
            features,
        }
    }

    /// Apply the side effects of being returned by a recall.
    pub fn record_recall(&mut self, now: Timestamp, boost: f32) {
        self.recall_count = self.recall_count.saturating_add(1);
        self.last_recalled = now;
        self.strength = (self.strength * boost).clamp(0.1, 1.0);
    }

    /// Sensory cosine similarity with another experience.
    #[must_use]
    pub fn similarity(&self, other: &Self) -> f32 {
        self.features.cosine_similarity(&other.features)
    }

    /// Attention target id, if the experience carries one.
    #[must_use]
    pub fn attention_target(&self) -> Option<crate::types::TargetId> {
        self.attention.as_ref().map(|a| a.target.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn input(valence: f32, arousal: f32, curiosity: f32, pe: f32) -> ExperienceInput {
        ExperienceInput::new(
            SensoryInput {
                visual: vec![0.1, 0.2],
                ..SensoryInput::default()
            },
            NeuralOutput::with_error(pe),
            Emotion::new(valence, arousal),
            curiosity,
        )
    }

    #[test]
    fn strength_formula() {
        let s = initial_strength(&Emotion::new(0.6, 0.8), 0.5, 1.0);
        // 0.5 + 0.3 + 0.1 + 0.2 = 1.1 → 1.0
        assert!((s - 1.0).abs() < 1e-6);
        let calm = initial_strength(&Emotion::NEUTRAL, 0.0, 0.0);
        assert!((calm - 0.5).abs() < 1e-6);
    }

    #[test]
    fn strength_clamped_for_extremes() {
        assert!((initial_strength(&Emotion::NEUTRAL, -100.0, -100.0) - 0.1).abs() < 1e-6);
        assert!((initial_strength(&Emotion::new(50.0, 50.0), 9.0, 9.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn prediction_error_contribution_capped() {
        let a = initial_strength(&Emotion::NEUTRAL, 0.0, 1.5);
        let b = initial_strength(&Emotion::NEUTRAL, 0.0, 100.0);
        assert!((a - b).abs() < 1e-6);
        assert!((a - 0.8).abs() < 1e-6);
    }

    #[test]
    fn from_input_initializes_bookkeeping() {
        let now = Utc::now();
        let e = Experience::from_input(input(0.0, 0.0, 0.0, 0.0), now);
        assert_eq!(e.recall_count, 0);
        assert_eq!(e.last_recalled, now);
        assert_eq!(e.last_decayed, now);
        assert_eq!(e.features.0, vec![0.1, 0.2]);
    }

    #[test]
    fn recall_boost_is_capped() {
        let now = Utc::now();
        let mut e = Experience::from_input(input(1.0, 1.0, 1.0, 2.0), now);
        e.record_recall(now, 1.05);
        assert_eq!(e.recall_count, 1);
        assert!((e.strength - 1.0).abs() < 1e-6);
    }

    #[test]
    fn recall_lifts_decayed_strength_to_the_store_floor() {
        let now = Utc::now();
        let mut e = Experience::from_input(input(0.0, 0.0, 0.0, 0.0), now);
        e.strength = 0.01;
        e.record_recall(now, 1.05);
        assert!((e.strength - 0.1).abs() < 1e-6);
    }

    #[test]
    fn combined_round_trips_through_layout() {
        let layout = ModalityLayout {
            visual: 2,
            tactile: 1,
            auditory: 1,
            proprioceptive: 1,
        };
        let s = SensoryInput::from_combined(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &layout);
        assert_eq!(s.visual, vec![1.0, 2.0]);
        assert_eq!(s.proprioceptive, vec![5.0]);
        assert_eq!(s.combined().0, vec![1.0, 2.0, 3.0, 4.0, 5.0]);

        let short = SensoryInput::from_combined(&[1.0, 2.0, 3.0], &layout);
        assert_eq!(short.tactile, vec![3.0]);
        assert!(short.auditory.is_empty());
    }

    #[test]
    fn validation_rejects_bad_payloads() {
        let mut bad = input(0.0, 0.0, 0.0, 0.0);
        bad.sensory = SensoryInput::default();
        assert!(matches!(bad.validate(), Err(ErneError::InvalidInput(_))));

        let mut nan = input(0.0, 0.0, 0.0, 0.0);
        nan.neural_output.prediction_error = f32::NAN;
        assert!(nan.validate().is_err());
    }

    #[test]
    fn from_json_requires_numeric_fields() {
        let ok = r#"{
            "sensory": {"visual": [0.1, 0.2]},
            "neural_output": {"prediction_error": 0.4},
            "emotion": {"valence": 0.2, "arousal": 0.1},
            "curiosity": 0.5
        }"#;
        let parsed = ExperienceInput::from_json(ok).expect("valid bundle");
        assert!(parsed.attention.is_none());

        let missing = r#"{
            "sensory": {"visual": [0.1]},
            "neural_output": {},
            "emotion": {"valence": 0.2, "arousal": 0.1},
            "curiosity": 0.5
        }"#;
        assert!(matches!(
            ExperienceInput::from_json(missing),
            Err(ErneError::InvalidInput(_))
        ));
    }
}
