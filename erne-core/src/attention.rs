//! Attention selection: which modality is most salient this cycle.
//!
//! Novelty is computed per modality slice; the most novel modality wins and,
//! if it clears the threshold, becomes an [`Attention`] event whose
//! information gain scales with the slice's complexity and the current
//! curiosity:
//!
//!   gain = novelty × complexity × (1 + 0.5 · curiosity)
//!
//! Complexity is the mean of the clamped variance and the normalized
//! Shannon entropy of a histogram over the slice.
//!
//! Reference: Itti, L. & Baldi, P. (2009). "Bayesian surprise attracts human attention."

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::AttentionConfig;
use crate::memory::SensoryInput;
use crate::novelty::NoveltyTracker;
use crate::types::{FeatureVector, Modality, TargetId, Timestamp};

/// Complexity above which a visual target counts as an object.
const OBJECT_COMPLEXITY: f32 = 0.5;

/// Coarse classification of what was attended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Structured visual input.
    Object,
    /// Low-complexity visual input.
    Pattern,
    /// Tactile contact.
    Surface,
    /// Auditory event.
    Sound,
    /// Proprioceptive change.
    Movement,
}

impl TargetKind {
    /// Classify a slice from its modality and complexity.
    #[must_use]
    pub fn classify(modality: Modality, complexity: f32) -> Self {
        match modality {
            Modality::Visual if complexity > OBJECT_COMPLEXITY => Self::Object,
            Modality::Visual => Self::Pattern,
            Modality::Tactile => Self::Surface,
            Modality::Auditory => Self::Sound,
            Modality::Proprioceptive => Self::Movement,
        }
    }
}

/// What an attention event points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionTarget {
    /// Modality + bucket identity.
    pub id: TargetId,
    /// Modality the target came through.
    pub modality: Modality,
    /// Classified kind.
    pub kind: TargetKind,
    /// The winning feature slice.
    pub features: FeatureVector,
}

/// The single most salient target of one perception cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attention {
    /// Target descriptor.
    pub target: AttentionTarget,
    /// Equal to the novelty of the winning modality.
    pub intensity: f32,
    /// Novelty of the winning modality.
    pub novelty: f32,
    /// Expected information gain from attending.
    pub information_gain: f32,
    /// When it was selected.
    pub timestamp: Timestamp,
}

/// Novelty per modality for one cycle. Modalities with an empty slice are 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModalityScores {
    /// Visual novelty.
    pub visual: f32,
    /// Tactile novelty.
    pub tactile: f32,
    /// Auditory novelty.
    pub auditory: f32,
    /// Proprioceptive novelty.
    pub proprioceptive: f32,
}

impl ModalityScores {
    /// Score for one modality.
    #[must_use]
    pub fn get(&self, modality: Modality) -> f32 {
        match modality {
            Modality::Visual => self.visual,
            Modality::Tactile => self.tactile,
            Modality::Auditory => self.auditory,
            Modality::Proprioceptive => self.proprioceptive,
        }
    }

    fn set(&mut self, modality: Modality, value: f32) {
        match modality {
            Modality::Visual => self.visual = value,
            Modality::Tactile => self.tactile = value,
            Modality::Auditory => self.auditory = value,
            Modality::Proprioceptive => self.proprioceptive = value,
        }
    }

    /// Highest-scoring modality. Ties go to the earlier modality in
    /// [`Modality::ALL`].
    #[must_use]
    pub fn max(&self) -> (Modality, f32) {
        let mut best = (Modality::Visual, self.visual);
        for modality in &Modality::ALL[1..] {
            let score = self.get(*modality);
            if score > best.1 {
                best = (*modality, score);
            }
        }
        best
    }
}

/// Result of one selection step.
#[derive(Debug, Clone, PartialEq)]
pub struct Perception {
    /// Attention event, if the winning novelty cleared the threshold.
    pub attention: Option<Attention>,
    /// Novelty per modality.
    pub scores: ModalityScores,
}

/// Variance / entropy complexity of a slice, in [0, 1].
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn feature_complexity(features: &[f32], bins: usize) -> f32 {
    if features.is_empty() || bins == 0 {
        return 0.0;
    }
    let n = features.len() as f32;
    let mean = features.iter().sum::<f32>() / n;
    let variance = features.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;

    let (min, max) = features
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
    let range = max - min;
    let entropy = if range <= f32::EPSILON || bins < 2 {
        0.0
    } else {
        let mut histogram = vec![0_usize; bins];
        for &x in features {
            let slot = (((x - min) / range) * bins as f32) as usize;
            histogram[slot.min(bins - 1)] += 1;
        }
        let h: f32 = histogram
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f32 / n;
                -p * p.log2()
            })
            .sum();
        h / (bins as f32).log2()
    };

    ((variance.min(1.0) + entropy) / 2.0).clamp(0.0, 1.0)
}

/// Picks the attended modality and keeps a rolling history of events.
#[derive(Debug, Clone)]
pub struct AttentionSelector {
    threshold: f32,
    bins: usize,
    history_size: usize,
    history: VecDeque<Attention>,
}

impl AttentionSelector {
    /// Create a selector with an empty history.
    #[must_use]
    pub fn new(config: &AttentionConfig) -> Self {
        Self {
            threshold: config.novelty_threshold,
            bins: config.histogram_bins,
            history_size: config.history_size,
            history: VecDeque::with_capacity(config.history_size),
        }
    }

    /// Score every non-empty modality and select the attended one.
    pub fn select(
        &mut self,
        sensory: &SensoryInput,
        curiosity: f32,
        novelty: &mut NoveltyTracker,
        now: Timestamp,
    ) -> Perception {
        let mut scores = ModalityScores::default();
        let mut buckets = [0_u64; 4];
        for (i, modality) in Modality::ALL.iter().enumerate() {
            let slice = sensory.channel(*modality);
            if slice.is_empty() {
                continue;
            }
            let bucket = novelty.bucket_of(slice);
            buckets[i] = bucket;
            scores.set(*modality, novelty.encounter(*modality, bucket, now));
        }

        let (modality, best) = scores.max();
        let slice = sensory.channel(modality);
        if slice.is_empty() || best <= self.threshold {
            return Perception {
                attention: None,
                scores,
            };
        }

        let complexity = feature_complexity(slice, self.bins);
        let bucket = Modality::ALL
            .iter()
            .position(|m| *m == modality)
            .map_or(0, |i| buckets[i]);
        let attention = Attention {
            target: AttentionTarget {
                id: TargetId { modality, bucket },
                modality,
                kind: TargetKind::classify(modality, complexity),
                features: FeatureVector(slice.to_vec()),
            },
            intensity: best,
            novelty: best,
            information_gain: best * complexity * (1.0 + 0.5 * curiosity),
            timestamp: now,
        };
        self.remember(attention.clone());
        Perception {
            attention: Some(attention),
            scores,
        }
    }

    fn remember(&mut self, attention: Attention) {
        if self.history_size == 0 {
            return;
        }
        while self.history.len() >= self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(attention);
    }

    /// Recent attention events, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<Attention> {
        self.history.iter().cloned().collect()
    }

    /// Number of events in the history.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Replace the history (used when restoring a snapshot).
    pub fn restore_history(&mut self, events: Vec<Attention>) {
        self.history = events.into_iter().collect();
        while self.history.len() > self.history_size {
            self.history.pop_front();
        }
    }
}

impl Default for AttentionSelector {
    fn default() -> Self {
        Self::new(&AttentionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn varied(n: usize) -> Vec<f32> {
        (0..n).map(|i| (i as f32) / (n as f32)).collect()
    }

    #[test]
    fn complexity_bounds() {
        assert_eq!(feature_complexity(&[], 10), 0.0);
        assert_eq!(feature_complexity(&[0.5; 8], 10), 0.0);
        let c = feature_complexity(&varied(32), 10);
        assert!(c > 0.4 && c <= 1.0, "complexity {c}");
    }

    #[test]
    fn classification_by_modality() {
        assert_eq!(TargetKind::classify(Modality::Visual, 0.9), TargetKind::Object);
        assert_eq!(TargetKind::classify(Modality::Visual, 0.1), TargetKind::Pattern);
        assert_eq!(TargetKind::classify(Modality::Auditory, 0.9), TargetKind::Sound);
    }

    #[test]
    fn first_perception_attends_most_novel() {
        let mut selector = AttentionSelector::default();
        let mut novelty = NoveltyTracker::default();
        let sensory = SensoryInput {
            visual: varied(32),
            tactile: vec![0.1; 16],
            ..SensoryInput::default()
        };
        let p = selector.select(&sensory, 0.5, &mut novelty, Utc::now());
        let attention = p.attention.expect("novel input should be attended");
        assert_eq!(attention.target.modality, Modality::Visual);
        assert!((attention.novelty - 1.0).abs() < 1e-6);
        assert!(attention.information_gain > 0.0);
        assert_eq!(p.scores.auditory, 0.0);
        assert_eq!(selector.history_len(), 1);
    }

    #[test]
    fn familiar_input_falls_below_threshold() {
        let mut selector = AttentionSelector::default();
        let mut novelty = NoveltyTracker::default();
        let now = Utc::now();
        let sensory = SensoryInput {
            tactile: vec![0.3; 16],
            ..SensoryInput::default()
        };
        let mut attended = 0;
        for _ in 0..30 {
            if selector.select(&sensory, 0.0, &mut novelty, now).attention.is_some() {
                attended += 1;
            }
        }
        // 0.9^k drops below 0.3 after 11 repeats.
        assert!(attended < 30);
        assert!(selector.select(&sensory, 0.0, &mut novelty, now).attention.is_none());
    }

    #[test]
    fn history_is_bounded() {
        let mut selector = AttentionSelector::new(&AttentionConfig {
            history_size: 3,
            ..AttentionConfig::default()
        });
        let mut novelty = NoveltyTracker::default();
        let now = Utc::now();
        for i in 0..10 {
            let sensory = SensoryInput {
                visual: vec![i as f32, 0.0, 1.0],
                ..SensoryInput::default()
            };
            selector.select(&sensory, 0.0, &mut novelty, now);
        }
        assert_eq!(selector.history_len(), 3);
    }
}
