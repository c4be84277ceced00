//! Semantic memories: generalizations over similar experiences.
//!
//! Created by the consolidation engine, never by callers. Associations are
//! soft references: a source experience may be pruned later and the id is
//! left dangling.

use serde::{Deserialize, Serialize};

use crate::memory::Experience;
use crate::types::{Emotion, ExperienceId, FeatureVector, SemanticId, Timestamp};

/// How a semantic memory was formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticKind {
    /// Cluster found by the periodic consolidation pass.
    Pattern,
    /// Repetition detected synchronously while storing.
    ImmediatePattern,
}

impl SemanticKind {
    /// Concept label prefix.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::ImmediatePattern => "immediate_pattern",
        }
    }
}

/// A consolidated pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticMemory {
    /// Unique identifier.
    pub id: SemanticId,
    /// How it was formed.
    pub kind: SemanticKind,
    /// Human-readable concept tag.
    pub concept: String,
    /// Mean sensory vector of the sources.
    pub features: FeatureVector,
    /// Source experiences.
    pub associations: Vec<ExperienceId>,
    /// `min(1, associations / 10)`.
    pub strength: f32,
    /// Mean emotion of the sources.
    pub mean_emotion: Emotion,
    /// Times returned by a semantic recall.
    pub access_count: u32,
    /// When it was formed.
    pub created_at: Timestamp,
    /// Last recall or reinforcement.
    pub last_accessed: Timestamp,
}

/// Strength of a group of `size` sources.
#[must_use]
pub fn group_strength(size: usize) -> f32 {
    #[allow(clippy::cast_precision_loss)]
    let s = size as f32 / 10.0;
    s.min(1.0)
}

impl SemanticMemory {
    /// Create a semantic memory from its sources.
    #[must_use]
    pub fn new(
        kind: SemanticKind,
        features: FeatureVector,
        associations: Vec<ExperienceId>,
        mean_emotion: Emotion,
        now: Timestamp,
    ) -> Self {
        let concept = format!("{}:{}", kind.label(), associations.len());
        Self {
            id: SemanticId::new(),
            kind,
            concept,
            features,
            strength: group_strength(associations.len()),
            associations,
            mean_emotion,
            access_count: 0,
            created_at: now,
            last_accessed: now,
        }
    }

    /// Add another source and fold it into the running feature and emotion
    /// means. Already-associated ids are ignored.
    /// Returns whether the association was new.
    #[allow(clippy::cast_precision_loss)]
    pub fn reinforce(&mut self, source: &Experience, now: Timestamp) -> bool {
        if self.associations.contains(&source.id) {
            return false;
        }
        self.associations.push(source.id);
        let n = self.associations.len() as f32;
        let incoming = source.features.as_slice();
        if incoming.len() > self.features.0.len() {
            self.features.0.resize(incoming.len(), 0.0);
        }
        for (mean, x) in self.features.0.iter_mut().zip(incoming) {
            *mean += (x - *mean) / n;
        }
        self.mean_emotion.valence += (source.emotion.valence - self.mean_emotion.valence) / n;
        self.mean_emotion.arousal += (source.emotion.arousal - self.mean_emotion.arousal) / n;

        self.strength = group_strength(self.associations.len());
        self.concept = format!("{}:{}", self.kind.label(), self.associations.len());
        self.last_accessed = now;
        true
    }

    /// Record a semantic recall.
    pub fn touch(&mut self, now: Timestamp) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed = now;
    }

    /// Whether `id` is one of the sources.
    #[must_use]
    pub fn references(&self, id: &ExperienceId) -> bool {
        self.associations.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ExperienceInput, NeuralOutput, SensoryInput};
    use chrono::Utc;

    #[test]
    fn strength_tracks_group_size() {
        assert!((group_strength(3) - 0.3).abs() < 1e-6);
        assert!((group_strength(25) - 1.0).abs() < 1e-6);
    }

    fn source(values: Vec<f32>, emotion: Emotion) -> Experience {
        Experience::from_input(
            ExperienceInput::new(
                SensoryInput {
                    visual: values,
                    ..SensoryInput::default()
                },
                NeuralOutput::with_error(0.0),
                emotion,
                0.0,
            ),
            Utc::now(),
        )
    }

    #[test]
    fn reinforce_adds_once() {
        let now = Utc::now();
        let sources: Vec<Experience> = (0..3).map(|_| source(vec![1.0], Emotion::NEUTRAL)).collect();
        let mut s = SemanticMemory::new(
            SemanticKind::ImmediatePattern,
            FeatureVector(vec![1.0]),
            sources.iter().map(|e| e.id).collect(),
            Emotion::NEUTRAL,
            now,
        );
        assert_eq!(s.concept, "immediate_pattern:3");
        assert!(!s.reinforce(&sources[0], now));
        assert!(s.reinforce(&source(vec![1.0], Emotion::NEUTRAL), now));
        assert_eq!(s.associations.len(), 4);
        assert!((s.strength - 0.4).abs() < 1e-6);
    }

    #[test]
    fn reinforce_moves_the_centroid() {
        let now = Utc::now();
        let mut s = SemanticMemory::new(
            SemanticKind::ImmediatePattern,
            FeatureVector(vec![1.0, 0.0]),
            vec![ExperienceId::new(), ExperienceId::new(), ExperienceId::new()],
            Emotion::new(0.0, 0.4),
            now,
        );
        assert!(s.reinforce(&source(vec![0.0, 1.0, 2.0], Emotion::new(0.8, 0.0)), now));
        assert_eq!(s.features.0, vec![0.75, 0.25, 0.5]);
        assert!((s.mean_emotion.valence - 0.2).abs() < 1e-6);
        assert!((s.mean_emotion.arousal - 0.3).abs() < 1e-6);
    }
}
