//! Exploration targets: deduplicated novel regions worth revisiting.
//!
//! Every attention event lands here. A target whose features are close to an
//! existing one (cosine > `merge_similarity`) is averaged into it; anything
//! else is inserted. Past `max_targets` the tracker keeps only the
//! `retain_on_overflow` targets with the highest information gain.
//!
//! Goal selection:
//!
//!   score = 0.3·novelty + 0.3·gain + 0.2·revisit + 0.2·accessibility
//!   goal  = argmax  score·(1 − bias) + bias·revisit
//!
//! where `revisit = min(1, Δt_since_visit / horizon)`.

use serde::{Deserialize, Serialize};

use crate::attention::Attention;
use crate::config::ExplorationConfig;
use crate::types::{FeatureVector, Modality, TargetId, Timestamp, seconds_between};

/// A tracked region of feature space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationTarget {
    /// Identity (from the first attention event that created it).
    pub id: TargetId,
    /// Modality it was perceived through.
    pub modality: Modality,
    /// Running average of merged feature slices.
    pub features: FeatureVector,
    /// Running average novelty.
    pub novelty: f32,
    /// Running average information gain.
    pub information_gain: f32,
    /// How reachable the target is, in [0, 1].
    pub accessibility: f32,
    /// Last visit (creation time until visited).
    pub last_visited: Timestamp,
    /// When the target was first tracked.
    pub created_at: Timestamp,
    /// Explicit visits.
    pub visits: u32,
}

impl ExplorationTarget {
    fn absorb(&mut self, attention: &Attention) {
        let incoming = attention.target.features.as_slice();
        for (mine, theirs) in self.features.0.iter_mut().zip(incoming) {
            *mine = (*mine + theirs) / 2.0;
        }
        self.novelty = (self.novelty + attention.novelty) / 2.0;
        self.information_gain = (self.information_gain + attention.information_gain) / 2.0;
    }
}

/// Owns the exploration target set.
#[derive(Debug, Clone)]
pub struct ExplorationTargetTracker {
    targets: Vec<ExplorationTarget>,
    config: ExplorationConfig,
}

impl ExplorationTargetTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new(config: &ExplorationConfig) -> Self {
        Self {
            targets: Vec::new(),
            config: config.clone(),
        }
    }

    /// Merge or insert the target of an attention event.
    /// Returns the id of the target that now represents it.
    pub fn observe(&mut self, attention: &Attention, now: Timestamp) -> TargetId {
        if let Some(index) = self.match_index(attention) {
            let target = &mut self.targets[index];
            target.absorb(attention);
            return target.id;
        }

        let id = attention.target.id;
        self.targets.push(ExplorationTarget {
            id,
            modality: attention.target.modality,
            features: attention.target.features.clone(),
            novelty: attention.novelty,
            information_gain: attention.information_gain,
            accessibility: self.config.default_accessibility.clamp(0.0, 1.0),
            last_visited: now,
            created_at: now,
            visits: 0,
        });

        if self.targets.len() > self.config.max_targets {
            self.targets.sort_by(|a, b| {
                b.information_gain
                    .partial_cmp(&a.information_gain)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            self.targets.truncate(self.config.retain_on_overflow);
        }
        id
    }

    fn match_index(&self, attention: &Attention) -> Option<usize> {
        if let Some(i) = self.targets.iter().position(|t| t.id == attention.target.id) {
            return Some(i);
        }
        let mut best: Option<(usize, f32)> = None;
        for (i, target) in self.targets.iter().enumerate() {
            if target.modality != attention.target.modality {
                continue;
            }
            let sim = target.features.cosine_similarity(&attention.target.features);
            if sim > self.config.merge_similarity && best.is_none_or(|(_, s)| sim > s) {
                best = Some((i, sim));
            }
        }
        best.map(|(i, _)| i)
    }

    /// Time-since-visit bonus in [0, 1].
    #[must_use]
    pub fn revisit_bonus(&self, target: &ExplorationTarget, now: Timestamp) -> f32 {
        let horizon = self.config.revisit_horizon_secs.max(f64::EPSILON);
        #[allow(clippy::cast_possible_truncation)]
        let bonus = (seconds_between(target.last_visited, now) / horizon).min(1.0) as f32;
        bonus
    }

    /// Blended goal score of one target.
    #[must_use]
    pub fn goal_score(&self, target: &ExplorationTarget, now: Timestamp) -> f32 {
        let revisit = self.revisit_bonus(target, now);
        let base = 0.3 * target.novelty
            + 0.3 * target.information_gain
            + 0.2 * revisit
            + 0.2 * target.accessibility;
        let bias = self.config.exploration_bias;
        base * (1.0 - bias) + bias * revisit
    }

    /// Best target to explore next, or `None` when nothing is tracked.
    #[must_use]
    pub fn generate_goal(&self, now: Timestamp) -> Option<ExplorationTarget> {
        let mut best: Option<(&ExplorationTarget, f32)> = None;
        for target in &self.targets {
            let score = self.goal_score(target, now);
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((target, score));
            }
        }
        best.map(|(t, _)| t.clone())
    }

    /// Record a visit. Returns `false` for an unknown id.
    pub fn mark_visited(&mut self, id: TargetId, now: Timestamp) -> bool {
        match self.targets.iter_mut().find(|t| t.id == id) {
            Some(target) => {
                target.last_visited = now;
                target.visits = target.visits.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Set a target's accessibility (clamped to [0, 1]). Returns `false` for
    /// an unknown id.
    pub fn set_accessibility(&mut self, id: TargetId, accessibility: f32) -> bool {
        match self.targets.iter_mut().find(|t| t.id == id) {
            Some(target) => {
                target.accessibility = if accessibility.is_nan() {
                    0.0
                } else {
                    accessibility.clamp(0.0, 1.0)
                };
                true
            }
            None => false,
        }
    }

    /// Mean pairwise dissimilarity `1 − cos` across targets, in [0, 1].
    #[must_use]
    pub fn diversity(&self) -> f32 {
        let n = self.targets.len();
        if n < 2 {
            return 0.0;
        }
        let mut total = 0.0_f32;
        let mut pairs = 0_u32;
        for i in 0..n {
            for j in (i + 1)..n {
                let sim = self.targets[i]
                    .features
                    .cosine_similarity(&self.targets[j].features);
                total += (1.0 - sim).clamp(0.0, 1.0);
                pairs += 1;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = total / pairs as f32;
        mean
    }

    /// Fraction of targets not visited for more than `after_secs`.
    #[must_use]
    pub fn unvisited_fraction(&self, now: Timestamp, after_secs: f64) -> f32 {
        if self.targets.is_empty() {
            return 0.0;
        }
        let stale = self
            .targets
            .iter()
            .filter(|t| seconds_between(t.last_visited, now) > after_secs)
            .count();
        #[allow(clippy::cast_precision_loss)]
        let fraction = stale as f32 / self.targets.len() as f32;
        fraction
    }

    /// All tracked targets.
    #[must_use]
    pub fn targets(&self) -> &[ExplorationTarget] {
        &self.targets
    }

    /// Number of tracked targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Replace the tracked set (used when restoring a snapshot).
    pub fn replace_all(&mut self, targets: Vec<ExplorationTarget>) {
        self.targets = targets;
    }
}

impl Default for ExplorationTargetTracker {
    fn default() -> Self {
        Self::new(&ExplorationConfig::default())
    }
}
