//! The experience store: ordered, capacity-bounded episode storage.
//!
//! Experiences are kept in insertion (chronological) order. When the store
//! grows past capacity the weakest are pruned inline; survivors keep their
//! relative order. Reconstruction returns a noisy copy and never touches the
//! stored original.

use std::collections::HashSet;

use rand::Rng;

use crate::config::ReconstructionConfig;
use crate::memory::Experience;
use crate::types::{ExperienceId, FeatureVector, Modality, Timestamp, days_between};

/// Capacity-bounded, chronologically ordered experience collection.
#[derive(Debug, Clone)]
pub struct ExperienceStore {
    experiences: Vec<Experience>,
    capacity: usize,
}

impl ExperienceStore {
    /// Create an empty store holding at most `capacity` experiences.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            experiences: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append an experience, pruning the weakest if capacity is exceeded.
    /// Returns the ids that were pruned (possibly including the new one).
    pub fn insert(&mut self, experience: Experience) -> Vec<ExperienceId> {
        self.experiences.push(experience);
        if self.experiences.len() > self.capacity {
            self.prune_weakest(self.capacity)
        } else {
            Vec::new()
        }
    }

    /// Keep the `keep` strongest experiences and drop the rest.
    ///
    /// Equal strengths favour the newer experience. Survivors keep their
    /// chronological order. Returns the dropped ids.
    pub fn prune_weakest(&mut self, keep: usize) -> Vec<ExperienceId> {
        if self.experiences.len() <= keep {
            return Vec::new();
        }
        let mut ranked: Vec<(f32, Timestamp, ExperienceId)> = self
            .experiences
            .iter()
            .map(|e| (e.strength, e.timestamp, e.id))
            .collect();
        ranked.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| a.2.cmp(&b.2))
        });
        let kept: HashSet<ExperienceId> = ranked.iter().take(keep).map(|r| r.2).collect();

        let mut pruned = Vec::with_capacity(self.experiences.len() - keep);
        self.experiences.retain(|e| {
            let keep_it = kept.contains(&e.id);
            if !keep_it {
                pruned.push(e.id);
            }
            keep_it
        });
        pruned
    }

    /// Look up by id.
    #[must_use]
    pub fn get(&self, id: &ExperienceId) -> Option<&Experience> {
        self.experiences.iter().find(|e| e.id == *id)
    }

    /// Look up by id for mutation.
    pub fn get_mut(&mut self, id: &ExperienceId) -> Option<&mut Experience> {
        self.experiences.iter_mut().find(|e| e.id == *id)
    }

    /// Remove by id.
    pub fn remove(&mut self, id: &ExperienceId) -> Option<Experience> {
        let index = self.experiences.iter().position(|e| e.id == *id)?;
        Some(self.experiences.remove(index))
    }

    /// Ids of the most recent experiences (up to `scan_limit`, newest first)
    /// whose sensory similarity to `features` exceeds `threshold`.
    /// `exclude` is skipped.
    #[must_use]
    pub fn similar_recent(
        &self,
        features: &FeatureVector,
        threshold: f32,
        scan_limit: usize,
        exclude: Option<ExperienceId>,
    ) -> Vec<ExperienceId> {
        self.experiences
            .iter()
            .rev()
            .filter(|e| Some(e.id) != exclude)
            .take(scan_limit)
            .filter(|e| e.features.cosine_similarity(features) > threshold)
            .map(|e| e.id)
            .collect()
    }

    /// All experiences, oldest first.
    #[must_use]
    pub fn as_slice(&self) -> &[Experience] {
        &self.experiences
    }

    /// All experiences for in-place mutation (decay, recall boosts).
    pub fn as_mut_slice(&mut self) -> &mut [Experience] {
        &mut self.experiences
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Experience> {
        self.experiences.iter()
    }

    /// Number of stored experiences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.experiences.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experiences.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Replace the contents (snapshot restore / log replay). Input is sorted
    /// chronologically and pruned to capacity. Returns pruned ids.
    pub fn replace_all(&mut self, mut experiences: Vec<Experience>) -> Vec<ExperienceId> {
        experiences.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        self.experiences = experiences;
        self.prune_weakest(self.capacity)
    }
}

impl Default for ExperienceStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

// ---------------------------------------------------------------------------
// Reconstruction
// ---------------------------------------------------------------------------

/// Noise amplitude for reconstructing `experience` at `now`:
///
///   min(age / horizon, 1) · age_noise + (1 − strength) · weakness_noise
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn reconstruction_noise(
    experience: &Experience,
    now: Timestamp,
    config: &ReconstructionConfig,
) -> f32 {
    let horizon = config.age_horizon_days.max(f64::EPSILON);
    let age_factor = (days_between(experience.timestamp, now) / horizon).min(1.0) as f32;
    let weakness = (1.0 - experience.strength).clamp(0.0, 1.0);
    age_factor * config.age_noise + weakness * config.weakness_noise
}

/// A perturbed copy of `experience`: every sensory component moves by
/// uniform noise in `[-amplitude, amplitude)`. Cached features are
/// recomputed from the perturbed slices.
#[must_use]
pub fn reconstruct<R: Rng>(
    experience: &Experience,
    now: Timestamp,
    config: &ReconstructionConfig,
    rng: &mut R,
) -> Experience {
    let amplitude = reconstruction_noise(experience, now, config);
    let mut copy = experience.clone();
    if amplitude > 0.0 {
        for modality in Modality::ALL {
            for x in copy.sensory.channel_mut(modality).iter_mut() {
                *x += rng.gen_range(-1.0_f32..1.0) * amplitude;
            }
        }
    }
    copy.features = copy.sensory.combined();
    copy
}
