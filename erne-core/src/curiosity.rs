//! Curiosity estimation from prediction error, surprise and target diversity.
//!
//!   level = 2·pe
//!         + 3·max(0, pe − mean(recent pe))      (once ≥ 10 errors are recorded)
//!         + 0.2·diversity + 0.2·unvisited
//!
//! clamped to [0.1, 1.0] and then multiplied by (1 − 0.0001) with the same
//! floor, so a flat signal slowly relaxes instead of pinning at the ceiling.
//!
//! Reference: Schmidhuber, J. (1991). "Curious model-building control systems."

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::CuriosityConfig;
use crate::exploration::ExplorationTargetTracker;
use crate::types::Timestamp;

const CEILING: f32 = 1.0;

/// Exportable estimator state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CuriosityState {
    /// Current level.
    pub level: f32,
    /// Recent prediction errors, oldest first.
    pub history: Vec<f32>,
}

/// Rolling curiosity estimator.
#[derive(Debug, Clone)]
pub struct CuriosityEstimator {
    config: CuriosityConfig,
    history: VecDeque<f32>,
    level: f32,
}

impl CuriosityEstimator {
    /// Create an estimator resting at the floor.
    #[must_use]
    pub fn new(config: &CuriosityConfig) -> Self {
        Self {
            config: config.clone(),
            history: VecDeque::with_capacity(config.history_size),
            level: config.floor,
        }
    }

    /// Fold in a new prediction error and return the updated level.
    pub fn update(
        &mut self,
        prediction_error: f32,
        targets: &ExplorationTargetTracker,
        now: Timestamp,
    ) -> f32 {
        let pe = if prediction_error.is_finite() {
            prediction_error
        } else {
            0.0
        };
        let c = &self.config;

        let mut level = c.error_gain * pe;
        if self.history.len() >= c.min_history && !self.history.is_empty() {
            #[allow(clippy::cast_precision_loss)]
            let mean = self.history.iter().sum::<f32>() / self.history.len() as f32;
            level += c.surprise_gain * (pe - mean).max(0.0);
        }
        level += c.diversity_weight * targets.diversity();
        level += c.unvisited_weight * targets.unvisited_fraction(now, c.unvisited_after_secs);

        level = level.clamp(c.floor, CEILING);
        level = (level * (1.0 - c.decay_per_tick)).max(c.floor);
        self.level = level;

        if c.history_size > 0 {
            while self.history.len() >= c.history_size {
                self.history.pop_front();
            }
            self.history.push_back(pe);
        }
        level
    }

    /// Current level.
    #[must_use]
    pub fn level(&self) -> f32 {
        self.level
    }

    /// Number of recorded errors.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Export for snapshots.
    #[must_use]
    pub fn state(&self) -> CuriosityState {
        CuriosityState {
            level: self.level,
            history: self.history.iter().copied().collect(),
        }
    }

    /// Restore from a snapshot.
    pub fn restore(&mut self, state: CuriosityState) {
        self.level = state.level.clamp(self.config.floor, CEILING);
        self.history = state.history.into_iter().collect();
        while self.history.len() > self.config.history_size {
            self.history.pop_front();
        }
    }
}

impl Default for CuriosityEstimator {
    fn default() -> Self {
        Self::new(&CuriosityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn level_stays_in_bounds() {
        let mut c = CuriosityEstimator::default();
        let t = ExplorationTargetTracker::default();
        let now = Utc::now();
        for pe in [0.0, 0.01, 5.0, -3.0, f32::NAN, 100.0] {
            let level = c.update(pe, &t, now);
            assert!((0.1..=1.0).contains(&level), "{level}");
        }
    }

    #[test]
    fn zero_error_rests_at_floor() {
        let mut c = CuriosityEstimator::default();
        let t = ExplorationTargetTracker::default();
        assert!((c.update(0.0, &t, Utc::now()) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn saturated_level_relaxes_slightly() {
        let mut c = CuriosityEstimator::default();
        let t = ExplorationTargetTracker::default();
        let level = c.update(10.0, &t, Utc::now());
        assert!(level < 1.0);
        assert!((level - 0.9999).abs() < 1e-5);
    }

    #[test]
    fn surprise_needs_history() {
        let t = ExplorationTargetTracker::default();
        let now = Utc::now();
        let mut c = CuriosityEstimator::default();
        for _ in 0..10 {
            c.update(0.05, &t, now);
        }
        // 2·0.15 + 3·0.1 = 0.6 once the history is long enough.
        let surprised = c.update(0.15, &t, now);
        assert!((surprised - 0.6 * 0.9999).abs() < 1e-4, "{surprised}");

        let mut fresh = CuriosityEstimator::default();
        let plain = fresh.update(0.15, &t, now);
        assert!((plain - 0.3 * 0.9999).abs() < 1e-4, "{plain}");
    }

    #[test]
    fn history_is_bounded_and_restorable() {
        let t = ExplorationTargetTracker::default();
        let now = Utc::now();
        let mut c = CuriosityEstimator::new(&CuriosityConfig {
            history_size: 5,
            ..CuriosityConfig::default()
        });
        for i in 0..20 {
            c.update(i as f32 / 100.0, &t, now);
        }
        assert_eq!(c.history_len(), 5);
        let state = c.state();
        let mut restored = CuriosityEstimator::new(&CuriosityConfig {
            history_size: 5,
            ..CuriosityConfig::default()
        });
        restored.restore(state.clone());
        assert_eq!(restored.state(), state);
    }
}
