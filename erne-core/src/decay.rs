//! Exponential strength decay.
//!
//! Retention over an elapsed interval follows
//!   R = e^(−λ·Δh)
//! where λ is the per-hour decay rate and Δh the hours since decay was last
//! applied. Each pass multiplies strength by R and floors it:
//!
//!   strength ← max(floor, strength · R)   (never raised)
//!
//! Measuring Δh from the previous pass makes the total decay over any tick
//! schedule equal to e^(−λ·total_hours), and a second pass with no elapsed
//! time leaves strength unchanged.
//!
//! Reference: Ebbinghaus, H. (1885). "Memory: A Contribution to Experimental Psychology."

use serde::{Deserialize, Serialize};

use crate::config::DecayConfig;
use crate::memory::Experience;
use crate::types::{Timestamp, hours_between};

/// Retention factor `e^(−rate · hours)` in (0, 1].
#[must_use]
pub fn retention(rate_per_hour: f64, hours: f64) -> f64 {
    if rate_per_hour <= 0.0 || hours <= 0.0 {
        return 1.0;
    }
    (-rate_per_hour * hours).exp()
}

/// Strength after `hours` of decay, floored and never above `strength`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn decayed_strength(strength: f32, rate_per_hour: f64, hours: f64, floor: f32) -> f32 {
    let decayed = (f64::from(strength) * retention(rate_per_hour, hours)) as f32;
    decayed.max(floor).min(strength)
}

/// Outcome of one decay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DecayReport {
    /// Experiences visited.
    pub visited: usize,
    /// Experiences whose strength went down.
    pub weakened: usize,
    /// Experiences resting at the floor after the pass.
    pub at_floor: usize,
}

/// Applies decay passes according to a [`DecayConfig`].
#[derive(Debug, Clone)]
pub struct DecayEngine {
    rate_per_hour: f64,
    floor: f32,
}

impl DecayEngine {
    /// Create an engine from config.
    #[must_use]
    pub fn new(config: &DecayConfig) -> Self {
        Self {
            rate_per_hour: config.rate_per_hour,
            floor: config.min_strength,
        }
    }

    /// Decay every experience for the time elapsed since its last pass.
    pub fn apply(&self, experiences: &mut [Experience], now: Timestamp) -> DecayReport {
        let mut report = DecayReport {
            visited: experiences.len(),
            ..DecayReport::default()
        };
        for e in experiences.iter_mut() {
            let hours = hours_between(e.last_decayed, now);
            if hours > 0.0 {
                let next = decayed_strength(e.strength, self.rate_per_hour, hours, self.floor);
                if next < e.strength {
                    report.weakened += 1;
                }
                e.strength = next;
                e.last_decayed = now;
            }
            if e.strength <= self.floor {
                report.at_floor += 1;
            }
        }
        report
    }
}

impl Default for DecayEngine {
    fn default() -> Self {
        Self::new(&DecayConfig::default())
    }
}
