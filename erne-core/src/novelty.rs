//! Familiarity-over-time novelty model.
//!
//! Each (modality, bucket) pair carries a familiarity that grows
//! asymptotically toward 1 with every encounter:
//!
//!   familiarity ← familiarity + gain · (1 − familiarity)
//!
//! and a staleness boost that recovers some novelty when a bucket has not
//! been seen for a while:
//!
//!   staleness = 1 − e^(−Δt / τ)
//!   novelty   = clamp((1 − familiarity) · (1 + 0.5 · staleness), 0, 1)
//!
//! A bucket seen for the first time has novelty 1.0. Rapid repeats give a
//! strictly decreasing sequence that approaches but never reaches 0.
//!
//! Reference: Berlyne, D. E. (1960). "Conflict, Arousal, and Curiosity."

use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::config::NoveltyConfig;
use crate::hashing::FeatureHasher;
use crate::types::{Modality, Timestamp, seconds_between};

/// Per-bucket familiarity state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoveltyRecord {
    /// How familiar the bucket is, in [0, 1].
    pub familiarity: f32,
    /// Most recent encounter.
    pub last_encountered: Timestamp,
    /// Number of encounters, including the first.
    pub encounters: u64,
}

/// Exportable form of one tracked bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoveltyEntry {
    /// Modality the bucket belongs to.
    pub modality: Modality,
    /// Bucket key.
    pub bucket: u64,
    /// Familiarity state.
    pub record: NoveltyRecord,
}

/// Bounded map of novelty records.
#[derive(Debug)]
pub struct NoveltyTracker {
    records: LruCache<(Modality, u64), NoveltyRecord>,
    hasher: FeatureHasher,
    gain: f32,
    time_constant_secs: f64,
}

impl NoveltyTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new(config: &NoveltyConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_buckets).unwrap_or(NonZeroUsize::MIN);
        Self {
            records: LruCache::new(capacity),
            hasher: FeatureHasher::from_config(config),
            gain: config.familiarity_gain.clamp(0.0, 1.0),
            time_constant_secs: config.time_constant_secs.max(f64::EPSILON),
        }
    }

    /// Bucket key a feature slice falls into.
    #[must_use]
    pub fn bucket_of(&self, features: &[f32]) -> u64 {
        self.hasher.bucket(features)
    }

    /// Register an encounter with `features` and return its novelty.
    pub fn novelty_of(&mut self, modality: Modality, features: &[f32], now: Timestamp) -> f32 {
        let bucket = self.bucket_of(features);
        self.encounter(modality, bucket, now)
    }

    /// Register an encounter with an already hashed bucket.
    pub fn encounter(&mut self, modality: Modality, bucket: u64, now: Timestamp) -> f32 {
        let key = (modality, bucket);
        let Some(record) = self.records.get_mut(&key) else {
            self.records.put(
                key,
                NoveltyRecord {
                    familiarity: 0.0,
                    last_encountered: now,
                    encounters: 1,
                },
            );
            return 1.0;
        };

        let elapsed = seconds_between(record.last_encountered, now);
        let staleness = 1.0 - (-elapsed / self.time_constant_secs).exp();

        record.familiarity += self.gain * (1.0 - record.familiarity);
        record.familiarity = record.familiarity.clamp(0.0, 1.0);
        record.last_encountered = now;
        record.encounters += 1;

        #[allow(clippy::cast_possible_truncation)]
        let boost = 1.0 + 0.5 * staleness as f32;
        ((1.0 - record.familiarity) * boost).clamp(0.0, 1.0)
    }

    /// Look at a bucket without counting an encounter.
    #[must_use]
    pub fn peek(&self, modality: Modality, bucket: u64) -> Option<&NoveltyRecord> {
        self.records.peek(&(modality, bucket))
    }

    /// Number of tracked buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no bucket has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Export every record, least recently encountered first.
    #[must_use]
    pub fn export(&self) -> Vec<NoveltyEntry> {
        let mut entries: Vec<NoveltyEntry> = self
            .records
            .iter()
            .map(|(&(modality, bucket), record)| NoveltyEntry {
                modality,
                bucket,
                record: *record,
            })
            .collect();
        entries.reverse();
        entries
    }

    /// Replace all records with `entries` (as produced by [`Self::export`]).
    pub fn import(&mut self, entries: Vec<NoveltyEntry>) {
        self.records.clear();
        for entry in entries {
            self.records.put((entry.modality, entry.bucket), entry.record);
        }
    }
}

impl Default for NoveltyTracker {
    fn default() -> Self {
        Self::new(&NoveltyConfig::default())
    }
}
