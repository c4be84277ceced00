//! Feature quantization for novelty buckets.
//!
//! A feature slice is reduced to a coarse 64-bit key: the leading
//! `hash_dimensions` components are multiplied by `quantization_scale`,
//! rounded to integers and folded through FNV-1a. With the default scale of
//! 10 two slices land in the same bucket when their leading components agree
//! to one decimal place. Distinct slices can collide; novelty treats them as
//! one region.

use crate::config::NoveltyConfig;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Quantizing hasher for feature slices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureHasher {
    dimensions: usize,
    scale: f32,
}

impl FeatureHasher {
    /// Create a hasher over the first `dimensions` components at `scale`.
    #[must_use]
    pub fn new(dimensions: usize, scale: f32) -> Self {
        Self { dimensions, scale }
    }

    /// Build a hasher from the novelty section of the configuration.
    #[must_use]
    pub fn from_config(config: &NoveltyConfig) -> Self {
        Self::new(config.hash_dimensions, config.quantization_scale)
    }

    /// Bucket key for `features`. Slices shorter than the hashed width are
    /// hashed over what they have, and the length is mixed in so `[0.0]`
    /// and `[]` differ.
    #[must_use]
    pub fn bucket(&self, features: &[f32]) -> u64 {
        let take = features.len().min(self.dimensions);
        let mut hash = fnv1a(FNV_OFFSET, &(take as u64).to_le_bytes());
        for &x in &features[..take] {
            hash = fnv1a(hash, &self.quantize(x).to_le_bytes());
        }
        hash
    }

    /// Integer level a single component falls into.
    #[must_use]
    pub fn quantize(&self, value: f32) -> i64 {
        let scaled = (f64::from(value) * f64::from(self.scale)).round();
        if scaled.is_nan() {
            0
        } else {
            // `as` saturates at the i64 bounds.
            scaled as i64
        }
    }
}

impl Default for FeatureHasher {
    fn default() -> Self {
        Self::from_config(&NoveltyConfig::default())
    }
}

fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_first_decimal_shares_bucket() {
        let h = FeatureHasher::default();
        assert_eq!(h.bucket(&[0.51, 0.2, 0.3]), h.bucket(&[0.54, 0.2, 0.3]));
        assert_ne!(h.bucket(&[0.51, 0.2, 0.3]), h.bucket(&[0.71, 0.2, 0.3]));
    }

    #[test]
    fn only_leading_dimensions_participate() {
        let h = FeatureHasher::new(2, 10.0);
        assert_eq!(h.bucket(&[0.1, 0.2, 0.9]), h.bucket(&[0.1, 0.2, -0.9]));
    }

    #[test]
    fn length_is_mixed_in() {
        let h = FeatureHasher::default();
        assert_ne!(h.bucket(&[]), h.bucket(&[0.0]));
    }

    #[test]
    fn quantize_handles_non_finite() {
        let h = FeatureHasher::default();
        assert_eq!(h.quantize(f32::NAN), 0);
        assert_eq!(h.quantize(f32::INFINITY), i64::MAX);
        assert_eq!(h.quantize(-0.04), 0);
    }
}
