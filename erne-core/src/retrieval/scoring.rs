//! Per-factor scoring functions for recall ranking.
//!
//!   Strength(e)   = current strength
//!   Recency(e)    = exp(−age_days / τ)           (τ = 7 days)
//!   Frequency(e)  = min(recall_count / 10, 1)
//!   Similarity(e) = max(0, cos(probe, features))  (probe given)
//!   Emotional(e)  = 1 − mean(|Δv|, |Δa|)          (query emotion given)
//!   Attention(e)  = 1 if target ids match else 0  (both have targets)
//!
//! Each factor is multiplied by its weight. Factors whose inputs are absent
//! are left out of the breakdown rather than scored as zero.

use crate::config::RecallConfig;
use crate::memory::Experience;
use crate::retrieval::{RecallQuery, ScoreBreakdown};
use crate::types::{Timestamp, days_between};

/// Compute the weighted breakdown for one experience.
#[must_use]
pub fn compute_breakdown(
    experience: &Experience,
    query: &RecallQuery,
    now: Timestamp,
    config: &RecallConfig,
) -> ScoreBreakdown {
    let w = &config.weights;

    let similarity = query
        .sensory
        .as_ref()
        .map(|probe| w.similarity * probe.cosine_similarity(&experience.features).max(0.0));
    let emotional = query
        .emotion
        .as_ref()
        .map(|emotion| w.emotional * emotion.similarity(&experience.emotion));
    let attention = match (query.attention_target, experience.attention_target()) {
        (Some(wanted), Some(held)) => Some(w.attention * if wanted == held { 1.0 } else { 0.0 }),
        _ => None,
    };

    ScoreBreakdown {
        strength: w.strength * experience.strength,
        recency: w.recency * recency_score(experience, now, config.recency_days),
        frequency: w.frequency * frequency_score(experience, config.frequency_saturation),
        similarity,
        emotional,
        attention,
    }
}

/// `exp(−age / τ)` with age and τ in days.
#[allow(clippy::cast_possible_truncation)]
fn recency_score(experience: &Experience, now: Timestamp, tau_days: f64) -> f32 {
    let age = days_between(experience.timestamp, now);
    (-age / tau_days.max(f64::EPSILON)).exp() as f32
}

#[allow(clippy::cast_precision_loss)]
fn frequency_score(experience: &Experience, saturation: u32) -> f32 {
    if saturation == 0 {
        return 1.0;
    }
    (experience.recall_count as f32 / saturation as f32).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ExperienceInput, NeuralOutput, SensoryInput};
    use crate::types::{Emotion, FeatureVector};
    use chrono::{Duration, Utc};

    fn experience(at: Timestamp) -> Experience {
        Experience::from_input(
            ExperienceInput::new(
                SensoryInput {
                    visual: vec![1.0, 0.0],
                    ..SensoryInput::default()
                },
                NeuralOutput::with_error(0.0),
                Emotion::new(0.5, 0.5),
                0.0,
            ),
            at,
        )
    }

    #[test]
    fn bare_query_uses_three_factors() {
        let now = Utc::now();
        let b = compute_breakdown(&experience(now), &RecallQuery::new(), now, &RecallConfig::default());
        assert_eq!(b.active_factors(), 3);
        assert!((b.recency - 0.2).abs() < 1e-6);
        assert!(b.frequency.abs() < 1e-6);
        assert!(b.similarity.is_none() && b.emotional.is_none() && b.attention.is_none());
    }

    #[test]
    fn recency_follows_seven_day_curve() {
        let now = Utc::now();
        let e = experience(now);
        let b = compute_breakdown(&e, &RecallQuery::new(), now + Duration::days(7), &RecallConfig::default());
        assert!((b.recency - 0.2 * (-1.0_f32).exp()).abs() < 1e-5);
    }

    #[test]
    fn negative_similarity_is_floored() {
        let now = Utc::now();
        let query = RecallQuery::new().with_sensory(FeatureVector(vec![-1.0, 0.0]));
        let b = compute_breakdown(&experience(now), &query, now, &RecallConfig::default());
        assert_eq!(b.similarity, Some(0.0));
    }

    #[test]
    fn attention_factor_needs_both_targets() {
        let now = Utc::now();
        let query = RecallQuery::new().with_attention_target(crate::types::TargetId {
            modality: crate::types::Modality::Visual,
            bucket: 1,
        });
        let b = compute_breakdown(&experience(now), &query, now, &RecallConfig::default());
        assert!(b.attention.is_none());
    }
}
