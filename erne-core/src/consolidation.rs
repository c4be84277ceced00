//! Consolidation: turning repeated experiences into semantic memories.
//!
//! Two paths produce semantic memories:
//!   - **Periodic**: every pass clusters the experiences stored since the
//!     previous pass. A seed gathers every unprocessed peer with sensory
//!     cosine similarity above the threshold; clusters of at least
//!     `min_cluster_size` become one semantic memory and their members are
//!     marked processed for the rest of the pass.
//!   - **Immediate**: when a newly stored experience closely matches at
//!     least two recent ones, the pattern is consolidated synchronously, or
//!     an existing matching semantic memory is reinforced.
//!
//! Experiences already referenced by a semantic memory are not clustered
//! again. The semantic set is capacity-bounded; the weakest go first.
//!
//! Grounded in: Stickgold, R. & Walker, M.P. (2013). "Sleep-Dependent Memory Consolidation."

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::ConsolidationConfig;
use crate::memory::{Experience, SemanticKind, SemanticMemory};
use crate::types::{Emotion, ExperienceId, FeatureVector, SemanticId, Timestamp};

/// Result of an immediate consolidation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsolidationOutcome {
    /// A new semantic memory was created.
    NewSemantic(SemanticId),
    /// An existing semantic memory absorbed the new experience.
    Reinforced(SemanticId),
    /// Nothing happened.
    NoConsolidation {
        /// Why not.
        reason: String,
    },
}

/// Summary of one periodic pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    /// Experiences inside the window and not yet consolidated.
    pub scanned: usize,
    /// Semantic memories created.
    pub created: Vec<SemanticId>,
    /// Semantic memories evicted for capacity.
    pub evicted: usize,
}

/// Owns the semantic memory set.
#[derive(Debug, Clone)]
pub struct ConsolidationEngine {
    config: ConsolidationConfig,
    semantic: Vec<SemanticMemory>,
}

impl ConsolidationEngine {
    /// Create an engine with no semantic memories.
    #[must_use]
    pub fn new(config: &ConsolidationConfig) -> Self {
        Self {
            config: config.clone(),
            semantic: Vec::new(),
        }
    }

    /// Cluster the experiences with `since < timestamp <= now` (all of them
    /// when `since` is `None`).
    pub fn consolidate_window(
        &mut self,
        experiences: &[Experience],
        since: Option<Timestamp>,
        now: Timestamp,
    ) -> ConsolidationReport {
        let referenced: HashSet<ExperienceId> = self
            .semantic
            .iter()
            .flat_map(|s| s.associations.iter().copied())
            .collect();
        let window: Vec<&Experience> = experiences
            .iter()
            .filter(|e| since.is_none_or(|s| e.timestamp > s) && e.timestamp <= now)
            .filter(|e| !referenced.contains(&e.id))
            .collect();

        let mut report = ConsolidationReport {
            scanned: window.len(),
            ..ConsolidationReport::default()
        };
        let mut processed = vec![false; window.len()];

        for seed in 0..window.len() {
            if processed[seed] {
                continue;
            }
            let mut cluster = vec![seed];
            for peer in (seed + 1)..window.len() {
                if !processed[peer]
                    && window[seed].similarity(window[peer]) > self.config.similarity_threshold
                {
                    cluster.push(peer);
                }
            }
            if cluster.len() < self.config.min_cluster_size {
                continue;
            }
            for &i in &cluster {
                processed[i] = true;
            }
            let members: Vec<&Experience> = cluster.iter().map(|&i| window[i]).collect();
            let memory = semantic_from(SemanticKind::Pattern, &members, now);
            report.created.push(memory.id);
            self.semantic.push(memory);
        }

        report.evicted = self.enforce_capacity();
        report
    }

    /// Consolidate `new` with the recent `matches` it resembles.
    ///
    /// Fewer than `min_matches` matches is a no-op. A semantic memory whose
    /// features are closer than `reinforce_similarity` absorbs the
    /// experiences; otherwise a new immediate-pattern memory is created.
    pub fn consolidate_immediate(
        &mut self,
        new: &Experience,
        matches: &[&Experience],
        min_matches: usize,
        now: Timestamp,
    ) -> ConsolidationOutcome {
        if matches.len() < min_matches {
            return ConsolidationOutcome::NoConsolidation {
                reason: format!("{} similar experiences, need {min_matches}", matches.len()),
            };
        }

        if let Some(index) = self.closest(&new.features, self.config.reinforce_similarity) {
            let memory = &mut self.semantic[index];
            for e in matches.iter().rev() {
                memory.reinforce(e, now);
            }
            memory.reinforce(new, now);
            return ConsolidationOutcome::Reinforced(memory.id);
        }

        // `matches` is newest first; associations read oldest first.
        let mut members: Vec<&Experience> = matches.iter().rev().copied().collect();
        members.push(new);
        let memory = semantic_from(SemanticKind::ImmediatePattern, &members, now);
        let id = memory.id;
        self.semantic.push(memory);
        self.enforce_capacity();
        ConsolidationOutcome::NewSemantic(id)
    }

    fn closest(&self, features: &FeatureVector, threshold: f32) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (i, s) in self.semantic.iter().enumerate() {
            let sim = s.features.cosine_similarity(features);
            if sim > threshold && best.is_none_or(|(_, b)| sim > b) {
                best = Some((i, sim));
            }
        }
        best.map(|(i, _)| i)
    }

    /// Evict the weakest semantic memories (oldest first among equals) until
    /// the set fits. Returns how many were evicted.
    fn enforce_capacity(&mut self) -> usize {
        let mut evicted = 0;
        while self.semantic.len() > self.config.max_semantic {
            let weakest = self
                .semantic
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    a.strength
                        .partial_cmp(&b.strength)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.created_at.cmp(&b.created_at))
                })
                .map(|(i, _)| i);
            let Some(index) = weakest else { break };
            self.semantic.remove(index);
            evicted += 1;
        }
        evicted
    }

    /// The `limit` semantic memories most similar to `features`, best first.
    /// Each returned memory is marked accessed.
    pub fn recall(
        &mut self,
        features: &FeatureVector,
        limit: usize,
        now: Timestamp,
    ) -> Vec<SemanticMemory> {
        let mut ranked: Vec<(usize, f32)> = self
            .semantic
            .iter()
            .enumerate()
            .map(|(i, s)| (i, s.features.cosine_similarity(features)))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked
            .into_iter()
            .take(limit)
            .map(|(i, _)| {
                let memory = &mut self.semantic[i];
                memory.touch(now);
                memory.clone()
            })
            .collect()
    }

    /// All semantic memories, in creation order.
    #[must_use]
    pub fn memories(&self) -> &[SemanticMemory] {
        &self.semantic
    }

    /// Number of semantic memories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.semantic.len()
    }

    /// Whether there are none.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.semantic.is_empty()
    }

    /// Replace the set (snapshot restore).
    pub fn replace_all(&mut self, memories: Vec<SemanticMemory>) {
        self.semantic = memories;
        self.enforce_capacity();
    }
}

impl Default for ConsolidationEngine {
    fn default() -> Self {
        Self::new(&ConsolidationConfig::default())
    }
}

fn semantic_from(kind: SemanticKind, members: &[&Experience], now: Timestamp) -> SemanticMemory {
    let features = FeatureVector::mean(members.iter().map(|e| &e.features));
    #[allow(clippy::cast_precision_loss)]
    let n = members.len().max(1) as f32;
    let mean_emotion = Emotion::new(
        members.iter().map(|e| e.emotion.valence).sum::<f32>() / n,
        members.iter().map(|e| e.emotion.arousal).sum::<f32>() / n,
    );
    let associations = members.iter().map(|e| e.id).collect();
    SemanticMemory::new(kind, features, associations, mean_emotion, now)
}
