//! The engine façade: one owner for every piece of mutable state.
//!
//! [`MemoryEngine`] is a cheap-to-clone handle. All mutation (perception,
//! store, recall side effects, decay, consolidation, restore) goes through a
//! single write lock, and getters take the read lock, so no caller ever sees
//! a half-applied update. Persistence I/O happens outside the lock on data
//! copied out under it.
//!
//! ```no_run
//! use std::sync::Arc;
//! use erne_core::config::EngineConfig;
//! use erne_core::engine::MemoryEngine;
//! use erne_core::memory::{NeuralOutput, SensoryInput};
//! use erne_core::persistence::MemorySlotStore;
//! use erne_core::scheduler::TokioScheduler;
//! use erne_core::types::Emotion;
//!
//! # async fn run() -> erne_core::error::Result<()> {
//! let engine = MemoryEngine::builder(EngineConfig::default())
//!     .persistence(Arc::new(MemorySlotStore::new()))
//!     .build()?;
//! engine.start(&TokioScheduler::new())?;
//!
//! let sensory = SensoryInput { visual: vec![0.2, 0.8, 0.1], ..SensoryInput::default() };
//! let cycle = engine.process_cycle(sensory, NeuralOutput::with_error(0.4), Emotion::new(0.3, 0.5))?;
//! println!("stored {} at strength {}", cycle.experience.id, cycle.experience.strength);
//!
//! engine.dispose();
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, debug_span, info, warn};

use crate::attention::{Attention, AttentionSelector, ModalityScores};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::consolidation::{ConsolidationEngine, ConsolidationOutcome, ConsolidationReport};
use crate::curiosity::CuriosityEstimator;
use crate::decay::{DecayEngine, DecayReport};
use crate::error::{ErneError, Result};
use crate::exploration::{ExplorationTarget, ExplorationTargetTracker};
use crate::memory::{Experience, ExperienceInput, NeuralOutput, SemanticMemory, SensoryInput};
use crate::metrics::{CounterSnapshot, EngineCounters, spans};
use crate::novelty::NoveltyTracker;
use crate::persistence::{
    EngineSnapshot, PersistenceGateway, SNAPSHOT_VERSION, decode_snapshot, encode_snapshot,
};
use crate::retrieval::{RecallQuery, RecallRanker, ScoredExperience};
use crate::scheduler::{Scheduler, TaskHandle};
use crate::store::{ExperienceStore, reconstruct};
use crate::types::{Emotion, EngineStats, ExperienceId, FeatureVector, TargetId, Timestamp};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// What one perception step produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PerceptionResult {
    /// The attention event, when a modality cleared the threshold.
    pub attention: Option<Attention>,
    /// Novelty of every modality this cycle.
    pub scores: ModalityScores,
    /// Exploration target the attention event merged into.
    pub exploration_target: Option<TargetId>,
    /// Curiosity after folding in the prediction error.
    pub curiosity: f32,
}

/// Perception followed by storage.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    /// The perception step.
    pub perception: PerceptionResult,
    /// The stored experience.
    pub experience: Experience,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct EngineState {
    store: ExperienceStore,
    consolidation: ConsolidationEngine,
    novelty: NoveltyTracker,
    attention: AttentionSelector,
    exploration: ExplorationTargetTracker,
    curiosity: CuriosityEstimator,
    last_decay: Option<Timestamp>,
    last_consolidation: Option<Timestamp>,
}

impl EngineState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            store: ExperienceStore::new(config.store.max_experiences),
            consolidation: ConsolidationEngine::new(&config.consolidation),
            novelty: NoveltyTracker::new(&config.novelty),
            attention: AttentionSelector::new(&config.attention),
            exploration: ExplorationTargetTracker::new(&config.exploration),
            curiosity: CuriosityEstimator::new(&config.curiosity),
            last_decay: None,
            last_consolidation: None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn statistics(&self) -> EngineStats {
        let count = self.store.len();
        let average_strength = if count == 0 {
            0.0
        } else {
            self.store.iter().map(|e| e.strength).sum::<f32>() / count as f32
        };
        EngineStats {
            episodic_count: count,
            semantic_count: self.consolidation.len(),
            average_strength,
            total_recalls: self.store.iter().map(|e| u64::from(e.recall_count)).sum(),
            novelty_buckets: self.novelty.len(),
            exploration_targets: self.exploration.len(),
            attention_history: self.attention.history_len(),
            curiosity_level: self.curiosity.level(),
            last_decay: self.last_decay,
            last_consolidation: self.last_consolidation,
        }
    }

    fn snapshot(&self, full: bool, now: Timestamp) -> EngineSnapshot {
        let statistics = self.statistics();
        if !full {
            return EngineSnapshot {
                version: SNAPSHOT_VERSION,
                saved_at: now,
                full,
                statistics,
                experiences: Vec::new(),
                semantic: Vec::new(),
                novelty: Vec::new(),
                exploration: Vec::new(),
                curiosity: self.curiosity.state(),
                attention_history: Vec::new(),
                last_decay: self.last_decay,
                last_consolidation: self.last_consolidation,
            };
        }
        EngineSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: now,
            full,
            statistics,
            experiences: self.store.as_slice().to_vec(),
            semantic: self.consolidation.memories().to_vec(),
            novelty: self.novelty.export(),
            exploration: self.exploration.targets().to_vec(),
            curiosity: self.curiosity.state(),
            attention_history: self.attention.history(),
            last_decay: self.last_decay,
            last_consolidation: self.last_consolidation,
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    gateway: Option<Arc<dyn PersistenceGateway>>,
    state: RwLock<EngineState>,
    decay: DecayEngine,
    ranker: RecallRanker,
    counters: EngineCounters,
    rng: Mutex<StdRng>,
    tasks: Mutex<Vec<TaskHandle>>,
    dirty: AtomicBool,
    running: AtomicBool,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures and builds a [`MemoryEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    gateway: Option<Arc<dyn PersistenceGateway>>,
}

impl EngineBuilder {
    /// Use `clock` for every timestamp (defaults to [`SystemClock`]).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Persist through `gateway`. Without one, save/flush are local only.
    #[must_use]
    pub fn persistence(mut self, gateway: Arc<dyn PersistenceGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Validate the configuration and build the engine.
    ///
    /// # Errors
    /// Returns [`ErneError::Config`] if the configuration is invalid.
    pub fn build(self) -> Result<MemoryEngine> {
        self.config.validate()?;
        let rng = match self.config.reconstruction.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let config = self.config;
        info!(
            max_experiences = config.store.max_experiences,
            persistence = self.gateway.is_some(),
            format = ?config.persistence.format,
            "ERNE engine created"
        );
        Ok(MemoryEngine {
            inner: Arc::new(EngineInner {
                state: RwLock::new(EngineState::new(&config)),
                decay: DecayEngine::new(&config.decay),
                ranker: RecallRanker::new(&config.recall),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                gateway: self.gateway,
                counters: EngineCounters::new(),
                rng: Mutex::new(rng),
                tasks: Mutex::new(Vec::new()),
                dirty: AtomicBool::new(false),
                running: AtomicBool::new(false),
                config,
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryEngine
// ---------------------------------------------------------------------------

/// Handle to one engine instance. Clones share the same state.
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("episodic", &self.episodic_count())
            .field("semantic", &self.semantic_count())
            .field("running", &self.is_running())
            .field("gateway", &self.inner.gateway)
            .finish_non_exhaustive()
    }
}

impl MemoryEngine {
    /// Start building an engine.
    #[must_use]
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            clock: None,
            gateway: None,
        }
    }

    /// An engine with the system clock and no persistence.
    ///
    /// # Errors
    /// Returns [`ErneError::Config`] if the configuration is invalid.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// The configuration the engine was built with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn now(&self) -> Timestamp {
        self.inner.clock.now()
    }

    fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::Release);
    }

    // -- inbound -----------------------------------------------------------

    /// Score novelty per modality, select attention, update the exploration
    /// targets and fold `prediction_error` into curiosity.
    ///
    /// # Errors
    /// Returns [`ErneError::InvalidInput`] for empty or non-finite sensory
    /// input. Nothing is mutated in that case.
    pub fn perceive(&self, sensory: &SensoryInput, prediction_error: f32) -> Result<PerceptionResult> {
        if sensory.is_empty() {
            return Err(ErneError::invalid("sensory input has no features"));
        }
        if !sensory.is_finite() {
            return Err(ErneError::invalid("sensory input contains non-finite values"));
        }
        let _span = debug_span!(spans::PERCEIVE).entered();
        let mut guard = self.inner.state.write();
        let now = self.now();
        let state = &mut *guard;
        let before = state.curiosity.level();
        let perception = state.attention.select(sensory, before, &mut state.novelty, now);
        let exploration_target = perception
            .attention
            .as_ref()
            .map(|attention| state.exploration.observe(attention, now));
        let curiosity = state.curiosity.update(prediction_error, &state.exploration, now);
        drop(guard);

        if perception.attention.is_some() {
            EngineCounters::bump(&self.inner.counters.attention_events);
        }
        self.mark_dirty();
        debug!(
            attended = ?perception.attention.as_ref().map(|a| a.target.id),
            curiosity,
            "Perception processed"
        );
        Ok(PerceptionResult {
            attention: perception.attention,
            scores: perception.scores,
            exploration_target,
            curiosity,
        })
    }

    /// [`Self::perceive`] for one combined feature vector, split into
    /// modalities with the configured `attention.layout`.
    ///
    /// # Errors
    /// Returns [`ErneError::InvalidInput`] when no modality receives a
    /// feature or a value is non-finite.
    pub fn perceive_combined(&self, combined: &[f32], prediction_error: f32) -> Result<PerceptionResult> {
        let sensory = SensoryInput::from_combined(combined, &self.inner.config.attention.layout);
        self.perceive(&sensory, prediction_error)
    }

    /// [`Self::perceive`] followed by [`Self::store_experience`] with the
    /// resulting attention and curiosity.
    ///
    /// # Errors
    /// Returns [`ErneError::InvalidInput`] for payloads that fail validation.
    pub fn process_cycle(
        &self,
        sensory: SensoryInput,
        neural_output: NeuralOutput,
        emotion: Emotion,
    ) -> Result<CycleOutcome> {
        let perception = self.perceive(&sensory, neural_output.prediction_error)?;
        let mut input = ExperienceInput::new(sensory, neural_output, emotion, perception.curiosity);
        input.attention.clone_from(&perception.attention);
        let experience = self.store_experience(input)?;
        Ok(CycleOutcome {
            perception,
            experience,
        })
    }

    /// Store one experience.
    ///
    /// Past capacity the weakest experiences are pruned. When enough recent
    /// experiences closely match the new one, an immediate pattern is
    /// consolidated. With write-through enabled the experience is appended
    /// to the persistence log; log failures are logged and counted.
    ///
    /// # Errors
    /// Returns [`ErneError::InvalidInput`] if the payload fails validation.
    pub fn store_experience(&self, input: ExperienceInput) -> Result<Experience> {
        if let Err(e) = input.validate() {
            EngineCounters::bump(&self.inner.counters.experiences_rejected);
            warn!(error = %e, "Rejected experience payload");
            return Err(e);
        }
        let _span = debug_span!(spans::STORE).entered();
        let cfg = &self.inner.config.store;

        let mut guard = self.inner.state.write();
        let now = self.now();
        let experience = Experience::from_input(input, now);
        let id = experience.id;
        let state = &mut *guard;
        let pruned = state.store.insert(experience.clone());
        let kept = !pruned.contains(&id);

        let mut outcome = None;
        if kept && cfg.immediate_consolidation {
            let matches = state.store.similar_recent(
                &experience.features,
                cfg.immediate_similarity,
                cfg.immediate_scan_limit,
                Some(id),
            );
            if matches.len() >= cfg.immediate_min_matches {
                let wanted: HashSet<ExperienceId> = matches.into_iter().collect();
                let refs: Vec<&Experience> = state
                    .store
                    .iter()
                    .rev()
                    .filter(|e| wanted.contains(&e.id))
                    .collect();
                outcome = Some(state.consolidation.consolidate_immediate(
                    &experience,
                    &refs,
                    cfg.immediate_min_matches,
                    now,
                ));
            }
        }
        drop(guard);
        self.mark_dirty();

        let counters = &self.inner.counters;
        EngineCounters::bump(&counters.experiences_stored);
        EngineCounters::add(&counters.experiences_pruned, pruned.len() as u64);
        match &outcome {
            Some(ConsolidationOutcome::NewSemantic(semantic)) => {
                EngineCounters::bump(&counters.semantic_created);
                debug!(semantic = %semantic, "Immediate pattern consolidated");
            }
            Some(ConsolidationOutcome::Reinforced(semantic)) => {
                EngineCounters::bump(&counters.semantic_reinforced);
                debug!(semantic = %semantic, "Semantic memory reinforced");
            }
            Some(ConsolidationOutcome::NoConsolidation { .. }) | None => {}
        }
        if !pruned.is_empty() {
            debug!(pruned = pruned.len(), "Pruned weakest experiences");
        }

        if self.inner.config.persistence.write_through {
            if let Some(gateway) = &self.inner.gateway {
                if kept {
                    self.record_failure(gateway.append_experience(&experience), "append experience");
                }
                let stale: Vec<ExperienceId> = pruned.into_iter().filter(|p| *p != id).collect();
                if !stale.is_empty() {
                    self.record_failure(
                        gateway.remove_experiences(&stale).map(|_| ()),
                        "remove pruned experiences",
                    );
                }
            }
        }

        debug!(id = %id, strength = experience.strength, "Experience stored");
        Ok(experience)
    }

    fn record_failure(&self, result: Result<()>, what: &str) {
        if let Err(e) = result {
            EngineCounters::bump(&self.inner.counters.persistence_failures);
            warn!(error = %e, operation = what, "Persistence write failed");
        }
    }

    // -- queries -----------------------------------------------------------

    /// The best `limit` experiences for `query`. Returned experiences are
    /// boosted and their recall counters bumped.
    #[must_use]
    pub fn recall_memories(&self, query: &RecallQuery, limit: usize) -> Vec<Experience> {
        self.recall_scored(query, limit)
            .into_iter()
            .map(|s| s.experience)
            .collect()
    }

    /// [`Self::recall_memories`] with `recall.default_limit`.
    #[must_use]
    pub fn recall_default(&self, query: &RecallQuery) -> Vec<Experience> {
        self.recall_memories(query, self.inner.config.recall.default_limit)
    }

    /// Like [`Self::recall_memories`] but with scores and per-factor
    /// breakdowns.
    #[must_use]
    pub fn recall_scored(&self, query: &RecallQuery, limit: usize) -> Vec<ScoredExperience> {
        if limit == 0 {
            return Vec::new();
        }
        let _span = debug_span!(spans::RECALL).entered();
        let start = Instant::now();
        let boost = self.inner.config.recall.recall_boost;

        let mut state = self.inner.state.write();
        let now = self.now();
        let ranked = self.inner.ranker.rank(state.store.as_slice(), query, now, limit);
        let experiences = state.store.as_mut_slice();
        let results: Vec<ScoredExperience> = ranked
            .into_iter()
            .map(|r| {
                let experience = &mut experiences[r.index];
                experience.record_recall(now, boost);
                ScoredExperience {
                    experience: experience.clone(),
                    score: r.score.value(),
                    breakdown: r.breakdown,
                }
            })
            .collect();
        drop(state);

        if !results.is_empty() {
            self.mark_dirty();
        }
        EngineCounters::add(&self.inner.counters.recalls_served, results.len() as u64);
        debug!(
            returned = results.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Recall served"
        );
        results
    }

    /// The `limit` semantic memories closest to `features`.
    #[must_use]
    pub fn recall_semantic(&self, features: &FeatureVector, limit: usize) -> Vec<SemanticMemory> {
        let now = self.now();
        let results = self.inner.state.write().consolidation.recall(features, limit, now);
        if !results.is_empty() {
            self.mark_dirty();
        }
        results
    }

    /// A noisy copy of a stored experience; the original is untouched.
    #[must_use]
    pub fn reconstruct_memory(&self, id: &ExperienceId) -> Option<Experience> {
        let now = self.now();
        let original = self.inner.state.read().store.get(id).cloned()?;
        let mut rng = self.inner.rng.lock();
        Some(reconstruct(
            &original,
            now,
            &self.inner.config.reconstruction,
            &mut *rng,
        ))
    }

    /// The highest-scoring exploration target, if any are tracked.
    #[must_use]
    pub fn generate_exploration_goal(&self) -> Option<ExplorationTarget> {
        let now = self.now();
        self.inner.state.read().exploration.generate_goal(now)
    }

    /// Record a visit to an exploration target. Returns whether it exists.
    pub fn mark_target_visited(&self, id: TargetId) -> bool {
        let now = self.now();
        let found = self.inner.state.write().exploration.mark_visited(id, now);
        if found {
            self.mark_dirty();
        }
        found
    }

    /// Set how reachable a target is (clamped to [0, 1]). Returns whether it
    /// exists.
    pub fn set_target_accessibility(&self, id: TargetId, accessibility: f32) -> bool {
        let found = self
            .inner
            .state
            .write()
            .exploration
            .set_accessibility(id, accessibility);
        if found {
            self.mark_dirty();
        }
        found
    }

    /// Tracked exploration targets.
    #[must_use]
    pub fn exploration_targets(&self) -> Vec<ExplorationTarget> {
        self.inner.state.read().exploration.targets().to_vec()
    }

    /// Stored experience count.
    #[must_use]
    pub fn episodic_count(&self) -> usize {
        self.inner.state.read().store.len()
    }

    /// Semantic memory count.
    #[must_use]
    pub fn semantic_count(&self) -> usize {
        self.inner.state.read().consolidation.len()
    }

    /// Every stored experience, oldest first.
    #[must_use]
    pub fn all_experiences(&self) -> Vec<Experience> {
        self.inner.state.read().store.as_slice().to_vec()
    }

    /// Every semantic memory, in creation order.
    #[must_use]
    pub fn semantic_memories(&self) -> Vec<SemanticMemory> {
        self.inner.state.read().consolidation.memories().to_vec()
    }

    /// One experience by id.
    #[must_use]
    pub fn experience(&self, id: &ExperienceId) -> Option<Experience> {
        self.inner.state.read().store.get(id).cloned()
    }

    /// Remove an experience. Returns whether it existed.
    pub fn delete_experience(&self, id: &ExperienceId) -> bool {
        let removed = self.inner.state.write().store.remove(id).is_some();
        if removed {
            self.mark_dirty();
            if self.inner.config.persistence.write_through {
                if let Some(gateway) = &self.inner.gateway {
                    self.record_failure(
                        gateway.remove_experiences(&[*id]).map(|_| ()),
                        "remove deleted experience",
                    );
                }
            }
        }
        removed
    }

    /// Engine-wide statistics.
    #[must_use]
    pub fn statistics(&self) -> EngineStats {
        self.inner.state.read().statistics()
    }

    /// Event counters.
    #[must_use]
    pub fn counters(&self) -> CounterSnapshot {
        self.inner.counters.snapshot()
    }

    /// Current curiosity level.
    #[must_use]
    pub fn curiosity_level(&self) -> f32 {
        self.inner.state.read().curiosity.level()
    }

    /// Recent attention events, oldest first.
    #[must_use]
    pub fn attention_history(&self) -> Vec<Attention> {
        self.inner.state.read().attention.history()
    }

    // -- maintenance -------------------------------------------------------

    /// Decay every experience for the time since its last pass.
    pub fn run_decay(&self) -> DecayReport {
        let _span = debug_span!(spans::DECAY_PASS).entered();
        let mut state = self.inner.state.write();
        let now = self.now();
        let report = self.inner.decay.apply(state.store.as_mut_slice(), now);
        state.last_decay = Some(now);
        drop(state);

        EngineCounters::bump(&self.inner.counters.decay_passes);
        if report.weakened > 0 {
            self.mark_dirty();
        }
        debug!(
            visited = report.visited,
            weakened = report.weakened,
            at_floor = report.at_floor,
            "Decay pass complete"
        );
        report
    }

    /// Cluster the experiences stored since the previous pass.
    pub fn run_consolidation(&self) -> ConsolidationReport {
        let _span = debug_span!(spans::CONSOLIDATION).entered();
        let mut guard = self.inner.state.write();
        let now = self.now();
        let state = &mut *guard;
        let since = state.last_consolidation;
        let report = state
            .consolidation
            .consolidate_window(state.store.as_slice(), since, now);
        state.last_consolidation = Some(now);
        drop(guard);

        let counters = &self.inner.counters;
        EngineCounters::bump(&counters.consolidation_passes);
        EngineCounters::add(&counters.semantic_created, report.created.len() as u64);
        EngineCounters::add(&counters.semantic_evicted, report.evicted as u64);
        if !report.created.is_empty() {
            self.mark_dirty();
        }
        debug!(
            scanned = report.scanned,
            created = report.created.len(),
            evicted = report.evicted,
            "Consolidation pass complete"
        );
        report
    }

    // -- persistence -------------------------------------------------------

    /// Take a snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        let now = self.now();
        let full = self.inner.config.persistence.full_snapshot;
        self.inner.state.read().snapshot(full, now)
    }

    fn encode_current(&self) -> Result<Vec<u8>> {
        encode_snapshot(&self.snapshot(), self.inner.config.persistence.format)
    }

    /// Encode the current state and write it to `slot`.
    ///
    /// The blob is returned even when the gateway write fails; the failure
    /// is logged and counted.
    ///
    /// # Errors
    /// Returns [`ErneError::Serialization`] if encoding fails.
    pub fn save_state(&self, slot: &str) -> Result<Vec<u8>> {
        let _span = debug_span!(spans::PERSIST_SAVE, slot).entered();
        let start = Instant::now();
        let blob = self.encode_current()?;
        if let Some(gateway) = &self.inner.gateway {
            match gateway.save_slot(slot, &blob) {
                Ok(()) => {
                    EngineCounters::bump(&self.inner.counters.flushes_completed);
                    info!(
                        slot,
                        bytes = blob.len(),
                        elapsed_us = start.elapsed().as_micros(),
                        "Engine state saved"
                    );
                }
                Err(e) => self.record_failure(Err(e), "save slot"),
            }
        }
        Ok(blob)
    }

    /// Raw blob stored under `slot`. Gateway failures are logged and read as
    /// `None`.
    #[must_use]
    pub fn load_state(&self, slot: &str) -> Option<Vec<u8>> {
        let _span = debug_span!(spans::PERSIST_LOAD, slot).entered();
        let gateway = self.inner.gateway.as_ref()?;
        match gateway.load_slot(slot) {
            Ok(blob) => blob,
            Err(e) => {
                EngineCounters::bump(&self.inner.counters.persistence_failures);
                warn!(slot, error = %e, "Persistence read failed");
                None
            }
        }
    }

    /// Load `slot` and replace the engine state with it.
    ///
    /// Returns `false` if the slot is empty or holds a statistics-only
    /// snapshot.
    ///
    /// # Errors
    /// Returns [`ErneError::Serialization`] if the blob cannot be decoded.
    pub fn restore_state(&self, slot: &str) -> Result<bool> {
        let Some(blob) = self.load_state(slot) else {
            return Ok(false);
        };
        let snapshot = decode_snapshot(&blob, self.inner.config.persistence.format)?;
        Ok(self.apply_snapshot(snapshot))
    }

    /// Replace the engine state with `snapshot`. Returns `false` (and leaves
    /// the state alone) for statistics-only snapshots.
    pub fn apply_snapshot(&self, snapshot: EngineSnapshot) -> bool {
        if !snapshot.full {
            warn!("Snapshot holds statistics only, nothing to restore");
            return false;
        }
        let episodic = snapshot.experiences.len();
        let mut guard = self.inner.state.write();
        let state = &mut *guard;
        let pruned = state.store.replace_all(snapshot.experiences);
        state.consolidation.replace_all(snapshot.semantic);
        state.novelty.import(snapshot.novelty);
        state.exploration.replace_all(snapshot.exploration);
        state.curiosity.restore(snapshot.curiosity);
        state.attention.restore_history(snapshot.attention_history);
        state.last_decay = snapshot.last_decay;
        state.last_consolidation = snapshot.last_consolidation;
        drop(guard);

        EngineCounters::add(&self.inner.counters.experiences_pruned, pruned.len() as u64);
        self.inner.dirty.store(false, Ordering::Release);
        info!(
            episodic,
            pruned = pruned.len(),
            saved_at = %snapshot.saved_at,
            "Engine state restored"
        );
        true
    }

    /// Rebuild the experience store from the write-through log. Other state
    /// is left alone. Returns the number of experiences now stored.
    ///
    /// # Errors
    /// Propagates gateway read failures.
    pub fn restore_from_log(&self) -> Result<usize> {
        let Some(gateway) = &self.inner.gateway else {
            return Ok(0);
        };
        let log = gateway.load_experience_log()?;
        let mut state = self.inner.state.write();
        let pruned = state.store.replace_all(log);
        let count = state.store.len();
        drop(state);

        if !pruned.is_empty() {
            EngineCounters::add(&self.inner.counters.experiences_pruned, pruned.len() as u64);
            self.record_failure(
                gateway.remove_experiences(&pruned).map(|_| ()),
                "remove pruned experiences",
            );
        }
        self.mark_dirty();
        info!(count, "Experience store rebuilt from log");
        Ok(count)
    }

    /// Write the autosave slot if anything changed since the last flush.
    /// Returns whether a write happened.
    ///
    /// # Errors
    /// Returns the encoding or gateway error; the engine stays dirty so the
    /// next flush retries.
    pub fn flush(&self) -> Result<bool> {
        let Some(gateway) = &self.inner.gateway else {
            return Ok(false);
        };
        if !self.inner.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        let _span = debug_span!(spans::PERSIST_SAVE, slot = %self.inner.config.persistence.autosave_slot)
            .entered();
        let slot = &self.inner.config.persistence.autosave_slot;
        let result = self
            .encode_current()
            .and_then(|blob| gateway.save_slot(slot, &blob).map(|()| blob.len()));
        match result {
            Ok(bytes) => {
                EngineCounters::bump(&self.inner.counters.flushes_completed);
                debug!(slot = %slot, bytes, "Flushed engine state");
                Ok(true)
            }
            Err(e) => {
                self.mark_dirty();
                EngineCounters::bump(&self.inner.counters.persistence_failures);
                warn!(slot = %slot, error = %e, "Flush failed");
                Err(e)
            }
        }
    }

    // -- lifecycle ---------------------------------------------------------

    /// Register the decay, consolidation and flush loops on `scheduler`.
    /// Calling it on a running engine is a no-op.
    ///
    /// # Errors
    /// Returns [`ErneError::Scheduler`] if a loop cannot be registered; loops
    /// registered before the failure are cancelled.
    pub fn start(&self, scheduler: &dyn Scheduler) -> Result<()> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let cfg = &self.inner.config;
        let mut loops: Vec<(&'static str, u64, bool, fn(&MemoryEngine))> = Vec::with_capacity(3);
        loops.push(("erne-decay", cfg.decay.interval_secs, false, |e| {
            e.run_decay();
        }));
        loops.push(("erne-consolidation", cfg.consolidation.interval_secs, false, |e| {
            e.run_consolidation();
        }));
        if self.inner.gateway.is_some() {
            loops.push(("erne-flush", cfg.persistence.flush_interval_secs, true, |e| {
                match e.flush() {
                    Ok(written) => debug!(written, "Periodic flush finished"),
                    Err(err) => debug!(error = %err, "Periodic flush will retry"),
                }
            }));
        }

        let mut handles = Vec::with_capacity(loops.len());
        for (name, secs, blocking, run) in loops {
            let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
            let task = Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    run(&MemoryEngine { inner });
                }
            });
            let period = Duration::from_secs(secs);
            let registered = if blocking {
                scheduler.schedule_blocking(name, period, task)
            } else {
                scheduler.schedule(name, period, task)
            };
            match registered {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    self.inner.running.store(false, Ordering::Release);
                    return Err(e);
                }
            }
        }
        info!(tasks = handles.len(), "ERNE engine started");
        self.inner.tasks.lock().extend(handles);
        Ok(())
    }

    /// Whether periodic loops are registered.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Cancel every periodic loop and flush pending changes. The engine stays
    /// usable for direct calls and can be started again.
    pub fn dispose(&self) {
        let handles: Vec<TaskHandle> = self.inner.tasks.lock().drain(..).collect();
        let cancelled = handles.len();
        for handle in &handles {
            handle.cancel();
        }
        drop(handles);
        self.inner.running.store(false, Ordering::Release);
        if let Err(e) = self.flush() {
            warn!(error = %e, "Final flush failed");
        }
        info!(cancelled, "ERNE engine disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SnapshotFormat;
    use crate::persistence::MemorySlotStore;
    use crate::config::ModalityLayout;
    use crate::scheduler::ManualScheduler;
    use crate::types::Modality;
    use chrono::Utc;
    use std::sync::mpsc;

    fn sensory(values: Vec<f32>) -> SensoryInput {
        SensoryInput {
            visual: values,
            ..SensoryInput::default()
        }
    }

    fn input(values: Vec<f32>, emotion: Emotion) -> ExperienceInput {
        ExperienceInput::new(sensory(values), NeuralOutput::with_error(0.2), emotion, 0.3)
    }

    fn engine_with(config: EngineConfig) -> (MemoryEngine, Arc<ManualClock>, Arc<MemorySlotStore>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gateway = Arc::new(MemorySlotStore::new());
        let engine = MemoryEngine::builder(config)
            .clock(clock.clone())
            .persistence(gateway.clone())
            .build()
            .expect("engine");
        (engine, clock, gateway)
    }

    fn engine() -> (MemoryEngine, Arc<ManualClock>, Arc<MemorySlotStore>) {
        engine_with(EngineConfig::default())
    }

    #[test]
    fn invalid_input_is_rejected_without_mutation() {
        let (engine, _, _) = engine();
        let bad = input(vec![f32::NAN], Emotion::NEUTRAL);
        assert!(matches!(engine.store_experience(bad), Err(ErneError::InvalidInput(_))));
        assert_eq!(engine.episodic_count(), 0);
        assert_eq!(engine.counters().experiences_rejected, 1);
        assert!(engine.perceive(&SensoryInput::default(), 0.1).is_err());
    }

    #[test]
    fn store_writes_through_to_the_log() {
        let (engine, _, gateway) = engine();
        let e = engine
            .store_experience(input(vec![0.1, 0.9], Emotion::new(0.5, 0.5)))
            .expect("store");
        let log = gateway.load_experience_log().expect("log");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].id, e.id);
        assert!(engine.delete_experience(&e.id));
        assert!(gateway.load_experience_log().expect("log").is_empty());
        assert!(!engine.delete_experience(&e.id));
    }

    #[test]
    fn near_identical_stores_consolidate_immediately() {
        let (engine, clock, _) = engine();
        let mut ids = Vec::new();
        for _ in 0..3 {
            clock.advance(Duration::from_secs(1));
            ids.push(
                engine
                    .store_experience(input(vec![0.5, 0.5, 0.5], Emotion::NEUTRAL))
                    .expect("store")
                    .id,
            );
        }
        let semantic = engine.semantic_memories();
        assert_eq!(semantic.len(), 1);
        assert_eq!(semantic[0].associations, ids);

        clock.advance(Duration::from_secs(1));
        engine
            .store_experience(input(vec![0.5, 0.5, 0.51], Emotion::NEUTRAL))
            .expect("store");
        assert_eq!(engine.semantic_count(), 1);
        assert_eq!(engine.semantic_memories()[0].associations.len(), 4);
        assert_eq!(engine.counters().semantic_reinforced, 1);
    }

    #[test]
    fn recall_boosts_returned_experiences() {
        let (engine, _, _) = engine();
        let e = engine
            .store_experience(input(vec![1.0, 0.0], Emotion::new(0.1, 0.1)))
            .expect("store");
        let hits = engine.recall_scored(&RecallQuery::new(), 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].experience.recall_count, 1);
        assert!((hits[0].experience.strength - (e.strength * 1.05).min(1.0)).abs() < 1e-6);
        assert_eq!(engine.statistics().total_recalls, 1);
        assert!(engine.recall_memories(&RecallQuery::new(), 0).is_empty());
    }

    #[test]
    fn reconstruction_leaves_original_alone() {
        let config = EngineConfig {
            reconstruction: crate::config::ReconstructionConfig {
                seed: Some(9),
                ..Default::default()
            },
            ..EngineConfig::default()
        };
        let (engine, clock, _) = engine_with(config);
        let e = engine
            .store_experience(input(vec![0.3; 8], Emotion::NEUTRAL))
            .expect("store");
        clock.advance(Duration::from_secs(86_400 * 40));
        let copy = engine.reconstruct_memory(&e.id).expect("copy");
        assert_ne!(copy.sensory, e.sensory);
        assert_eq!(engine.experience(&e.id).expect("original").sensory, e.sensory);
        assert!(engine.reconstruct_memory(&ExperienceId::new()).is_none());
    }

    #[test]
    fn perception_feeds_exploration_and_curiosity() {
        let (engine, _, _) = engine();
        let first = engine
            .perceive(&sensory(vec![0.1, 0.5, 0.9, 0.3]), 0.4)
            .expect("perceive");
        let attention = first.attention.expect("first sight is novel");
        assert_eq!(first.exploration_target, Some(attention.target.id));
        assert!(first.curiosity >= 0.1);
        let goal = engine.generate_exploration_goal().expect("goal");
        assert_eq!(goal.id, attention.target.id);
        assert!(engine.mark_target_visited(goal.id));
        assert!(engine.set_target_accessibility(goal.id, 0.5));
        assert_eq!(engine.attention_history().len(), 1);
    }

    #[test]
    fn save_and_restore_roundtrip() {
        for format in [SnapshotFormat::Json, SnapshotFormat::Bincode, SnapshotFormat::Msgpack] {
            let mut config = EngineConfig::default();
            config.persistence.format = format;
            let (engine, _, gateway) = engine_with(config.clone());
            engine
                .process_cycle(sensory(vec![0.2, 0.4, 0.6]), NeuralOutput::with_error(0.3), Emotion::new(0.4, 0.2))
                .expect("cycle");
            let blob = engine.save_state("slot").expect("save");
            assert_eq!(engine.load_state("slot"), Some(blob));

            let restored = MemoryEngine::builder(config)
                .persistence(gateway)
                .build()
                .expect("engine");
            assert!(restored.restore_state("slot").expect("restore"));
            assert_eq!(restored.all_experiences(), engine.all_experiences());
            assert_eq!(restored.attention_history(), engine.attention_history());
            assert!(!restored.restore_state("missing").expect("restore"));
        }
    }

    #[test]
    fn scheduled_loops_stop_on_dispose() {
        let (engine, clock, gateway) = engine();
        let scheduler = ManualScheduler::with_clock(clock);
        engine.start(&scheduler).expect("start");
        assert!(engine.is_running());
        engine.start(&scheduler).expect("second start is a no-op");
        assert_eq!(scheduler.pending(), 3);

        engine
            .store_experience(input(vec![0.7, 0.1], Emotion::NEUTRAL))
            .expect("store");
        scheduler.advance(Duration::from_secs(300));
        let counters = engine.counters();
        assert_eq!(counters.decay_passes, 5);
        assert_eq!(counters.consolidation_passes, 1);
        assert_eq!(counters.flushes_completed, 1);
        assert!(gateway.load_slot("autosave").expect("load").is_some());

        engine.dispose();
        assert!(!engine.is_running());
        assert_eq!(scheduler.pending(), 0);
        scheduler.advance(Duration::from_secs(3_600));
        assert_eq!(engine.counters().decay_passes, 5);
    }

    #[test]
    fn dropped_engine_stops_its_loops() {
        let (engine, clock, _) = engine();
        let scheduler = ManualScheduler::with_clock(clock);
        engine.start(&scheduler).expect("start");
        drop(engine);
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.advance(Duration::from_secs(600)), 0);
    }

    #[derive(Debug)]
    struct GatedClock {
        clock: ManualClock,
        armed: AtomicBool,
        entered: Mutex<Option<mpsc::Sender<()>>>,
        release: Mutex<Option<mpsc::Receiver<()>>>,
    }

    impl Clock for GatedClock {
        fn now(&self) -> Timestamp {
            self.clock.advance(Duration::from_secs(1));
            let now = self.clock.now();
            if self.armed.swap(false, Ordering::SeqCst) {
                if let Some(entered) = self.entered.lock().take() {
                    entered.send(()).expect("signal entered");
                }
                if let Some(release) = self.release.lock().take() {
                    release.recv().expect("wait for release");
                }
            }
            now
        }
    }

    #[test]
    fn consolidation_sees_a_store_that_read_the_clock_first() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let clock = Arc::new(GatedClock {
            clock: ManualClock::new(Utc::now()),
            armed: AtomicBool::new(false),
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(Some(release_rx)),
        });
        let mut config = EngineConfig::default();
        config.store.immediate_consolidation = false;
        let engine = MemoryEngine::builder(config)
            .clock(clock.clone())
            .build()
            .expect("engine");

        clock.armed.store(true, Ordering::SeqCst);
        let storing = {
            let engine = engine.clone();
            std::thread::spawn(move || {
                engine
                    .store_experience(input(vec![0.5, 0.5, 0.5], Emotion::NEUTRAL))
                    .expect("store")
            })
        };
        entered_rx.recv().expect("store reached the clock");
        let consolidating = {
            let engine = engine.clone();
            std::thread::spawn(move || engine.run_consolidation())
        };
        std::thread::sleep(Duration::from_millis(50));
        release_tx.send(()).expect("release");

        let stored = storing.join().expect("store thread");
        let report = consolidating.join().expect("consolidation thread");
        assert_eq!(report.scanned, 1);
        let last = engine.snapshot().last_consolidation.expect("pass recorded");
        assert!(last > stored.timestamp);
    }

    #[test]
    fn combined_vectors_split_by_layout() {
        let mut config = EngineConfig::default();
        config.attention.layout = ModalityLayout {
            visual: 2,
            tactile: 2,
            auditory: 2,
            proprioceptive: 2,
        };
        let (engine, _, _) = engine_with(config);
        let result = engine
            .perceive_combined(&[0.1, 0.9, 0.3, 0.2, 0.8, 0.4, 0.6, 0.5], 0.2)
            .expect("perceive");
        for modality in Modality::ALL {
            assert!((result.scores.get(modality) - 1.0).abs() < 1e-6);
        }
        assert!(matches!(
            engine.perceive_combined(&[], 0.2),
            Err(ErneError::InvalidInput(_))
        ));
    }

    #[test]
    fn default_recall_uses_the_configured_limit() {
        let mut config = EngineConfig::default();
        config.recall.default_limit = 3;
        let (engine, clock, _) = engine_with(config);
        for i in 0..5u8 {
            clock.advance(Duration::from_secs(1));
            let x = f32::from(i) / 5.0;
            engine
                .store_experience(input(vec![x, 1.0 - x, 0.3], Emotion::NEUTRAL))
                .expect("store");
        }
        assert_eq!(engine.recall_default(&RecallQuery::new()).len(), 3);
    }
}

