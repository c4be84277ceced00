//! Runtime counters and tracing span names.
//!
//! Counters are lock-free `AtomicU64`s bumped on the hot path and read on
//! export. [`CounterSnapshot::to_prometheus`] renders them in the Prometheus
//! text format for hosts that expose a metrics endpoint.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Atomic counters for engine events.
#[derive(Debug)]
pub struct EngineCounters {
    /// Experiences accepted by `store_experience`.
    pub experiences_stored: AtomicU64,
    /// Experiences dropped by capacity pruning.
    pub experiences_pruned: AtomicU64,
    /// Payloads rejected as invalid.
    pub experiences_rejected: AtomicU64,
    /// Experiences returned by recall.
    pub recalls_served: AtomicU64,
    /// Semantic memories created.
    pub semantic_created: AtomicU64,
    /// Semantic memories reinforced by an immediate pattern.
    pub semantic_reinforced: AtomicU64,
    /// Semantic memories evicted for capacity.
    pub semantic_evicted: AtomicU64,
    /// Decay passes completed.
    pub decay_passes: AtomicU64,
    /// Consolidation passes completed.
    pub consolidation_passes: AtomicU64,
    /// Attention events emitted.
    pub attention_events: AtomicU64,
    /// Successful writes to the persistence gateway.
    pub flushes_completed: AtomicU64,
    /// Failed reads or writes to the persistence gateway.
    pub persistence_failures: AtomicU64,
}

impl EngineCounters {
    /// Zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            experiences_stored: AtomicU64::new(0),
            experiences_pruned: AtomicU64::new(0),
            experiences_rejected: AtomicU64::new(0),
            recalls_served: AtomicU64::new(0),
            semantic_created: AtomicU64::new(0),
            semantic_reinforced: AtomicU64::new(0),
            semantic_evicted: AtomicU64::new(0),
            decay_passes: AtomicU64::new(0),
            consolidation_passes: AtomicU64::new(0),
            attention_events: AtomicU64::new(0),
            flushes_completed: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
        }
    }

    /// Add `n` to a counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Add one to a counter.
    pub fn bump(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    /// Read every counter.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            experiences_stored: load(&self.experiences_stored),
            experiences_pruned: load(&self.experiences_pruned),
            experiences_rejected: load(&self.experiences_rejected),
            recalls_served: load(&self.recalls_served),
            semantic_created: load(&self.semantic_created),
            semantic_reinforced: load(&self.semantic_reinforced),
            semantic_evicted: load(&self.semantic_evicted),
            decay_passes: load(&self.decay_passes),
            consolidation_passes: load(&self.consolidation_passes),
            attention_events: load(&self.attention_events),
            flushes_completed: load(&self.flushes_completed),
            persistence_failures: load(&self.persistence_failures),
        }
    }
}

impl Default for EngineCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter values at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    /// Experiences stored.
    pub experiences_stored: u64,
    /// Experiences pruned.
    pub experiences_pruned: u64,
    /// Payloads rejected.
    pub experiences_rejected: u64,
    /// Experiences returned by recall.
    pub recalls_served: u64,
    /// Semantic memories created.
    pub semantic_created: u64,
    /// Semantic memories reinforced.
    pub semantic_reinforced: u64,
    /// Semantic memories evicted.
    pub semantic_evicted: u64,
    /// Decay passes.
    pub decay_passes: u64,
    /// Consolidation passes.
    pub consolidation_passes: u64,
    /// Attention events.
    pub attention_events: u64,
    /// Successful persistence writes.
    pub flushes_completed: u64,
    /// Persistence failures.
    pub persistence_failures: u64,
}

impl CounterSnapshot {
    /// Format as Prometheus text exposition.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let rows: [(&str, &str, u64); 12] = [
            ("experiences_stored", "Experiences stored", self.experiences_stored),
            ("experiences_pruned", "Experiences pruned at capacity", self.experiences_pruned),
            ("experiences_rejected", "Invalid experience payloads", self.experiences_rejected),
            ("recalls_served", "Experiences returned by recall", self.recalls_served),
            ("semantic_created", "Semantic memories created", self.semantic_created),
            ("semantic_reinforced", "Semantic memories reinforced", self.semantic_reinforced),
            ("semantic_evicted", "Semantic memories evicted", self.semantic_evicted),
            ("decay_passes", "Decay passes completed", self.decay_passes),
            ("consolidation_passes", "Consolidation passes completed", self.consolidation_passes),
            ("attention_events", "Attention events emitted", self.attention_events),
            ("flushes_completed", "Persistence writes completed", self.flushes_completed),
            ("persistence_failures", "Persistence failures", self.persistence_failures),
        ];
        let mut out = String::new();
        for (name, help, value) in rows {
            let _ = write!(
                out,
                "# HELP erne_{name}_total {help}\n\
                 # TYPE erne_{name}_total counter\n\
                 erne_{name}_total {value}\n"
            );
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tracing Span Names
// ---------------------------------------------------------------------------

/// Span names used with `tracing` span macros.
pub mod spans {
    /// Perception (novelty, attention, curiosity).
    pub const PERCEIVE: &str = "erne::perceive";
    /// Experience store.
    pub const STORE: &str = "erne::store";
    /// Recall ranking.
    pub const RECALL: &str = "erne::recall";
    /// Decay pass.
    pub const DECAY_PASS: &str = "erne::decay";
    /// Consolidation pass.
    pub const CONSOLIDATION: &str = "erne::consolidation";
    /// Persistence save.
    pub const PERSIST_SAVE: &str = "erne::persist::save";
    /// Persistence load.
    pub const PERSIST_LOAD: &str = "erne::persist::load";
}
