//! # ERNE Core Library
//!
//! Experience Retention & Novelty Engine: decides what a simulated agent
//! remembers, how strongly, for how long, and what it should look at next.
//!
//! - **Store**: importance-weighted, capacity-bounded episodes
//! - **Decay**: exponential strength loss, floored
//! - **Consolidation**: similar episodes generalize into semantic memories
//! - **Recall**: weighted multi-factor ranking with reconstructive noise
//! - **Novelty / attention**: familiarity per feature bucket drives which
//!   modality is attended and which regions are worth exploring
//! - **Curiosity**: prediction error, surprise and exploration diversity
//!
//! [`MemoryEngine`] owns all of it behind one lock; periodic passes are
//! registered on an injected [`scheduler::Scheduler`] and state is saved
//! through a [`persistence::PersistenceGateway`].
//!
//! ## Performance Contract
//!
//! - Store (10k resident, immediate consolidation on): < 1ms
//! - Recall top-10 from 10k: < 5ms
//! - Decay pass over 10k: < 2ms

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod attention;
pub mod clock;
pub mod config;
pub mod consolidation;
pub mod curiosity;
pub mod decay;
pub mod engine;
pub mod error;
pub mod exploration;
pub mod hashing;
pub mod memory;
pub mod metrics;
pub mod novelty;
pub mod persistence;
pub mod retrieval;
pub mod scheduler;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use engine::MemoryEngine;
pub use error::{ErneError, Result};
pub use memory::{Experience, ExperienceInput, SemanticMemory};
pub use types::*;
