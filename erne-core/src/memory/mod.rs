//! Memory record types.
//!
//! - **Experience**: one episode per perception cycle (Tulving, 1972)
//! - **Semantic**: a generalization consolidated from similar episodes

pub mod experience;
pub mod semantic;

pub use experience::{
    Experience, ExperienceInput, NeuralOutput, SensoryInput, initial_strength,
};
pub use semantic::{SemanticKind, SemanticMemory};
