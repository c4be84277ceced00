//! ERNE Benchmark Suite
//!
//! Performance targets:
//!   store_single_at_10k .............. < 1ms
//!   recall_top10_from_10k ............ < 5ms
//!   decay_pass_10k ................... < 2ms
//!   consolidation_window_500 ......... < 20ms
//!   perceive_four_modalities ......... < 50μs

use std::hint::black_box;

use chrono::{Duration, Utc};
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};

use erne_core::config::{ConsolidationConfig, EngineConfig};
use erne_core::consolidation::ConsolidationEngine;
use erne_core::decay::DecayEngine;
use erne_core::engine::MemoryEngine;
use erne_core::memory::{Experience, ExperienceInput, NeuralOutput, SensoryInput};
use erne_core::retrieval::RecallQuery;
use erne_core::types::Emotion;

fn sensory(i: u32) -> SensoryInput {
    let x = i as f32;
    SensoryInput {
        visual: (0..32).map(|d| ((x + d as f32) * 0.13).sin()).collect(),
        tactile: (0..16).map(|d| ((x * 0.7 + d as f32) * 0.31).cos()).collect(),
        auditory: (0..16).map(|d| ((x * 1.3 + d as f32) * 0.07).sin()).collect(),
        proprioceptive: (0..16).map(|d| (x * 0.01 + d as f32 * 0.05).fract()).collect(),
    }
}

fn input(i: u32) -> ExperienceInput {
    ExperienceInput::new(
        sensory(i),
        NeuralOutput::with_error((i % 7) as f32 * 0.1),
        Emotion::new(((i % 21) as f32 - 10.0) / 10.0, (i % 11) as f32 / 10.0),
        (i % 5) as f32 / 5.0,
    )
}

fn populated_engine(count: u32) -> MemoryEngine {
    let engine = MemoryEngine::new(EngineConfig::default()).expect("engine");
    for i in 0..count {
        engine.store_experience(input(i)).expect("store");
    }
    engine
}

/// Benchmark: store into a full engine (prune + immediate-pattern scan).
fn bench_store(c: &mut Criterion) {
    let engine = populated_engine(10_000);
    let mut i = 10_000;
    c.bench_function("store_single_at_10k", |b| {
        b.iter(|| {
            i += 1;
            black_box(engine.store_experience(input(i)).expect("store"));
        });
    });
}

/// Benchmark: recall with every factor active.
fn bench_recall(c: &mut Criterion) {
    let engine = populated_engine(10_000);
    let query = RecallQuery::new()
        .with_sensory(sensory(42).combined())
        .with_emotion(Emotion::new(0.4, 0.6));
    c.bench_function("recall_top10_from_10k", |b| {
        b.iter(|| black_box(engine.recall_memories(black_box(&query), 10)));
    });
}

/// Benchmark: one decay pass over a full store.
fn bench_decay(c: &mut Criterion) {
    let start = Utc::now();
    let experiences: Vec<Experience> = (0..10_000)
        .map(|i| Experience::from_input(input(i), start))
        .collect();
    let decay = DecayEngine::default();
    c.bench_function("decay_pass_10k", |b| {
        b.iter_batched(
            || experiences.clone(),
            |mut batch| black_box(decay.apply(&mut batch, start + Duration::minutes(1))),
            BatchSize::LargeInput,
        );
    });
}

/// Benchmark: clustering a five-minute window.
fn bench_consolidation(c: &mut Criterion) {
    let start = Utc::now();
    let experiences: Vec<Experience> = (0..500)
        .map(|i| Experience::from_input(input(i % 50), start))
        .collect();
    c.bench_function("consolidation_window_500", |b| {
        b.iter_batched(
            || ConsolidationEngine::new(&ConsolidationConfig::default()),
            |mut engine| black_box(engine.consolidate_window(&experiences, None, start)),
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark: novelty, attention and curiosity for one cycle.
fn bench_perceive(c: &mut Criterion) {
    let engine = MemoryEngine::new(EngineConfig::default()).expect("engine");
    let mut i = 0;
    c.bench_function("perceive_four_modalities", |b| {
        b.iter(|| {
            i += 1;
            black_box(engine.perceive(&sensory(i % 200), 0.3).expect("perceive"));
        });
    });
}

criterion_group!(
    benches,
    bench_store,
    bench_recall,
    bench_decay,
    bench_consolidation,
    bench_perceive,
);
criterion_main!(benches);
