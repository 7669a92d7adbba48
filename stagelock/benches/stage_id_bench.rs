//! Benchmarks for stage identity hashing.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use stagelock::identity::{canonical_json, compute_stage_id, EffectiveInputs, StageInputs};
use uuid::Uuid;

fn stage_id_benchmark(c: &mut Criterion) {
    let run_id = Uuid::new_v4();
    let small = StageInputs::new("discover").with("root", json!("/data"));
    let large = (0..200).fold(StageInputs::new("transform"), |inputs, i| {
        inputs.with(format!("option_{i}"), json!({ "enabled": i % 2 == 0, "weight": i }))
    });

    let small = EffectiveInputs::for_stage(run_id, &small);
    let large = EffectiveInputs::for_stage(run_id, &large);

    c.bench_function("compute_stage_id_small", |b| {
        b.iter(|| compute_stage_id(black_box(&small)))
    });
    c.bench_function("compute_stage_id_large", |b| {
        b.iter(|| compute_stage_id(black_box(&large)))
    });

    let value = large.to_value();
    c.bench_function("canonical_json_large", |b| {
        b.iter(|| canonical_json(black_box(&value)))
    });
}

criterion_group!(benches, stage_id_benchmark);
criterion_main!(benches);
