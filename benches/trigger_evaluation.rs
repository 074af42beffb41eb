//! Benchmarks for trigger evaluation and snapshots
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fieldlog_rs::session::snapshot::{generate_snapshot_label_value, LatestValueCache};
use fieldlog_rs::triggers::{
    plan_effects, AlertType, EvaluationContext, Trigger, TriggerActionType, TriggerWhen,
};
use fieldlog_rs::types::{SensorReading, SensorSpec};

fn make_triggers(count: usize) -> Vec<Trigger> {
    let kinds = [
        (TriggerActionType::Note, TriggerWhen::Above),
        (TriggerActionType::Alert, TriggerWhen::RisesAbove),
        (TriggerActionType::StartRecording, TriggerWhen::DropsBelow),
        (TriggerActionType::StopRecording, TriggerWhen::At),
    ];
    (0..count)
        .map(|i| {
            let (action, when) = kinds[i % kinds.len()];
            Trigger::new(format!("t{}", i), "s1", action, when, (i % 20) as f64 - 10.0)
                .with_alert_types([AlertType::Audio])
        })
        .collect()
}

fn bench_plan_effects(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_effects");
    let ctx = EvaluationContext {
        is_recording: true,
        transition_in_progress: false,
    };

    for count in [1, 10, 100].iter() {
        let triggers = make_triggers(*count);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            let mut previous = None;
            let mut t = 0i64;
            b.iter(|| {
                t += 1;
                let value = ((t % 40) - 20) as f64;
                let effects = plan_effects(
                    black_box(&triggers),
                    previous,
                    SensorReading::new(t, value),
                    ctx,
                );
                previous = Some(value);
                black_box(effects)
            });
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for count in [4, 32, 256].iter() {
        let mut cache = LatestValueCache::new();
        let ids: Vec<String> = (0..*count).map(|i| format!("sensor-{}", i)).collect();
        for (i, id) in ids.iter().enumerate() {
            cache.track(id);
            cache.update(id, SensorReading::new(i as i64, i as f64 * 0.5));
        }

        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                black_box(generate_snapshot_label_value(
                    &cache,
                    black_box(&ids),
                    SensorSpec::unknown,
                ))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_plan_effects, bench_snapshot);
criterion_main!(benches);
