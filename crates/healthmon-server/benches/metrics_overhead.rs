// Benchmark to measure metrics overhead on the notification path
// Compare performance with metrics enabled vs disabled

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use healthmon::{CheckType, EngineStats, HostStatus, Reason};
use healthmon_server::metrics::MetricsRegistry;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn registry() -> Arc<MetricsRegistry> {
    Arc::new(MetricsRegistry::new(
        &[0.001, 0.01, 0.1, 1.0],
        &[1.0, 10.0, 100.0],
    ))
}

fn bench_metrics_recording(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics_recording");

    group.bench_function("disabled", |b| {
        let metrics: Option<Arc<MetricsRegistry>> = None;
        b.iter(|| {
            // Same pattern as the notifier records each notification
            if let Some(ref m) = metrics {
                m.record_notification_batched();
                m.record_check(black_box(CheckType::Tcp), black_box(Reason::Success), black_box(Duration::from_millis(10)));
                m.record_transition(black_box(CheckType::Tcp), black_box(HostStatus::Up));
            }
        });
    });

    group.bench_function("enabled", |b| {
        let metrics = Some(registry());
        b.iter(|| {
            if let Some(ref m) = metrics {
                m.record_notification_batched();
                m.record_check(black_box(CheckType::Tcp), black_box(Reason::Success), black_box(Duration::from_millis(10)));
                m.record_transition(black_box(CheckType::Tcp), black_box(HostStatus::Up));
            }
        });
    });

    group.finish();
}

fn bench_individual_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("individual_operations");
    let registry = registry();

    group.bench_function("record_check", |b| {
        b.iter(|| {
            registry.record_check(
                black_box(CheckType::Http),
                black_box(Reason::ConnectTimeout),
                black_box(Duration::from_millis(10)),
            );
        });
    });

    group.bench_function("record_batch_sent", |b| {
        b.iter(|| {
            registry.record_batch_sent(
                black_box(10),
                black_box("size_limit"),
                black_box(Duration::from_millis(50)),
            );
        });
    });

    group.bench_function("update_engine", |b| {
        let stats = EngineStats {
            version: 4,
            queue_depth: 12,
            timers: 4000,
            threads: 16,
            idle_threads: 9,
            reloads: 3,
            reload_failures: 0,
        };
        b.iter(|| {
            registry.update_engine(black_box(&stats));
        });
    });

    group.finish();
}

fn bench_check_types(c: &mut Criterion) {
    let mut group = c.benchmark_group("label_cardinality");
    let registry = registry();
    let types = [CheckType::Http, CheckType::Https, CheckType::Tcp, CheckType::Dns, CheckType::Ftp];

    for count in [1usize, 3, 5].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                for check_type in &types[..count] {
                    registry.record_check(
                        black_box(*check_type),
                        black_box(Reason::Success),
                        black_box(Duration::from_millis(10)),
                    );
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_metrics_recording,
    bench_individual_operations,
    bench_check_types
);
criterion_main!(benches);
