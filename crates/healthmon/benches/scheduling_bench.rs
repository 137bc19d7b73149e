// Benchmarks for the scheduling hot paths: result bookkeeping per probe
// and the shared work queue.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use healthmon::{
    CheckOutcome, CheckParams, CheckSettings, CheckType, DnsLookup, DnsType, HostCheck, IpAddress, Reason, TimeStamp,
    Work, WorkQueue,
};
use std::hint::black_box;
use std::sync::atomic::AtomicBool;

fn bench_update_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_check");
    let address: IpAddress = "192.0.2.1".parse().unwrap();

    group.bench_function("success", |b| {
        let params = CheckParams::new(CheckSettings::default());
        params.empty_query(address);
        let mut at = 1_000_000;
        b.iter(|| {
            at += 1_000;
            let start = TimeStamp::from_millis(at);
            let outcome = CheckOutcome::success(start, start + 12);
            params.queue_query(address);
            params.start_query_at(address, start);
            black_box(params.update_check_at("web1", address, &outcome, 80, start + 12));
        });
    });

    // Alternating outcomes walk the retry and flap paths
    group.bench_function("alternating", |b| {
        let params = CheckParams::new(CheckSettings {
            num_check_retries: 1,
            ..CheckSettings::default()
        });
        params.empty_query(address);
        let mut at = 1_000_000;
        let mut up = false;
        b.iter(|| {
            at += 1_000;
            up = !up;
            let start = TimeStamp::from_millis(at);
            let outcome = if up {
                CheckOutcome::success(start, start + 12)
            } else {
                CheckOutcome::failure(Reason::ConnectTimeout, start, start + 12)
            };
            params.queue_query(address);
            params.start_query_at(address, start);
            black_box(params.update_check_at("web1", address, &outcome, 80, start + 12));
        });
    });

    group.finish();
}

fn bench_work_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("work_queue");
    let shutdown = AtomicBool::new(false);
    let check = HostCheck {
        check_type: CheckType::Tcp,
        port: 443,
        ..HostCheck::default()
    };

    for batch in [1usize, 64, 1024] {
        group.bench_with_input(BenchmarkId::new("insert_get", batch), &batch, |b, &batch| {
            let queue = WorkQueue::default();
            let address: IpAddress = "198.51.100.7".parse().unwrap();
            b.iter(|| {
                let now = TimeStamp::now();
                for _ in 0..batch {
                    queue.insert_work(Work::health_check("web1", address, check.clone(), now, now + 30_000));
                }
                for _ in 0..batch {
                    black_box(queue.get_work(&shutdown));
                }
            });
        });
    }

    group.bench_function("dns_lookup", |b| {
        let queue = WorkQueue::default();
        let lookup = DnsLookup::new(DnsType::Lookup, false);
        b.iter(|| {
            let now = TimeStamp::now();
            queue.insert_work(Work::dns_lookup("web1", lookup, now, now + 360_000));
            black_box(queue.get_work(&shutdown));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_update_check, bench_work_queue);
criterion_main!(benches);
