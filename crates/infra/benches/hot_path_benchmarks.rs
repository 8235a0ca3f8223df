use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;
use std::time::Duration;

use devpulse_core::TenantId;
use devpulse_infra::cache::TenantCache;
use devpulse_infra::dedupe::DuplicateEventFilter;
use devpulse_infra::jobs::{JobType, ScheduleExpr};
use devpulse_infra::lock::ExecutionLock;
use serde_json::json;

fn tenants(n: usize) -> Vec<TenantId> {
    (0..n).map(|_| TenantId::new()).collect()
}

fn bench_lock_acquire_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("execution_lock");
    group.throughput(Throughput::Elements(1));

    group.bench_function("acquire_release_uncontended", |b| {
        let lock = ExecutionLock::new();
        let tenant = TenantId::new();
        b.iter(|| {
            if let Some(id) = lock.acquire(black_box(tenant), JobType::Builds) {
                lock.release(tenant, JobType::Builds, id);
            }
        });
    });

    group.bench_function("acquire_while_held", |b| {
        let lock = ExecutionLock::new();
        let tenant = TenantId::new();
        let _held = lock.acquire(tenant, JobType::Builds);
        b.iter(|| black_box(lock.acquire(black_box(tenant), JobType::Builds)));
    });

    group.bench_function("guard_round_trip", |b| {
        let lock = Arc::new(ExecutionLock::new());
        let tenant = TenantId::new();
        b.iter(|| {
            let guard = lock.try_lock(black_box(tenant), JobType::PullRequests);
            black_box(guard.map(|g| g.release()))
        });
    });

    group.finish();
}

fn bench_cache_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("tenant_cache_get");

    for tenant_count in [1, 100, 1000].iter() {
        let cache = TenantCache::new();
        let ids = tenants(*tenant_count);
        for id in &ids {
            for job_type in JobType::ALL {
                cache.set(*id, format!("{job_type}:web"), json!({"items": []}), Duration::from_secs(300));
            }
        }
        let probe = ids[ids.len() / 2];

        group.bench_with_input(BenchmarkId::new("hit", tenant_count), tenant_count, |b, _| {
            b.iter(|| black_box(cache.get(black_box(probe), "builds:web")));
        });
        group.bench_with_input(BenchmarkId::new("miss", tenant_count), tenant_count, |b, _| {
            b.iter(|| black_box(cache.get(black_box(probe), "builds:mobile")));
        });
    }

    group.finish();
}

fn bench_cache_invalidate_prefix(c: &mut Criterion) {
    let mut group = c.benchmark_group("tenant_cache_invalidate_prefix");

    for keys in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*keys as u64));
        group.bench_with_input(BenchmarkId::from_parameter(keys), keys, |b, &keys| {
            let cache = TenantCache::new();
            let tenant = TenantId::new();
            b.iter(|| {
                for i in 0..keys {
                    cache.set(tenant, format!("builds:p{i}"), json!(i), Duration::from_secs(60));
                }
                black_box(cache.invalidate_prefix(tenant, "builds:"))
            });
        });
    }

    group.finish();
}

fn bench_dedupe_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("dedupe_check_and_mark");

    group.bench_function("fresh_ids", |b| {
        let filter = DuplicateEventFilter::new(Duration::from_secs(60));
        let tenant = TenantId::new();
        let mut n: u64 = 0;
        b.iter(|| {
            n += 1;
            black_box(filter.check_and_mark(tenant, "build.complete", &n.to_string()))
        });
    });

    group.bench_function("duplicate_id", |b| {
        let filter = DuplicateEventFilter::new(Duration::from_secs(60));
        let tenant = TenantId::new();
        filter.check_and_mark(tenant, "build.complete", "d1");
        b.iter(|| black_box(filter.check_and_mark(tenant, "build.complete", "d1")));
    });

    group.finish();
}

fn bench_schedule_next_after(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule_next_after");

    for source in ["*/10 * * * * *", "*/15 * * * *", "0 9 * * 1-5"].iter() {
        let Ok(schedule) = ScheduleExpr::parse(source) else {
            continue;
        };
        let now = chrono::Utc::now();
        group.bench_with_input(BenchmarkId::from_parameter(source), source, |b, _| {
            b.iter(|| black_box(schedule.next_after(black_box(now))));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_lock_acquire_release,
    bench_cache_get,
    bench_cache_invalidate_prefix,
    bench_dedupe_check,
    bench_schedule_next_after
);
criterion_main!(benches);
