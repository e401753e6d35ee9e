// Performance benchmarks for rate limiting and key pattern matching

use coordination_core::cache::KeyPattern;
use coordination_core::core::models::RateLimitAlgorithm;
use coordination_core::engine::RateLimiter;
use coordination_core::state::InMemoryStore;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn bench_rate_limiter(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()));
    let cancel = CancellationToken::new();
    let window = Duration::from_secs(60);

    c.bench_function("rate_limit_sliding_window", |b| {
        b.iter(|| {
            rt.block_on(limiter.check_and_increment(
                black_box("bench:sliding"),
                black_box(1_000),
                window,
                RateLimitAlgorithm::SlidingWindow,
                &cancel,
            ))
        });
    });

    c.bench_function("rate_limit_fixed_window", |b| {
        b.iter(|| {
            rt.block_on(limiter.check_and_increment(
                black_box("bench:fixed"),
                black_box(1_000),
                window,
                RateLimitAlgorithm::FixedWindow,
                &cancel,
            ))
        });
    });
}

fn bench_key_pattern(c: &mut Criterion) {
    let pattern = KeyPattern::parse("projects:*:summary");

    c.bench_function("key_pattern_match", |b| {
        b.iter(|| pattern.matches(black_box("Projects:42:Summary")));
    });
}

criterion_group!(benches, bench_rate_limiter, bench_key_pattern);
criterion_main!(benches);
