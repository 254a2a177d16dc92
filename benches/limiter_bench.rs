//! Benchmarks for result limiting over large stream lists.
//!
//! Run with: `cargo bench --bench limiter_bench`

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use streamfed::config::ResultLimits;
use streamfed::models::{Addon, ParsedFile, ParsedStream, ServiceInfo, StreamType};
use streamfed::Limiter;

const RESOLUTIONS: [&str; 4] = ["2160p", "1080p", "720p", "480p"];
const QUALITIES: [&str; 3] = ["BluRay", "WEB-DL", "WEBRip"];
const INDEXERS: [&str; 5] = ["TPB", "1337x", "RARBG", "YTS", "EZTV"];

/// Deterministic spread of streams across a few addons and categories.
fn generate_streams(count: usize) -> Vec<ParsedStream> {
    let addons: Vec<Arc<Addon>> = (0..4)
        .map(|i| Arc::new(Addon::new(format!("a{i}"), format!("Addon {i}"), format!("https://a{i}.example/manifest.json"))))
        .collect();

    (0..count)
        .map(|i| {
            let mut stream = ParsedStream::new(format!("s{i}"), Arc::clone(&addons[i % addons.len()]), StreamType::Debrid);
            stream.indexer = Some(INDEXERS[i % INDEXERS.len()].to_string());
            stream.service = Some(ServiceInfo {
                id: if i % 2 == 0 { "realdebrid" } else { "alldebrid" }.to_string(),
                cached: i % 3 == 0,
            });
            stream.parsed_file = Some(ParsedFile {
                resolution: Some(RESOLUTIONS[i % RESOLUTIONS.len()].to_string()),
                quality: Some(QUALITIES[i % QUALITIES.len()].to_string()),
                release_group: Some(format!("GRP{}", i % 17)),
                ..ParsedFile::default()
            });
            stream
        })
        .collect()
}

fn bench_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("limiter_apply");

    let strict = Limiter::new(&ResultLimits {
        global: Some(50),
        resolution: Some(10),
        quality: Some(8),
        indexer: Some(12),
        ..ResultLimits::default()
    });
    let loose = Limiter::new(&ResultLimits {
        release_group: Some(3),
        service: Some(500),
        ..ResultLimits::default()
    });

    for count in [100usize, 1_000, 5_000] {
        let streams = generate_streams(count);
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("strict", count), &streams, |b, streams| {
            b.iter_batched(|| streams.clone(), |s| black_box(strict.apply(s)), BatchSize::SmallInput);
        });
        group.bench_with_input(BenchmarkId::new("loose", count), &streams, |b, streams| {
            b.iter_batched(|| streams.clone(), |s| black_box(loose.apply(s)), BatchSize::SmallInput);
        });
    }

    group.finish();
}

criterion_group!(benches, bench_limiter);
criterion_main!(benches);
