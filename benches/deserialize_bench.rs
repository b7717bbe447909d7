//! Benchmarks for notification decoding

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use optistream_core::events::{self, Event};
use optistream_core::protocol::{decode_frame, encode_frame, message_frame};

fn progress_payload(dimensions: usize) -> Vec<u8> {
    Event::Progress {
        point: (0..dimensions).map(|i| i as f64 * 0.5).collect(),
        kpis: (0..dimensions / 4 + 1).map(|i| i as f64).collect(),
        iteration: Some(42),
    }
    .to_payload()
}

fn bench_event_deserialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_deserialize");

    for dimensions in [4, 64, 1024].iter() {
        let payload = progress_payload(*dimensions);
        group.bench_with_input(
            BenchmarkId::from_parameter(dimensions),
            &payload,
            |b, payload| b.iter(|| events::deserialize(black_box(payload))),
        );
    }

    group.finish();
}

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for dimensions in [4, 64, 1024].iter() {
        let payload = progress_payload(*dimensions);
        let parts = match message_frame("bench", &payload) {
            Ok(frame) => encode_frame(&frame),
            Err(e) => panic!("payload is not a valid frame: {}", e),
        };
        group.bench_with_input(
            BenchmarkId::from_parameter(dimensions),
            &parts,
            |b, parts| b.iter(|| decode_frame(black_box(parts.clone()))),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_event_deserialize, bench_frame_decode);
criterion_main!(benches);
