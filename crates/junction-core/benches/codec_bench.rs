//! Criterion benchmarks for the Junction frame codec.
//!
//! Run with:
//! ```bash
//! cargo bench --package junction-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use junction_core::{decode_message, encode_frame, encode_message, FrameDecoder, Message};
use serde_json::json;

// ── Message fixtures ──────────────────────────────────────────────────────────

fn make_ping() -> Message {
    Message::new("/ping", json!({"n": 1}))
}

fn make_chat() -> Message {
    Message::new(
        "/chat",
        json!({"from": "bench", "room": "general", "text": "the quick brown fox jumps over the lazy dog"}),
    )
}

fn make_bulk(len: usize) -> Message {
    Message::new("/bulk", json!({"data": "x".repeat(len)}))
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_frame");
    for (name, msg) in [("ping", make_ping()), ("chat", make_chat()), ("bulk_64k", make_bulk(65_536))] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &msg, |b, msg| {
            b.iter(|| encode_frame(black_box(msg)).unwrap())
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_message");
    for (name, msg) in [("ping", make_ping()), ("chat", make_chat()), ("bulk_64k", make_bulk(65_536))] {
        let body = encode_message(&msg).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(name), &body, |b, body| {
            b.iter(|| decode_message(black_box(body)).unwrap())
        });
    }
    group.finish();
}

fn bench_stream_reassembly(c: &mut Criterion) {
    // 100 chat frames delivered in 1024-byte reads, as a socket would.
    let stream: Vec<u8> = (0..100)
        .flat_map(|_| encode_frame(&make_chat()).unwrap())
        .collect();

    c.bench_function("frame_decoder_100_frames_1k_reads", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            let mut count = 0usize;
            for chunk in stream.chunks(1024) {
                decoder.extend(black_box(chunk));
                while let Some(frame) = decoder.next_frame() {
                    decode_message(&frame).unwrap();
                    count += 1;
                }
            }
            count
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_stream_reassembly);
criterion_main!(benches);
