//! Criterion benchmarks for the packet codec.
//!
//! Measures encode and decode latency for typical command payloads.  The
//! codec sits on every call's hot path (one encode per request, one
//! decode per inbound datagram), so regressions here show up directly as
//! added round-trip latency.
//!
//! Run with:
//! ```bash
//! cargo bench --package homelink-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use homelink_core::protocol::crypto::SecretToken;
use homelink_core::protocol::packet::{decode_header, decode_packet, encode_packet, HELLO_PACKET};

fn bench_token() -> SecretToken {
    SecretToken::from_hex("a1b2c3d4e5f60718293a4b5c6d7e8f90").expect("fixture token")
}

// ── Payload fixtures ──────────────────────────────────────────────────────────

fn payloads() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        (
            "get_prop",
            br#"{"id":1,"method":"get_prop","params":["power","bright"]}"#.to_vec(),
        ),
        (
            "set_prop",
            br#"{"id":2,"method":"set_power","params":["on","smooth",500]}"#.to_vec(),
        ),
        (
            "get_properties_8",
            serde_json::to_vec(&serde_json::json!({
                "id": 3,
                "method": "get_properties",
                "params": (1..=8).map(|piid| serde_json::json!({
                    "did": 360_000_001u64, "siid": 2, "piid": piid
                })).collect::<Vec<_>>(),
            }))
            .expect("fixture json"),
        ),
        (
            "info_response",
            br#"{"id":4,"result":{"model":"vendor.light.strip2","fw_ver":"1.4.1_0063","hw_ver":"ESP8266","mac":"34:CE:00:11:22:33","netif":{"localIp":"192.168.1.40","mask":"255.255.255.0"}}}"#
                .to_vec(),
        ),
    ]
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

/// Benchmarks `encode_packet` across payload sizes.
fn bench_encode(c: &mut Criterion) {
    let token = bench_token();
    let mut group = c.benchmark_group("encode_packet");
    for (name, plaintext) in payloads() {
        group.bench_with_input(BenchmarkId::new("payload", name), &plaintext, |b, p| {
            b.iter(|| {
                encode_packet(black_box(p), black_box(0x00AB_CDEF), &token, Some(1234))
                    .expect("encode must succeed")
            })
        });
    }
    group.finish();
}

/// Benchmarks `decode_packet` (checksum verify + decrypt) across payloads.
fn bench_decode(c: &mut Criterion) {
    let token = bench_token();
    let mut group = c.benchmark_group("decode_packet");
    for (name, plaintext) in payloads() {
        let packet =
            encode_packet(&plaintext, 0x00AB_CDEF, &token, Some(1234)).expect("bench setup");
        group.bench_with_input(BenchmarkId::new("payload", name), &packet, |b, bytes| {
            b.iter(|| decode_packet(black_box(bytes), Some(&token)).expect("decode must succeed"))
        });
    }
    group.finish();
}

/// Benchmarks the header-only path discovery runs on every datagram.
fn bench_header_only(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_header");
    group.bench_function("hello", |b| {
        b.iter(|| decode_header(black_box(&HELLO_PACKET)).expect("decode must succeed"))
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_header_only);
criterion_main!(benches);
