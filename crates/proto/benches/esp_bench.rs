//! ESP Performance Benchmarks
//!
//! Benchmarks for ESP encryption/decryption throughput, wire parsing,
//! and replay window bookkeeping.
//!
//! Run with: `cargo bench --bench esp_bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use esptun_proto::esp::{
    crypto, replay::ReplayWindow, EspAuth, EspCipher, EspContext, PacketBuf,
};

/// Create a keyed context for benchmarking
fn create_test_context(cipher: EspCipher) -> EspContext {
    let enc_key = vec![0xA5u8; cipher.key_len()];
    let mac_key = vec![0x5Au8; EspAuth::HmacSha1.key_len()];
    EspContext::new(0x12345678, cipher, EspAuth::HmacSha1, &enc_key, &mac_key).unwrap()
}

/// Encrypt one payload into a wire datagram
fn create_test_datagram(ctx: &mut EspContext, size: usize) -> Vec<u8> {
    let data = vec![0x42u8; size];
    let mut pkt = PacketBuf::from_payload(&data).unwrap();
    crypto::encrypt_packet(ctx, &mut pkt).unwrap();
    pkt.datagram().to_vec()
}

/// Benchmark ESP encryption throughput
fn bench_esp_encryption(c: &mut Criterion) {
    let mut group = c.benchmark_group("esp_encryption");

    for size in [64usize, 512, 1500] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("aes128_sha1_{size}bytes"), |b| {
            let mut ctx = create_test_context(EspCipher::Aes128Cbc);
            let data = vec![0x42u8; size];

            b.iter(|| {
                let mut pkt = PacketBuf::from_payload(&data).unwrap();
                black_box(crypto::encrypt_packet(&mut ctx, &mut pkt).unwrap())
            });
        });
    }

    group.throughput(Throughput::Bytes(1500));
    group.bench_function("aes256_sha1_1500bytes", |b| {
        let mut ctx = create_test_context(EspCipher::Aes256Cbc);
        let data = vec![0x42u8; 1500];

        b.iter(|| {
            let mut pkt = PacketBuf::from_payload(&data).unwrap();
            black_box(crypto::encrypt_packet(&mut ctx, &mut pkt).unwrap())
        });
    });

    group.finish();
}

/// Benchmark ESP decryption throughput
///
/// Replay enforcement is off so the same datagram can be decrypted
/// repeatedly; the window bookkeeping still runs every iteration.
fn bench_esp_decryption(c: &mut Criterion) {
    let mut group = c.benchmark_group("esp_decryption");

    for size in [64usize, 1500] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("aes128_sha1_{size}bytes"), |b| {
            let mut sender = create_test_context(EspCipher::Aes128Cbc);
            let mut receiver = create_test_context(EspCipher::Aes128Cbc);
            let wire = create_test_datagram(&mut sender, size);

            b.iter(|| {
                let mut pkt = PacketBuf::from_datagram(&wire).unwrap();
                crypto::decrypt_packet(&mut receiver, &mut pkt, false).unwrap();
                black_box(pkt)
            });
        });
    }

    group.finish();
}

/// Benchmark wire parsing without cryptography
fn bench_datagram_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("datagram_parsing");

    let mut ctx = create_test_context(EspCipher::Aes128Cbc);
    let wire = create_test_datagram(&mut ctx, 1500);

    group.throughput(Throughput::Bytes(wire.len() as u64));
    group.bench_function("from_datagram_1500bytes", |b| {
        b.iter(|| {
            let pkt = PacketBuf::from_datagram(&wire).unwrap();
            black_box((pkt.spi(), pkt.seq()))
        });
    });

    group.finish();
}

/// Benchmark replay window admission
fn bench_replay_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_window");

    group.bench_function("sequential", |b| {
        let mut window = ReplayWindow::new();
        let mut seq = 0u32;

        b.iter(|| {
            let verdict = window.check_and_update(seq);
            seq = seq.wrapping_add(1);
            black_box(verdict)
        });
    });

    group.bench_function("out_of_order", |b| {
        let mut window = ReplayWindow::new();
        let mut seq = 4u32;

        b.iter(|| {
            // Arrival pattern 4, 1, 6, 3, 8, 5, .. keeps the backlog busy
            let verdict = window.check_and_update(seq);
            seq = if seq % 2 == 0 { seq - 3 } else { seq + 5 };
            black_box(verdict)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_esp_encryption,
    bench_esp_decryption,
    bench_datagram_parsing,
    bench_replay_window,
);

criterion_main!(benches);
