use criterion::{criterion_group, criterion_main, Criterion};
use etherparse::PacketBuilder;
use pktmask_core::frame::{Frame, TsResolution};
use pktmask_core::mask::rewriter::apply_rules;
use pktmask_core::mask::rules::MaskRule;
use pktmask_core::stats::MaskStats;
use pktmask_core::tls_table::RuleAction;
use std::hint::black_box;

fn sample_frame() -> Frame {
    let body = vec![0xAAu8; 1024];
    let mut record = vec![23u8, 3, 3];
    record.extend_from_slice(&(body.len() as u16).to_be_bytes());
    record.extend_from_slice(&body);

    let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
        .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
        .tcp(1234, 443, 1, 65535);
    let mut buffer = Vec::new();
    builder.write(&mut buffer, &record).unwrap();
    Frame::new(0, 0, TsResolution::Micros, buffer.len() as u32, buffer)
}

fn criterion_benchmark(c: &mut Criterion) {
    let frame = sample_frame();
    let payload_start = frame.data.len() - 1029;
    let rule = MaskRule {
        frame_index: 0,
        byte_range: payload_start + 5..payload_start + 1029,
        action: RuleAction::MaskPayload,
    };

    c.bench_function("mask rewrite 1024-byte application data record", |b| {
        b.iter(|| {
            let mut frame = frame.clone();
            let mut stats = MaskStats::default();
            apply_rules(&mut frame, 0, std::slice::from_ref(&rule), &mut stats);
            black_box(stats.bytes_zeroed);
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
