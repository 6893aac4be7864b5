use criterion::{criterion_group, criterion_main, Criterion};
use etherparse::PacketBuilder;
use pktmask_core::dedup::DedupStage;
use pktmask_core::frame::{Frame, TsResolution};
use std::hint::black_box;

fn sample_frame(seq: u32) -> Frame {
    let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
        .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
        .tcp(1234, 443, seq, 65535);
    let mut buffer = Vec::new();
    builder.write(&mut buffer, &[0xAB; 128]).unwrap();
    Frame::new(0, 0, TsResolution::Micros, buffer.len() as u32, buffer)
}

fn criterion_benchmark(c: &mut Criterion) {
    let frames: Vec<Frame> = (0..1000).map(|i| sample_frame(i % 50)).collect();

    c.bench_function("dedup 1000 frames, 50 unique", |b| {
        b.iter(|| {
            let mut stage = DedupStage::new();
            for frame in &frames {
                black_box(stage.process(frame));
            }
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
