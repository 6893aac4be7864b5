use criterion::{criterion_group, criterion_main, Criterion};
use etherparse::PacketBuilder;
use pktmask_core::anonymise::AnonymiseStage;
use pktmask_core::frame::{Frame, TsResolution};
use std::hint::black_box;

fn sample_frame(host: u8) -> Frame {
    let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
        .ipv4([10, 0, 0, host], [10, 0, 1, host], 64)
        .tcp(1234, 443, 1, 65535);
    let mut buffer = Vec::new();
    builder.write(&mut buffer, &[0xCD; 256]).unwrap();
    Frame::new(0, 0, TsResolution::Micros, buffer.len() as u32, buffer)
}

fn criterion_benchmark(c: &mut Criterion) {
    let frames: Vec<Frame> = (0..255u8).map(sample_frame).collect();

    c.bench_function("anonymise 255 frames, unique hosts", |b| {
        b.iter(|| {
            let mut stage = AnonymiseStage::new([7u8; 32], 24, 64);
            for (i, frame) in frames.iter().enumerate() {
                let mut frame = frame.clone();
                black_box(stage.process(&mut frame, i).unwrap());
            }
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
