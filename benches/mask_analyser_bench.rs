use criterion::{criterion_group, criterion_main, Criterion};
use etherparse::PacketBuilder;
use pktmask_core::capture::{CaptureFormat, CaptureWriter};
use pktmask_core::frame::{Frame, TsResolution};
use pktmask_core::mask::analyser::{InProcessAnalyser, TlsAnalyser};
use std::hint::black_box;

fn build_capture(path: &std::path::Path, records: usize) {
    let mut writer = CaptureWriter::create_like(
        path,
        CaptureFormat::Pcap {
            ts_resolution: TsResolution::Micros,
        },
    )
    .unwrap();

    for i in 0..records {
        let body = vec![0xEFu8; 64];
        let mut record = vec![23u8, 3, 3];
        record.extend_from_slice(&(body.len() as u16).to_be_bytes());
        record.extend_from_slice(&body);

        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(1234, 443, (i * record.len()) as u32 + 1, 65535);
        let mut buffer = Vec::new();
        builder.write(&mut buffer, &record).unwrap();
        writer
            .write_frame(&Frame::new(0, 0, TsResolution::Micros, buffer.len() as u32, buffer))
            .unwrap();
    }
}

fn criterion_benchmark(c: &mut Criterion) {
    let path = std::env::temp_dir().join("pktmask_bench_mask_analyser.pcap");
    build_capture(&path, 200);

    c.bench_function("analyse 200 tls records across frames", |b| {
        b.iter(|| {
            black_box(InProcessAnalyser.analyse(&path).unwrap());
        })
    });

    std::fs::remove_file(&path).ok();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
