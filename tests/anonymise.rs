use etherparse::PacketBuilder;
use pktmask_core::anonymise::AnonymiseStage;
use pktmask_core::frame::{Frame, TsResolution};
use std::net::IpAddr;

fn tcp_frame(src: [u8; 4], dst: [u8; 4]) -> Frame {
    let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
        .ipv4(src, dst, 64)
        .tcp(1234, 443, 1, 65535);
    let mut buffer = Vec::new();
    builder.write(&mut buffer, b"payload").unwrap();
    Frame::new(0, 0, TsResolution::Micros, buffer.len() as u32, buffer)
}

fn src_addr(frame: &Frame) -> IpAddr {
    IpAddr::from([frame.data[26], frame.data[27], frame.data[28], frame.data[29]])
}

#[test]
fn same_seed_and_input_produce_byte_identical_output() {
    let mut stage_a = AnonymiseStage::new([4u8; 32], 24, 64);
    let mut stage_b = AnonymiseStage::new([4u8; 32], 24, 64);

    let mut frame_a = tcp_frame([172, 16, 0, 9], [172, 16, 0, 10]);
    let mut frame_b = frame_a.clone();

    stage_a.process(&mut frame_a, 0).unwrap();
    stage_b.process(&mut frame_b, 0).unwrap();

    assert_eq!(frame_a.data, frame_b.data);
}

#[test]
fn frame_count_and_length_are_preserved() {
    let mut stage = AnonymiseStage::new([5u8; 32], 24, 64);
    let mut frame = tcp_frame([192, 168, 1, 5], [192, 168, 1, 6]);
    let original_len = frame.data.len();
    let original_ts = (frame.ts_secs, frame.ts_frac);
    let original_orig_len = frame.orig_len;

    stage.process(&mut frame, 0).unwrap();

    assert_eq!(frame.data.len(), original_len);
    assert_eq!((frame.ts_secs, frame.ts_frac), original_ts);
    assert_eq!(frame.orig_len, original_orig_len);
}

#[test]
fn distinct_inputs_never_collide_on_output() {
    let mut stage = AnonymiseStage::new([6u8; 32], 24, 64);
    let inputs = [
        ([10, 0, 0, 1], [10, 0, 0, 2]),
        ([10, 0, 0, 3], [10, 0, 0, 4]),
        ([192, 168, 5, 1], [192, 168, 5, 2]),
        ([203, 0, 113, 9], [203, 0, 113, 10]),
    ];

    let mut outputs = Vec::new();
    for (i, (src, dst)) in inputs.into_iter().enumerate() {
        let mut frame = tcp_frame(src, dst);
        stage.process(&mut frame, i).unwrap();
        outputs.push(src_addr(&frame));
    }

    let mut deduped = outputs.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(outputs.len(), deduped.len());
}
