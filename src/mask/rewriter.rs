//! Mask stage, pass 2: applies generated rules to frame bytes in place.

use crate::anonymise::checksum;
use crate::frame::Frame;
use crate::stats::{Diagnostic, MaskStats};
use crate::tls_table::RuleAction;

use super::rules::MaskRule;

/// Zeroes the payload bytes each `MaskPayload` rule names, clamped to the
/// frame's actual length, then recomputes the transport checksum.
/// `rule.byte_range` is already an absolute offset into `frame.data` (the
/// analyser's origin map carries frame-absolute offsets), so no extra
/// payload-start adjustment is needed here.
pub fn apply_rules(frame: &mut Frame, frame_index: usize, rules: &[MaskRule], stats: &mut MaskStats) {
    let applicable: Vec<&MaskRule> = rules.iter().filter(|r| r.frame_index == frame_index).collect();
    if applicable.is_empty() {
        return;
    }

    let mut touched = false;
    for rule in &applicable {
        if rule.action != RuleAction::MaskPayload {
            continue;
        }
        let requested_start = rule.byte_range.start;
        let requested_end = rule.byte_range.end;
        let clamped_end = requested_end.min(frame.data.len());
        if requested_start >= clamped_end {
            continue;
        }
        if clamped_end != requested_end {
            stats.diagnostics.push(Diagnostic::BoundaryClamp {
                frame_index,
                requested_end,
                clamped_end,
            });
        }
        for byte in &mut frame.data[requested_start..clamped_end] {
            *byte = 0;
        }
        stats.bytes_zeroed += (clamped_end - requested_start) as u64;
        touched = true;
    }

    if touched {
        recompute_transport_checksum(frame);
        stats.frames_masked += 1;
    }
}

/// Recomputes whatever transport checksum the innermost IP/TCP or IP/UDP
/// header carries, now that payload bytes have changed. IP header checksums
/// are untouched: payload rewriting never changes header fields.
fn recompute_transport_checksum(frame: &mut Frame) {
    use etherparse::{NetSlice, SlicedPacket, TransportSlice};

    let Ok(parsed) = SlicedPacket::from_ethernet(&frame.data) else {
        return;
    };
    let base = frame.data.as_ptr() as usize;

    let addrs = match &parsed.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            Some((4u8, header.source(), header.destination()))
        }
        Some(NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            let src: [u8; 16] = header.source();
            let dst: [u8; 16] = header.destination();
            return recompute_v6(&parsed, base, src, dst, frame);
        }
        _ => None,
    };

    let Some((4, src, dst)) = addrs else {
        return;
    };

    match &parsed.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            let slice = tcp.slice();
            let start = slice.as_ptr() as usize - base;
            let payload = tcp.payload();
            let end = payload.as_ptr() as usize - base + payload.len();
            checksum::recompute_tcp_checksum_v4(src, dst, &mut frame.data[start..end]);
        }
        Some(TransportSlice::Udp(udp)) => {
            let slice = udp.slice();
            let start = slice.as_ptr() as usize - base;
            let payload = udp.payload();
            let end = payload.as_ptr() as usize - base + payload.len();
            checksum::recompute_udp_checksum_v4(src, dst, &mut frame.data[start..end]);
        }
        _ => {}
    }
}

fn recompute_v6(parsed: &etherparse::SlicedPacket, base: usize, src: [u8; 16], dst: [u8; 16], frame: &mut Frame) {
    use etherparse::TransportSlice;

    match &parsed.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            let slice = tcp.slice();
            let start = slice.as_ptr() as usize - base;
            let payload = tcp.payload();
            let end = payload.as_ptr() as usize - base + payload.len();
            checksum::recompute_tcp_checksum_v6(src, dst, &mut frame.data[start..end]);
        }
        Some(TransportSlice::Udp(udp)) => {
            let slice = udp.slice();
            let start = slice.as_ptr() as usize - base;
            let payload = udp.payload();
            let end = payload.as_ptr() as usize - base + payload.len();
            checksum::recompute_udp_checksum_v6(src, dst, &mut frame.data[start..end]);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::TsResolution;
    use etherparse::PacketBuilder;

    fn tcp_frame(payload: &[u8]) -> Frame {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(1234, 443, 1, 65535);
        let mut buffer = Vec::new();
        builder.write(&mut buffer, payload).unwrap();
        Frame::new(0, 0, TsResolution::Micros, buffer.len() as u32, buffer)
    }

    #[test]
    fn masks_only_the_requested_range_and_keeps_length() {
        let mut frame = tcp_frame(&[0x17, 3, 3, 0, 5, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA]);
        let original_len = frame.data.len();
        let payload_start = original_len - 10;
        let rules = vec![MaskRule {
            frame_index: 0,
            byte_range: payload_start + 5..payload_start + 10,
            action: RuleAction::MaskPayload,
        }];
        let mut stats = MaskStats::default();
        apply_rules(&mut frame, 0, &rules, &mut stats);

        assert_eq!(frame.data.len(), original_len);
        assert_eq!(stats.frames_masked, 1);
        assert_eq!(stats.bytes_zeroed, 5);
        assert_eq!(&frame.data[payload_start + 5..payload_start + 10], &[0u8; 5]);
    }

    #[test]
    fn boundary_past_frame_length_is_clamped_and_recorded() {
        let mut frame = tcp_frame(&[0x17, 3, 3, 0, 5, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA]);
        let original_len = frame.data.len();
        let payload_start = original_len - 10;
        let rules = vec![MaskRule {
            frame_index: 0,
            byte_range: payload_start + 5..payload_start + 1000,
            action: RuleAction::MaskPayload,
        }];
        let mut stats = MaskStats::default();
        apply_rules(&mut frame, 0, &rules, &mut stats);
        assert_eq!(stats.diagnostics.len(), 1);
    }
}
