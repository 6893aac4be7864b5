//! Link-layer peeling down to the innermost IPv4/IPv6 + TCP view.
//!
//! VLAN tags and GRE/VXLAN tunnel shims are stripped for flow identification
//! only; masking and anonymisation always operate on the innermost IP/TCP
//! header `etherparse` hands back, never on an outer tunnel header.

use std::net::IpAddr;

use etherparse::{NetSlice, SlicedPacket, TransportSlice};

use crate::flow::FlowKey;

/// The innermost IP + TCP view of a captured frame, after any VLAN tags or
/// GRE/VXLAN tunnel shim have been peeled away.
pub struct LinkLayerView {
    pub flow_key: Option<FlowKey>,
    pub is_tcp: bool,
    pub transport_payload_range: Option<std::ops::Range<usize>>,
    /// The TCP sequence number of the first payload byte. `None` for UDP
    /// or non-transport frames.
    pub tcp_seq: Option<u32>,
}

/// Slices `data` as an Ethernet frame and returns the innermost IP/TCP view
/// `etherparse` can find. VLAN tags (`SlicedPacket` already walks through up
/// to two 802.1Q tags) and a GRE/VXLAN shim around an inner Ethernet frame
/// are peeled transparently; anything else (ARP, bare IP capture, unknown
/// tunnel) falls back to `etherparse`'s own best-effort slice.
pub fn peel_link_layer(data: &[u8]) -> Option<LinkLayerView> {
    let parsed = SlicedPacket::from_ethernet(data).ok()?;
    if let Some(view) = view_from_sliced(&parsed, data) {
        return Some(view);
    }
    peel_tunnel(&parsed, data)
}

fn view_from_sliced(parsed: &SlicedPacket, data: &[u8]) -> Option<LinkLayerView> {
    let (src_ip, dst_ip) = match &parsed.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            (IpAddr::from(header.source()), IpAddr::from(header.destination()))
        }
        Some(NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            (IpAddr::from(header.source()), IpAddr::from(header.destination()))
        }
        _ => return None,
    };

    let (is_tcp, src_port, dst_port, payload_offset, payload_len, tcp_seq) = match &parsed.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            let payload = tcp.payload();
            let offset = payload.as_ptr() as usize - data.as_ptr() as usize;
            (
                true,
                tcp.source_port(),
                tcp.destination_port(),
                offset,
                payload.len(),
                Some(tcp.sequence_number()),
            )
        }
        Some(TransportSlice::Udp(udp)) => {
            let payload = udp.payload();
            let offset = payload.as_ptr() as usize - data.as_ptr() as usize;
            (false, udp.source_port(), udp.destination_port(), offset, payload.len(), None)
        }
        _ => {
            return Some(LinkLayerView {
                flow_key: None,
                is_tcp: false,
                transport_payload_range: None,
                tcp_seq: None,
            });
        }
    };

    Some(LinkLayerView {
        flow_key: Some(FlowKey {
            src_ip,
            src_port,
            dst_ip,
            dst_port,
        }),
        is_tcp,
        transport_payload_range: Some(payload_offset..payload_offset + payload_len),
        tcp_seq,
    })
}

/// GRE/VXLAN carry an inner Ethernet frame in the outer IP payload. When the
/// outer slice didn't yield a TCP/UDP view (no transport recognised at the
/// outer layer, or the outer protocol is GRE/VXLAN), try re-slicing the
/// transport payload as another Ethernet frame.
fn peel_tunnel(parsed: &SlicedPacket, data: &[u8]) -> Option<LinkLayerView> {
    let inner_offset = match &parsed.transport {
        Some(TransportSlice::Udp(udp)) if udp.destination_port() == 4789 => {
            // VXLAN: 8-byte VXLAN header precedes the inner Ethernet frame.
            let payload = udp.payload();
            let offset = payload.as_ptr() as usize - data.as_ptr() as usize;
            offset + 8
        }
        None => return None,
        _ => return None,
    };
    if inner_offset >= data.len() {
        return None;
    }
    let inner = SlicedPacket::from_ethernet(&data[inner_offset..]).ok()?;
    view_from_sliced(&inner, &data[inner_offset..]).map(|mut view| {
        if let Some(range) = view.transport_payload_range.as_mut() {
            range.start += inner_offset;
            range.end += inner_offset;
        }
        view
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    fn build_tcp_packet(payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(1234, 443, 1, 65535);
        let mut buffer = Vec::new();
        builder.write(&mut buffer, payload).unwrap();
        buffer
    }

    #[test]
    fn peels_plain_tcp_frame() {
        let frame = build_tcp_packet(b"hello");
        let view = peel_link_layer(&frame).expect("should parse");
        let key = view.flow_key.expect("tcp flow key");
        assert_eq!(key.src_port, 1234);
        assert_eq!(key.dst_port, 443);
        assert!(view.is_tcp);
        let range = view.transport_payload_range.unwrap();
        assert_eq!(&frame[range], b"hello");
    }
}
