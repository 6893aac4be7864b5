//! Deterministic, prefix-preserving IP anonymisation.

pub mod checksum;
pub mod ip_map;

use std::net::IpAddr;

use etherparse::{NetSlice, SlicedPacket, TransportSlice};

use crate::errors::AnonymiseError;
use crate::frame::Frame;
use crate::stats::{AnonymiseStats, Diagnostic};
use ip_map::IpMap;

#[derive(Debug, Clone, Copy)]
enum TransportKind {
    Tcp,
    Udp,
}

struct Located {
    ip_version: u8,
    ip_header_range: std::ops::Range<usize>,
    src_range: std::ops::Range<usize>,
    dst_range: std::ops::Range<usize>,
    transport: Option<(TransportKind, std::ops::Range<usize>)>,
}

/// Finds the byte ranges of the innermost IP header's address fields and
/// (if present) the transport header, by pointer arithmetic against the
/// immutable `etherparse` slice view. Returns `None` for non-IP frames or
/// frames whose declared header length exceeds the captured bytes.
fn locate(data: &[u8]) -> Option<Located> {
    let parsed = SlicedPacket::from_ethernet(data).ok()?;
    let base = data.as_ptr() as usize;

    let (ip_version, ip_header_range, src_range, dst_range) = match &parsed.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            let slice = header.slice();
            let offset = slice.as_ptr() as usize - base;
            if offset + slice.len() > data.len() {
                return None;
            }
            (4u8, offset..offset + slice.len(), offset + 12..offset + 16, offset + 16..offset + 20)
        }
        Some(NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            let slice = header.slice();
            let offset = slice.as_ptr() as usize - base;
            if offset + slice.len() > data.len() {
                return None;
            }
            (6u8, offset..offset + slice.len(), offset + 8..offset + 24, offset + 24..offset + 40)
        }
        _ => return None,
    };

    let transport = match &parsed.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            let slice = tcp.slice();
            let start = slice.as_ptr() as usize - base;
            let payload = tcp.payload();
            let end = payload.as_ptr() as usize - base + payload.len();
            Some((TransportKind::Tcp, start..end))
        }
        Some(TransportSlice::Udp(udp)) => {
            let slice = udp.slice();
            let start = slice.as_ptr() as usize - base;
            let payload = udp.payload();
            let end = payload.as_ptr() as usize - base + payload.len();
            Some((TransportKind::Udp, start..end))
        }
        _ => None,
    };

    Some(Located {
        ip_version,
        ip_header_range,
        src_range,
        dst_range,
        transport,
    })
}

pub struct AnonymiseStage {
    ip_map: IpMap,
    stats: AnonymiseStats,
}

impl AnonymiseStage {
    pub fn new(seed: [u8; 32], prefix_v4: u8, prefix_v6: u8) -> Self {
        Self {
            ip_map: IpMap::new(seed, prefix_v4, prefix_v6),
            stats: AnonymiseStats::default(),
        }
    }

    /// Rewrites `frame`'s IP addresses in place. `frame_index` is used only
    /// for diagnostics. Never returns an error for a malformed header: that
    /// case is recorded as a diagnostic and the frame is left unchanged.
    pub fn process(&mut self, frame: &mut Frame, frame_index: usize) -> Result<(), AnonymiseError> {
        self.stats.frames_in += 1;

        let located = match locate(&frame.data) {
            Some(l) => l,
            None => return Ok(()),
        };

        let (old_src, old_dst) = match located.ip_version {
            4 => (
                ipv4_from_slice(&frame.data[located.src_range.clone()]),
                ipv4_from_slice(&frame.data[located.dst_range.clone()]),
            ),
            _ => (
                ipv6_from_slice(&frame.data[located.src_range.clone()]),
                ipv6_from_slice(&frame.data[located.dst_range.clone()]),
            ),
        };

        let new_src = self.ip_map.map(old_src);
        let new_dst = self.ip_map.map(old_dst);

        if new_src == old_src && new_dst == old_dst {
            return Ok(());
        }

        write_addr(&mut frame.data, located.src_range.clone(), new_src);
        write_addr(&mut frame.data, located.dst_range.clone(), new_dst);

        if located.ip_version == 4 {
            let header = &mut frame.data[located.ip_header_range.clone()];
            checksum::recompute_ipv4_header_checksum(header);
        }

        if let Some((kind, range)) = located.transport {
            let segment = &mut frame.data[range];
            match (located.ip_version, kind) {
                (4, TransportKind::Tcp) => {
                    checksum::recompute_tcp_checksum_v4(v4_bytes(new_src), v4_bytes(new_dst), segment)
                }
                (4, TransportKind::Udp) => {
                    checksum::recompute_udp_checksum_v4(v4_bytes(new_src), v4_bytes(new_dst), segment)
                }
                (_, TransportKind::Tcp) => {
                    checksum::recompute_tcp_checksum_v6(v6_bytes(new_src), v6_bytes(new_dst), segment)
                }
                (_, TransportKind::Udp) => {
                    checksum::recompute_udp_checksum_v6(v6_bytes(new_src), v6_bytes(new_dst), segment)
                }
            }
        }

        self.stats.frames_rewritten += 1;
        let _ = frame_index;
        Ok(())
    }

    pub fn record_malformed(&mut self, frame_index: usize, reason: String) {
        self.stats.diagnostics.push(Diagnostic::MalformedIpHeader { frame_index, reason });
    }

    pub fn finish(mut self) -> AnonymiseStats {
        self.stats.unique_ips_v4 = self.ip_map.unique_v4_count();
        self.stats.unique_ips_v6 = self.ip_map.unique_v6_count();
        self.stats
    }
}

fn ipv4_from_slice(bytes: &[u8]) -> IpAddr {
    IpAddr::from([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn ipv6_from_slice(bytes: &[u8]) -> IpAddr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(bytes);
    IpAddr::from(octets)
}

fn v4_bytes(addr: IpAddr) -> [u8; 4] {
    match addr {
        IpAddr::V4(v4) => v4.octets(),
        IpAddr::V6(_) => unreachable!("v4 transport checksum requested for a v6 address"),
    }
}

fn v6_bytes(addr: IpAddr) -> [u8; 16] {
    match addr {
        IpAddr::V6(v6) => v6.octets(),
        IpAddr::V4(_) => unreachable!("v6 transport checksum requested for a v4 address"),
    }
}

fn write_addr(data: &mut [u8], range: std::ops::Range<usize>, addr: IpAddr) {
    match addr {
        IpAddr::V4(v4) => data[range].copy_from_slice(&v4.octets()),
        IpAddr::V6(v6) => data[range].copy_from_slice(&v6.octets()),
    }
}
