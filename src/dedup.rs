//! Exact duplicate-frame filtering.
//!
//! The fingerprint is a SipHash-based digest (`std::collections::hash_map`'s
//! default hasher, deterministic within a run) over the invariant fields of
//! the innermost IP/TCP or IP/UDP header plus the payload bytes — the IP
//! checksum, TTL, and any transport checksum are left out so retransmissions
//! that only differ there still collide with the original.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use etherparse::{NetSlice, SlicedPacket, TransportSlice};

use crate::frame::Frame;
use crate::stats::DedupStats;

pub struct DedupStage {
    seen: HashSet<u64>,
    stats: DedupStats,
}

impl DedupStage {
    pub fn new() -> Self {
        Self {
            seen: HashSet::new(),
            stats: DedupStats::default(),
        }
    }

    /// Feeds one frame through the stage. Returns `true` if the frame is
    /// the first occurrence of its fingerprint and should be emitted.
    pub fn process(&mut self, frame: &Frame) -> bool {
        self.stats.frames_in += 1;
        let keep = self.seen.insert(fingerprint(frame));
        if keep {
            self.stats.frames_out += 1;
        } else {
            self.stats.duplicates_removed += 1;
        }
        keep
    }

    pub fn stats(&self) -> &DedupStats {
        &self.stats
    }
}

impl Default for DedupStage {
    fn default() -> Self {
        Self::new()
    }
}

fn fingerprint(frame: &Frame) -> u64 {
    let mut hasher = DefaultHasher::new();
    match SlicedPacket::from_ethernet(&frame.data) {
        Ok(parsed) => hash_invariant_fields(&parsed, &frame.data, &mut hasher),
        // Not an Ethernet/IP frame this crate can parse (ARP, malformed):
        // fall back to hashing the raw bytes so the stage still dedups
        // byte-identical frames without failing them.
        Err(_) => frame.data.hash(&mut hasher),
    }
    hasher.finish()
}

fn hash_invariant_fields(parsed: &SlicedPacket, data: &[u8], hasher: &mut DefaultHasher) {
    match &parsed.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            4u8.hash(hasher);
            let protocol: u8 = header.protocol().into();
            protocol.hash(hasher);
            header.source().hash(hasher);
            header.destination().hash(hasher);
            header.total_len().hash(hasher);
        }
        Some(NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            6u8.hash(hasher);
            let next_header: u8 = header.next_header().into();
            next_header.hash(hasher);
            header.source().hash(hasher);
            header.destination().hash(hasher);
            header.payload_length().hash(hasher);
        }
        None => {
            data.hash(hasher);
            return;
        }
    }

    match &parsed.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            tcp.source_port().hash(hasher);
            tcp.destination_port().hash(hasher);
            tcp.sequence_number().hash(hasher);
            tcp.payload().hash(hasher);
        }
        Some(TransportSlice::Udp(udp)) => {
            udp.source_port().hash(hasher);
            udp.destination_port().hash(hasher);
            udp.payload().hash(hasher);
        }
        _ => {}
    }
}
