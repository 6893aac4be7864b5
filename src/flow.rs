//! Flow identity: the 4-tuple a TCP segment belongs to, directional enough
//! to tell a request from its response.

use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct FlowKey {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
}

impl FlowKey {
    /// The key with source and destination swapped — the other direction
    /// of the same flow sees this.
    pub fn reversed(&self) -> FlowKey {
        FlowKey {
            src_ip: self.dst_ip,
            src_port: self.dst_port,
            dst_ip: self.src_ip,
            dst_port: self.src_port,
        }
    }

    /// A canonical key shared by both directions of a flow, with the
    /// numerically smaller endpoint first. Used to group both halves of a
    /// connection under one reassembly entry.
    pub fn canonical(&self) -> (FlowKey, Direction) {
        let reversed = self.reversed();
        if (self.src_ip, self.src_port) <= (self.dst_ip, self.dst_port) {
            (*self, Direction::Forward)
        } else {
            (reversed, Direction::Reverse)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Direction {
    Forward,
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct DirectionalFlowId {
    pub key: FlowKey,
    pub direction: Direction,
}
