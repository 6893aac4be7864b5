//! TLS record framing: content type, the 5-byte header, and the descriptor
//! the analyser emits for every record it recognises.

use nom::number::complete::be_u16;
use nom::IResult;
use nom_derive::{Nom, Parse};
use serde::Serialize;

/// TLS record content type, mapped the way the crate maps wire enums
/// elsewhere: a `From<u8>` with an explicit fallback variant rather than a
/// parse error, so a resync loop can inspect the byte that didn't match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TlsContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Heartbeat,
    Unknown(u8),
}

impl TlsContentType {
    pub fn value(self) -> u8 {
        match self {
            TlsContentType::ChangeCipherSpec => 20,
            TlsContentType::Alert => 21,
            TlsContentType::Handshake => 22,
            TlsContentType::ApplicationData => 23,
            TlsContentType::Heartbeat => 24,
            TlsContentType::Unknown(v) => v,
        }
    }

    /// Whether this is one of the five content types the analyser parses
    /// records for. Anything else is a resync boundary.
    pub fn is_recognised(self) -> bool {
        !matches!(self, TlsContentType::Unknown(_))
    }
}

impl From<u8> for TlsContentType {
    fn from(value: u8) -> Self {
        match value {
            20 => TlsContentType::ChangeCipherSpec,
            21 => TlsContentType::Alert,
            22 => TlsContentType::Handshake,
            23 => TlsContentType::ApplicationData,
            24 => TlsContentType::Heartbeat,
            other => TlsContentType::Unknown(other),
        }
    }
}

/// The 5-byte TLS record header: content type, protocol version, and the
/// big-endian length of the record body that follows.
#[derive(Debug, Clone, Copy, Nom)]
pub struct TlsRecordHeader {
    #[nom(Map = "TlsContentType::from", Parse = "nom::number::complete::be_u8")]
    pub content_type: TlsContentType,
    pub version_major: u8,
    pub version_minor: u8,
    #[nom(Parse = "be_u16")]
    pub length: u16,
}

impl TlsRecordHeader {
    pub const WIRE_LEN: usize = 5;

    pub fn parse(input: &[u8]) -> IResult<&[u8], TlsRecordHeader> {
        TlsRecordHeader::parse_be(input)
    }
}

/// Where in the reassembled flow byte stream one frame's contribution to a
/// TLS record lives, and what span of the frame's own bytes that is.
#[derive(Debug, Clone, Serialize)]
pub struct RecordFrameSpan {
    pub frame_index: usize,
    pub byte_range: std::ops::Range<usize>,
}

/// One fully- or partially-observed TLS record, as emitted by either
/// analyser arm.
#[derive(Debug, Clone, Serialize)]
pub struct TlsRecordDescriptor {
    pub content_type: TlsContentType,
    /// Total record length per the header (header excluded).
    pub length: u16,
    /// True once every byte of the record (header + body) has been
    /// observed in the reassembled stream.
    pub is_complete: bool,
    /// Every frame this record's bytes (header and/or body) touch, in
    /// stream order.
    pub spans: Vec<RecordFrameSpan>,
}
