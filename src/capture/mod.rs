//! PCAP/PCAPNG codec: format detection, byte-exact streaming read, and
//! round-trip-faithful write.
//!
//! Grounded on `pcap_file` for both reader and writer pairs, and on
//! `etherparse` (already a dev-dependency of the crate this one was built
//! from) for peeling link-layer headers out of the bytes it hands back.

pub mod link;

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom};
use std::path::Path;

use pcap_file::pcap::{PcapHeader, PcapPacket, PcapReader, PcapWriter};
use pcap_file::pcapng::blocks::interface_description::{InterfaceDescriptionBlock, InterfaceDescriptionOption};
use pcap_file::pcapng::{Block, PcapNgReader, PcapNgWriter};
use pcap_file::DataLink;

use crate::errors::CaptureError;
use crate::frame::{Frame, TsResolution};

const PCAP_MAGIC_LE: [u8; 4] = [0xD4, 0xC3, 0xB2, 0xA1];
const PCAP_MAGIC_BE: [u8; 4] = [0xA1, 0xB2, 0xC3, 0xD4];
const PCAP_NS_MAGIC_LE: [u8; 4] = [0x4D, 0x3C, 0xB2, 0xA1];
const PCAP_NS_MAGIC_BE: [u8; 4] = [0xA1, 0xB2, 0x3C, 0x4D];
const PCAP_NG_MAGIC: [u8; 4] = [0x0A, 0x0D, 0x0D, 0x0A];

/// Which of the two capture file container families a file's magic bytes
/// identify. Doesn't carry resolution: classic-PCAP resolution is read back
/// out of `pcap_file`'s own parsed header rather than re-derived from the
/// magic bytes here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Pcap,
    PcapNg,
}

fn detect_container(magic: [u8; 4]) -> Result<Container, CaptureError> {
    match magic {
        PCAP_MAGIC_LE | PCAP_MAGIC_BE | PCAP_NS_MAGIC_LE | PCAP_NS_MAGIC_BE => Ok(Container::Pcap),
        PCAP_NG_MAGIC => Ok(Container::PcapNg),
        other => Err(CaptureError::UnsupportedFormat {
            reason: format!("unrecognised magic bytes {other:02x?}"),
        }),
    }
}

fn pcap_file_resolution(resolution: pcap_file::TsResolution) -> TsResolution {
    match resolution {
        pcap_file::TsResolution::MicroSecond => TsResolution::Micros,
        pcap_file::TsResolution::NanoSecond => TsResolution::Nanos,
    }
}

/// One interface as declared by a PCAPNG Interface Description Block, kept
/// independent of the reader's borrowed block lifetime so it can travel from
/// a `CaptureReader` into a later `CaptureWriter::create_like` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureInterface {
    pub datalink: DataLink,
    pub snaplen: u32,
    pub ts_resolution: TsResolution,
}

impl CaptureInterface {
    fn resolution_from_options(options: &[InterfaceDescriptionOption]) -> TsResolution {
        options
            .iter()
            .find_map(|opt| match opt {
                InterfaceDescriptionOption::IfTsResol(reso) => Some(if *reso & 0x80 == 0 {
                    TsResolution::Micros
                } else {
                    TsResolution::Nanos
                }),
                _ => None,
            })
            .unwrap_or(TsResolution::Micros)
    }
}

/// Which of the two capture file families a file's magic bytes identify, as
/// used by the writer to reconstruct a matching file: classic PCAP carries a
/// resolution tag, PCAPNG carries the source interfaces to reproduce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureFormat {
    Pcap { ts_resolution: TsResolution },
    PcapNg { interfaces: Vec<CaptureInterface> },
}

fn duration_to_frame_fields(d: std::time::Duration, resolution: TsResolution) -> (i64, u32) {
    let secs = d.as_secs() as i64;
    let frac = match resolution {
        TsResolution::Micros => d.subsec_micros(),
        TsResolution::Nanos => d.subsec_nanos(),
    };
    (secs, frac)
}

fn frame_to_duration(frame: &Frame) -> std::time::Duration {
    match frame.ts_resolution {
        TsResolution::Micros => std::time::Duration::new(frame.ts_secs as u64, frame.ts_frac * 1_000),
        TsResolution::Nanos => std::time::Duration::new(frame.ts_secs as u64, frame.ts_frac),
    }
}

/// Turns a non-interface PCAPNG block into a `Frame`, or `None` for block
/// kinds this codec doesn't carry frame data for (name resolution, decryption
/// secrets, custom blocks, …).
fn block_to_frame(block: Block, resolution: TsResolution) -> Option<Frame> {
    let (ts_units, orig_len, data) = match block {
        Block::SimplePacket(packet) => (0u64, packet.orig_len, packet.data.into_owned()),
        Block::EnhancedPacket(packet) => (
            packet.timestamp.as_micros() as u64,
            packet.orig_len,
            packet.data.into_owned(),
        ),
        Block::Packet(packet) => (packet.timestamp as u64, packet.orig_len, packet.data.into_owned()),
        _ => return None,
    };
    let ts_secs = (ts_units / 1_000_000) as i64;
    let ts_frac = (ts_units % 1_000_000) as u32;
    Some(Frame::new(ts_secs, ts_frac, resolution, orig_len, data))
}

/// Streams frames out of a capture file, hiding the classic-PCAP vs.
/// PCAPNG distinction behind one [`Iterator`].
pub enum CaptureReader {
    Pcap {
        reader: PcapReader<BufReader<File>>,
        resolution: TsResolution,
    },
    PcapNg {
        reader: PcapNgReader<BufReader<File>>,
        interfaces: Vec<CaptureInterface>,
        resolution: TsResolution,
        /// The first packet-carrying block read while scanning past the
        /// leading Interface Description Blocks during `open`, held back so
        /// `next` still yields it in order.
        pending: Option<Frame>,
    },
}

impl CaptureReader {
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let mut file = File::open(path).map_err(|e| CaptureError::Io {
            context: format!("opening {}", path.display()),
            message: e.to_string(),
        })?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic).map_err(|e| CaptureError::Io {
            context: format!("reading magic bytes of {}", path.display()),
            message: e.to_string(),
        })?;
        file.seek(SeekFrom::Start(0)).map_err(|e| CaptureError::Io {
            context: format!("rewinding {}", path.display()),
            message: e.to_string(),
        })?;

        let container = detect_container(magic)?;
        let buffered = BufReader::new(file);

        match container {
            Container::Pcap => {
                let reader = PcapReader::new(buffered).map_err(|e| CaptureError::UnsupportedFormat {
                    reason: e.to_string(),
                })?;
                let resolution = pcap_file_resolution(reader.header().ts_resolution);
                Ok(CaptureReader::Pcap { reader, resolution })
            }
            Container::PcapNg => {
                let mut reader = PcapNgReader::new(buffered).map_err(|e| CaptureError::UnsupportedFormat {
                    reason: e.to_string(),
                })?;

                let mut interfaces = Vec::new();
                let mut resolution = TsResolution::Micros;
                let mut pending = None;

                loop {
                    let Some(block_result) = reader.next_block() else {
                        break;
                    };
                    let block = block_result.map_err(|e| CaptureError::UnsupportedFormat { reason: e.to_string() })?;
                    match block {
                        Block::InterfaceDescription(iface) => {
                            resolution = CaptureInterface::resolution_from_options(&iface.options);
                            interfaces.push(CaptureInterface {
                                datalink: iface.linktype,
                                snaplen: iface.snaplen,
                                ts_resolution: resolution,
                            });
                        }
                        other => {
                            pending = block_to_frame(other, resolution);
                            break;
                        }
                    }
                }

                Ok(CaptureReader::PcapNg {
                    reader,
                    interfaces,
                    resolution,
                    pending,
                })
            }
        }
    }

    /// The interfaces declared by the source file. Empty for classic PCAP
    /// (which has no interface concept beyond its one global header) and for
    /// a PCAPNG file whose Interface Description Blocks haven't been
    /// reached yet.
    pub fn interfaces(&self) -> &[CaptureInterface] {
        match self {
            CaptureReader::Pcap { .. } => &[],
            CaptureReader::PcapNg { interfaces, .. } => interfaces,
        }
    }

    /// The link type frames are encoded in, once known.
    pub fn datalink(&self) -> Option<DataLink> {
        match self {
            CaptureReader::Pcap { reader, .. } => Some(reader.header().datalink),
            CaptureReader::PcapNg { interfaces, .. } => interfaces.first().map(|i| i.datalink),
        }
    }
}

impl Iterator for CaptureReader {
    type Item = Result<Frame, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            CaptureReader::Pcap { reader, resolution } => {
                let packet: PcapPacket = match reader.next_packet()? {
                    Ok(p) => p,
                    Err(e) => {
                        return Some(Err(CaptureError::TruncatedFile { frames_recovered: 0 }
                            .pair_with_reason(e.to_string())))
                    }
                };
                let (ts_secs, ts_frac) = duration_to_frame_fields(packet.timestamp, *resolution);
                Some(Ok(Frame::new(
                    ts_secs,
                    ts_frac,
                    *resolution,
                    packet.orig_len,
                    packet.data.into_owned(),
                )))
            }
            CaptureReader::PcapNg {
                reader,
                interfaces,
                resolution,
                pending,
            } => {
                if let Some(frame) = pending.take() {
                    return Some(Ok(frame));
                }
                loop {
                    let block = match reader.next_block() {
                        Some(Ok(b)) => b,
                        Some(Err(e)) => {
                            return Some(Err(CaptureError::TruncatedFile { frames_recovered: 0 }
                                .pair_with_reason(e.to_string())))
                        }
                        None => return None,
                    };

                    match block {
                        Block::InterfaceDescription(iface) => {
                            *resolution = CaptureInterface::resolution_from_options(&iface.options);
                            interfaces.push(CaptureInterface {
                                datalink: iface.linktype,
                                snaplen: iface.snaplen,
                                ts_resolution: *resolution,
                            });
                            continue;
                        }
                        other => {
                            if let Some(frame) = block_to_frame(other, *resolution) {
                                return Some(Ok(frame));
                            }
                            continue;
                        }
                    }
                }
            }
        }
    }
}

impl CaptureError {
    fn pair_with_reason(self, reason: String) -> CaptureError {
        match self {
            CaptureError::TruncatedFile { frames_recovered } => {
                CaptureError::Io {
                    context: format!("{frames_recovered} frames recovered before failure"),
                    message: reason,
                }
            }
            other => other,
        }
    }
}

/// Writes frames back out in either capture family, constructed to match
/// the format and link type the source `CaptureReader` detected so the
/// round-trip identity contract holds.
pub enum CaptureWriter {
    Pcap(PcapWriter<BufWriter<File>>),
    PcapNg(PcapNgWriter<BufWriter<File>>),
}

impl CaptureWriter {
    pub fn create_like(path: &Path, format: CaptureFormat) -> Result<Self, CaptureError> {
        let file = File::create(path).map_err(|e| CaptureError::Io {
            context: format!("creating {}", path.display()),
            message: e.to_string(),
        })?;
        let buffered = BufWriter::new(file);

        match format {
            CaptureFormat::Pcap { ts_resolution } => {
                let mut header = PcapHeader::with_datalink(DataLink::ETHERNET);
                header.ts_resolution = match ts_resolution {
                    TsResolution::Micros => pcap_file::TsResolution::MicroSecond,
                    TsResolution::Nanos => pcap_file::TsResolution::NanoSecond,
                };
                let writer = PcapWriter::with_header(buffered, header).map_err(|e| CaptureError::Io {
                    context: "writing pcap header".to_string(),
                    message: e.to_string(),
                })?;
                Ok(CaptureWriter::Pcap(writer))
            }
            CaptureFormat::PcapNg { interfaces } => {
                let mut writer = PcapNgWriter::new(buffered).map_err(|e| CaptureError::Io {
                    context: "writing pcapng section header".to_string(),
                    message: e.to_string(),
                })?;

                // Every EPB names an interface_id; without at least one IDB
                // on disk, interface_id 0 would dangle.
                let interfaces_to_write = if interfaces.is_empty() {
                    vec![CaptureInterface {
                        datalink: DataLink::ETHERNET,
                        snaplen: 0,
                        ts_resolution: TsResolution::Micros,
                    }]
                } else {
                    interfaces
                };

                for iface in &interfaces_to_write {
                    let options = match iface.ts_resolution {
                        TsResolution::Nanos => vec![InterfaceDescriptionOption::IfTsResol(9)],
                        TsResolution::Micros => Vec::new(),
                    };
                    let idb = InterfaceDescriptionBlock {
                        linktype: iface.datalink,
                        snaplen: iface.snaplen,
                        options,
                    };
                    writer
                        .write_block(&Block::InterfaceDescription(idb))
                        .map_err(|e| CaptureError::Io {
                            context: "writing pcapng interface description block".to_string(),
                            message: e.to_string(),
                        })?;
                }

                Ok(CaptureWriter::PcapNg(writer))
            }
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), CaptureError> {
        match self {
            CaptureWriter::Pcap(writer) => {
                let packet = PcapPacket {
                    timestamp: frame_to_duration(frame),
                    orig_len: frame.orig_len,
                    data: std::borrow::Cow::Borrowed(&frame.data),
                };
                writer.write_packet(&packet).map_err(|e| CaptureError::Io {
                    context: "writing pcap packet".to_string(),
                    message: e.to_string(),
                })
            }
            CaptureWriter::PcapNg(writer) => {
                let packet = pcap_file::pcapng::blocks::enhanced_packet::EnhancedPacketBlock {
                    interface_id: 0,
                    timestamp: frame_to_duration(frame),
                    original_len: frame.orig_len,
                    data: std::borrow::Cow::Borrowed(&frame.data),
                    options: Vec::new(),
                };
                writer
                    .write_block(&Block::EnhancedPacket(packet))
                    .map(|_| ())
                    .map_err(|e| CaptureError::Io {
                        context: "writing pcapng block".to_string(),
                        message: e.to_string(),
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_classic_pcap_magic() {
        assert!(matches!(detect_container(PCAP_MAGIC_LE), Ok(Container::Pcap)));
        assert!(matches!(detect_container(PCAP_MAGIC_BE), Ok(Container::Pcap)));
    }

    #[test]
    fn detects_classic_pcap_nanosecond_magic() {
        assert!(matches!(detect_container(PCAP_NS_MAGIC_LE), Ok(Container::Pcap)));
        assert!(matches!(detect_container(PCAP_NS_MAGIC_BE), Ok(Container::Pcap)));
    }

    #[test]
    fn detects_pcapng_magic() {
        assert!(matches!(detect_container(PCAP_NG_MAGIC), Ok(Container::PcapNg)));
    }

    #[test]
    fn rejects_unknown_magic() {
        assert!(detect_container([0, 1, 2, 3]).is_err());
    }

    #[test]
    fn frame_duration_round_trips_microsecond_resolution() {
        let frame = Frame::new(100, 250_000, TsResolution::Micros, 60, vec![0u8; 60]);
        let duration = frame_to_duration(&frame);
        let (secs, frac) = duration_to_frame_fields(duration, TsResolution::Micros);
        assert_eq!(secs, 100);
        assert_eq!(frac, 250_000);
    }

    #[test]
    fn pcapng_round_trip_carries_the_interface_forward() {
        let tmp = std::env::temp_dir().join(format!("capture_pcapng_iface_{}.pcapng", std::process::id()));

        {
            let mut writer = CaptureWriter::create_like(
                &tmp,
                CaptureFormat::PcapNg {
                    interfaces: vec![CaptureInterface {
                        datalink: DataLink::ETHERNET,
                        snaplen: 65535,
                        ts_resolution: TsResolution::Micros,
                    }],
                },
            )
            .unwrap();
            writer
                .write_frame(&Frame::new(0, 0, TsResolution::Micros, 4, vec![1, 2, 3, 4]))
                .unwrap();
        }

        let reader = CaptureReader::open(&tmp).unwrap();
        assert_eq!(reader.interfaces().len(), 1);
        assert_eq!(reader.datalink(), Some(DataLink::ETHERNET));

        let frames: Vec<Frame> = reader.map(|f| f.unwrap()).collect();
        std::fs::remove_file(&tmp).ok();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, vec![1, 2, 3, 4]);
    }
}
