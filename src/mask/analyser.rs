//! Mask stage, pass 1: per-flow TCP reassembly and cross-segment TLS record
//! parsing.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::capture::link::peel_link_layer;
use crate::capture::CaptureReader;
use crate::errors::MaskError;
use crate::flow::DirectionalFlowId;
use crate::stats::Diagnostic;

use super::record::{RecordFrameSpan, TlsContentType, TlsRecordDescriptor, TlsRecordHeader};

/// Either analyser arm implements this; the rule generator only ever sees
/// `Vec<TlsRecordDescriptor>` and doesn't know which arm produced it.
pub trait TlsAnalyser {
    fn analyse(&self, capture_path: &Path) -> Result<AnalyserOutput, MaskError>;
}

/// The tagged choice between the two analyser arms, replacing a dynamic
/// dispatch over stage-mode strings.
pub enum MaskStrategy {
    InProcess,
    External { path: std::path::PathBuf, timeout: std::time::Duration },
}

impl MaskStrategy {
    pub fn analyse(&self, capture_path: &Path) -> AnalyserOutput {
        match self {
            MaskStrategy::InProcess => {
                InProcessAnalyser.analyse(capture_path).unwrap_or_else(|e| {
                    log::error!("in-process TLS analyser failed: {e}");
                    AnalyserOutput::default()
                })
            }
            MaskStrategy::External { path, timeout } => {
                let external = super::external::ExternalAnalyser {
                    path: path.clone(),
                    timeout: *timeout,
                };
                match external.analyse(capture_path) {
                    Ok(output) => output,
                    Err(e) => {
                        log::warn!("external TLS analyser unavailable ({e}), falling back to in-process");
                        let mut output = InProcessAnalyser.analyse(capture_path).unwrap_or_default();
                        output
                            .diagnostics
                            .push(Diagnostic::AnalyserFallback { reason: e.to_string() });
                        output
                    }
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct AnalyserOutput {
    pub records: Vec<TlsRecordDescriptor>,
    pub diagnostics: Vec<Diagnostic>,
}

const RESYNC_BUDGET: u32 = 4096;

struct FlowState {
    next_seq: Option<u32>,
    pending: BTreeMap<u32, (usize, usize, Vec<u8>)>,
    assembled: Vec<u8>,
    origins: Vec<(usize, usize)>,
    parse_cursor: usize,
    resync_used: u32,
}

impl FlowState {
    fn new() -> Self {
        Self {
            next_seq: None,
            pending: BTreeMap::new(),
            assembled: Vec::new(),
            origins: Vec::new(),
            parse_cursor: 0,
            resync_used: 0,
        }
    }

    fn push_segment(&mut self, frame_index: usize, seq: u32, mut payload_offset: usize, mut payload: &[u8]) {
        if payload.is_empty() {
            return;
        }

        let next = match self.next_seq {
            None => {
                self.next_seq = Some(seq);
                seq
            }
            Some(n) => n,
        };

        // Already fully consumed (retransmission).
        let consumed_past = seq.wrapping_add(payload.len() as u32).wrapping_sub(next) as i32;
        if consumed_past <= 0 {
            return;
        }
        // Partially retransmitted: trim the already-seen prefix.
        let behind = next.wrapping_sub(seq) as i32;
        if behind > 0 && (behind as usize) < payload.len() {
            let trim = behind as usize;
            payload = &payload[trim..];
            payload_offset += trim;
        } else if behind > 0 {
            return;
        }

        let effective_seq = if seq.wrapping_sub(next) as i32 >= 0 { seq } else { next };

        if effective_seq == self.next_seq.unwrap() {
            self.append_contiguous(frame_index, payload_offset, payload);
            self.drain_pending();
        } else {
            self.pending.insert(effective_seq, (frame_index, payload_offset, payload.to_vec()));
        }
    }

    fn append_contiguous(&mut self, frame_index: usize, payload_offset: usize, payload: &[u8]) {
        self.assembled.extend_from_slice(payload);
        for i in 0..payload.len() {
            self.origins.push((frame_index, payload_offset + i));
        }
        self.next_seq = Some(self.next_seq.unwrap().wrapping_add(payload.len() as u32));
    }

    fn drain_pending(&mut self) {
        loop {
            let next = self.next_seq.unwrap();
            let Some((&seq, _)) = self.pending.iter().next() else {
                break;
            };
            if seq != next {
                break;
            }
            let (frame_index, payload_offset, payload) = self.pending.remove(&seq).unwrap();
            self.append_contiguous(frame_index, payload_offset, &payload);
        }
    }

    fn parse_ready_records(&mut self, descriptors: &mut Vec<TlsRecordDescriptor>) {
        loop {
            let remaining = self.assembled.len() - self.parse_cursor;
            if remaining < TlsRecordHeader::WIRE_LEN {
                return;
            }
            let header_bytes = &self.assembled[self.parse_cursor..self.parse_cursor + TlsRecordHeader::WIRE_LEN];
            let header = match TlsRecordHeader::parse(header_bytes) {
                Ok((_, h)) => h,
                Err(_) => {
                    self.resync(descriptors);
                    continue;
                }
            };

            if !header.content_type.is_recognised() || !is_valid_tls_version(header.version_major, header.version_minor) {
                self.resync(descriptors);
                continue;
            }

            let total_len = TlsRecordHeader::WIRE_LEN + header.length as usize;
            if remaining < total_len {
                return;
            }

            let spans = self.build_spans(self.parse_cursor, total_len);
            descriptors.push(TlsRecordDescriptor {
                content_type: header.content_type,
                length: header.length,
                is_complete: true,
                spans,
            });
            self.parse_cursor += total_len;
        }
    }

    fn resync(&mut self, _descriptors: &mut [TlsRecordDescriptor]) {
        if self.resync_used >= RESYNC_BUDGET {
            self.parse_cursor = self.assembled.len();
            return;
        }
        self.resync_used += 1;
        self.parse_cursor += 1;
    }

    fn build_spans(&self, start: usize, len: usize) -> Vec<RecordFrameSpan> {
        let mut spans: Vec<RecordFrameSpan> = Vec::new();
        for &(frame_index, offset) in &self.origins[start..start + len] {
            match spans.last_mut() {
                Some(last) if last.frame_index == frame_index && last.byte_range.end == offset => {
                    last.byte_range.end = offset + 1;
                }
                _ => spans.push(RecordFrameSpan {
                    frame_index,
                    byte_range: offset..offset + 1,
                }),
            }
        }
        spans
    }

    fn flush_incomplete(&mut self, descriptors: &mut Vec<TlsRecordDescriptor>) {
        let remaining = self.assembled.len() - self.parse_cursor;
        if remaining == 0 {
            return;
        }
        let spans = self.build_spans(self.parse_cursor, remaining);
        let content_type = if remaining >= 1 {
            TlsContentType::from(self.assembled[self.parse_cursor])
        } else {
            TlsContentType::Unknown(0)
        };
        descriptors.push(TlsRecordDescriptor {
            content_type,
            length: remaining.saturating_sub(TlsRecordHeader::WIRE_LEN) as u16,
            is_complete: false,
            spans,
        });
        self.parse_cursor = self.assembled.len();
    }
}

fn is_valid_tls_version(major: u8, minor: u8) -> bool {
    matches!((major, minor), (3, 0) | (3, 1) | (3, 2) | (3, 3) | (3, 4))
}

pub struct InProcessAnalyser;

impl TlsAnalyser for InProcessAnalyser {
    fn analyse(&self, capture_path: &Path) -> Result<AnalyserOutput, MaskError> {
        let reader = CaptureReader::open(capture_path)?;
        let mut flows: HashMap<DirectionalFlowId, FlowState> = HashMap::new();
        let mut descriptors = Vec::new();
        let mut diagnostics = Vec::new();

        for (frame_index, frame_result) in reader.enumerate() {
            let frame = frame_result?;
            let Some(view) = peel_link_layer(&frame.data) else {
                continue;
            };
            if !view.is_tcp {
                continue;
            }
            let (Some(flow_key), Some(range), Some(seq)) = (view.flow_key, view.transport_payload_range, view.tcp_seq)
            else {
                continue;
            };
            if range.is_empty() {
                continue;
            }

            let (canonical_key, direction) = flow_key.canonical();
            let flow_id = DirectionalFlowId {
                key: canonical_key,
                direction,
            };
            let state = flows.entry(flow_id).or_insert_with(FlowState::new);
            state.push_segment(frame_index, seq, range.start, &frame.data[range]);
            state.parse_ready_records(&mut descriptors);
        }

        for (_, mut state) in flows {
            state.parse_ready_records(&mut descriptors);
            state.flush_incomplete(&mut descriptors);
        }

        Ok(AnalyserOutput { records: descriptors, diagnostics: std::mem::take(&mut diagnostics) })
    }
}
