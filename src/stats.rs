//! Per-stage statistics and recoverable-condition diagnostics.
//!
//! Every stage records diagnostics here instead of raising an error for a
//! condition it can recover from on its own (a clamped rule boundary, a
//! malformed IP header it chose to pass through unchanged). Nothing is
//! swallowed silently: it either becomes an `Err`, or it becomes an entry
//! in one of these reports.

use serde::Serialize;

/// A recoverable condition observed while processing a single frame.
#[derive(Debug, Clone, Serialize)]
pub enum Diagnostic {
    /// A mask rule's byte range was clamped to the frame's actual length.
    BoundaryClamp { frame_index: usize, requested_end: usize, clamped_end: usize },
    /// An IP header failed to parse; the frame passed through unmodified.
    MalformedIpHeader { frame_index: usize, reason: String },
    /// The external TLS analyser was unavailable or timed out; the stage
    /// fell back to the in-process analyser for the rest of the file.
    AnalyserFallback { reason: String },
    /// A TCP segment could not be reassembled into the flow's byte stream
    /// (out-of-window sequence number, retransmission mismatch) and was
    /// skipped for TLS record boundary detection.
    ReassemblyGap { flow: String, frame_index: usize },
}

/// Statistics produced by the Dedup stage for one file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupStats {
    pub frames_in: u64,
    pub frames_out: u64,
    pub duplicates_removed: u64,
}

/// Statistics produced by the Anonymise stage for one file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnonymiseStats {
    pub frames_in: u64,
    pub frames_rewritten: u64,
    pub unique_ips_v4: u64,
    pub unique_ips_v6: u64,
    pub diagnostics: Vec<Diagnostic>,
}

/// Statistics produced by the Mask stage (both passes) for one file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaskStats {
    pub frames_in: u64,
    pub frames_masked: u64,
    pub tls_records_seen: u64,
    pub application_data_records_masked: u64,
    pub rules_generated: u64,
    pub bytes_zeroed: u64,
    pub diagnostics: Vec<Diagnostic>,
}

/// The combined outcome of running a whole pipeline over one file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub dedup: Option<DedupStats>,
    pub anonymise: Option<AnonymiseStats>,
    pub mask: Option<MaskStats>,
    pub elapsed_ms: u64,
}

impl PipelineStats {
    pub fn total_diagnostics(&self) -> usize {
        let anon = self.anonymise.as_ref().map_or(0, |s| s.diagnostics.len());
        let mask = self.mask.as_ref().map_or(0, |s| s.diagnostics.len());
        anon + mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_stats_counts_diagnostics_across_stages() {
        let mut stats = PipelineStats::default();
        stats.anonymise = Some(AnonymiseStats {
            diagnostics: vec![Diagnostic::MalformedIpHeader {
                frame_index: 3,
                reason: "short header".into(),
            }],
            ..Default::default()
        });
        stats.mask = Some(MaskStats {
            diagnostics: vec![Diagnostic::BoundaryClamp {
                frame_index: 5,
                requested_end: 200,
                clamped_end: 150,
            }],
            ..Default::default()
        });
        assert_eq!(stats.total_diagnostics(), 2);
    }
}
