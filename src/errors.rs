//! Error kinds for every stage, composing into the crate-wide [`CoreError`].
//!
//! Each enum is hand-written with its own [`std::fmt::Display`] rather than
//! derived, the same shape as the crate's single `NetflowError`: explicit
//! variants with named fields carrying the diagnostic context callers need.

use std::path::PathBuf;

use serde::Serialize;

/// Errors from the capture codec.
#[derive(Debug, Clone, Serialize)]
pub enum CaptureError {
    /// File read/write, permission, disk-full. Fatal for the current file.
    Io { context: String, message: String },
    /// Unknown magic bytes or a corrupt block header. Fatal for the current file.
    UnsupportedFormat { reason: String },
    /// EOF within a frame. Not fatal: the stage stops gracefully and the
    /// output contains every frame read before the truncation.
    TruncatedFile { frames_recovered: usize },
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::Io { context, message } => {
                write!(f, "I/O error during {context}: {message}")
            }
            CaptureError::UnsupportedFormat { reason } => {
                write!(f, "unsupported capture format: {reason}")
            }
            CaptureError::TruncatedFile { frames_recovered } => {
                write!(
                    f,
                    "truncated capture file ({frames_recovered} frames recovered before EOF)"
                )
            }
        }
    }
}

impl std::error::Error for CaptureError {}

/// Errors from the Anonymise stage.
///
/// A malformed IP header is deliberately *not* a variant here: it is treated
/// as recoverable (the frame passes through unchanged and a
/// [`crate::stats::Diagnostic::MalformedIpHeader`] is recorded), not a stage
/// failure.
#[derive(Debug, Clone, Serialize)]
pub enum AnonymiseError {
    Capture(CaptureError),
}

impl std::fmt::Display for AnonymiseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnonymiseError::Capture(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AnonymiseError {}

impl From<CaptureError> for AnonymiseError {
    fn from(e: CaptureError) -> Self {
        AnonymiseError::Capture(e)
    }
}

/// Errors from the Mask stage.
#[derive(Debug, Clone, Serialize)]
pub enum MaskError {
    Capture(CaptureError),
    /// Two rules for the same frame overlap. Indicates a parser bug, not a
    /// recoverable condition; fatal for the Mask stage on this file.
    RuleOverlap { frame_index: usize },
    /// The external TLS analysis collaborator is missing or incompatible.
    /// Not surfaced as a stage failure — callers see this only via the
    /// `AnalyserFallback` diagnostic after the stage has already fallen
    /// back to the in-process analyser.
    AnalyserUnavailable { reason: String },
    /// The external collaborator exceeded its configured timeout and was
    /// killed. Same non-fatal treatment as `AnalyserUnavailable`.
    AnalyserTimeout { timeout_ms: u64 },
}

impl std::fmt::Display for MaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaskError::Capture(e) => write!(f, "{e}"),
            MaskError::RuleOverlap { frame_index } => {
                write!(f, "overlapping mask rules for frame {frame_index}")
            }
            MaskError::AnalyserUnavailable { reason } => {
                write!(f, "external TLS analyser unavailable: {reason}")
            }
            MaskError::AnalyserTimeout { timeout_ms } => {
                write!(f, "external TLS analyser timed out after {timeout_ms}ms")
            }
        }
    }
}

impl std::error::Error for MaskError {}

impl From<CaptureError> for MaskError {
    fn from(e: CaptureError) -> Self {
        MaskError::Capture(e)
    }
}

/// Crate-wide error returned by [`crate::pipeline::Pipeline::run`].
#[derive(Debug, Clone, Serialize)]
pub enum CoreError {
    Capture(CaptureError),
    Anonymise(AnonymiseError),
    Mask(MaskError),
    /// Cooperative cancellation from the driver: the current frame finished,
    /// the output file was closed and deleted.
    Cancelled,
    /// The driver's configuration failed validation before any stage ran.
    Config { reason: String },
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::Capture(e) => write!(f, "{e}"),
            CoreError::Anonymise(e) => write!(f, "{e}"),
            CoreError::Mask(e) => write!(f, "{e}"),
            CoreError::Cancelled => write!(f, "pipeline cancelled"),
            CoreError::Config { reason } => write!(f, "invalid pipeline configuration: {reason}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<CaptureError> for CoreError {
    fn from(e: CaptureError) -> Self {
        CoreError::Capture(e)
    }
}

impl From<AnonymiseError> for CoreError {
    fn from(e: AnonymiseError) -> Self {
        CoreError::Anonymise(e)
    }
}

impl From<MaskError> for CoreError {
    fn from(e: MaskError) -> Self {
        CoreError::Mask(e)
    }
}

/// One file's outcome within a batch run: the batch driver keeps going on
/// per-file failures and reports a summary at the end.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    Processed {
        path: PathBuf,
        stats: crate::stats::PipelineStats,
    },
    Failed {
        path: PathBuf,
        error: CoreError,
    },
}

/// Summary of a batch run across many files.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FileOutcome::Processed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FileOutcome::Failed { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_include_context() {
        let e = CaptureError::UnsupportedFormat {
            reason: "bad magic".into(),
        };
        assert_eq!(e.to_string(), "unsupported capture format: bad magic");

        let wrapped: MaskError = CaptureError::TruncatedFile { frames_recovered: 3 }.into();
        assert!(wrapped.to_string().contains("3 frames recovered"));
    }

    #[test]
    fn batch_report_counts_outcomes() {
        let report = BatchReport {
            outcomes: vec![
                FileOutcome::Processed {
                    path: "a.pcap".into(),
                    stats: crate::stats::PipelineStats::default(),
                },
                FileOutcome::Failed {
                    path: "b.pcap".into(),
                    error: CoreError::Cancelled,
                },
            ],
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
    }
}
