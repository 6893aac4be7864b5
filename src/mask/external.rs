//! The external TLS analyser collaborator: shells out to a separate process
//! that speaks a small JSON contract over stdout, with a cooperative
//! timeout and no special privileges beyond reading the capture file path.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::errors::MaskError;

use super::analyser::{AnalyserOutput, TlsAnalyser};
use super::record::{RecordFrameSpan, TlsContentType, TlsRecordDescriptor};

/// A collaborator invoked as `path <capture-file>`, expected to print one
/// JSON array of record descriptors to stdout and exit zero.
pub struct ExternalAnalyser {
    pub path: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct WireSpan {
    frame_index: usize,
    start: usize,
    end: usize,
}

#[derive(Debug, Deserialize)]
struct WireRecord {
    content_type: u8,
    length: u16,
    is_complete: bool,
    spans: Vec<WireSpan>,
}

impl TlsAnalyser for ExternalAnalyser {
    fn analyse(&self, capture_path: &Path) -> Result<AnalyserOutput, MaskError> {
        let mut child = Command::new(&self.path)
            .arg(capture_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MaskError::AnalyserUnavailable { reason: e.to_string() })?;

        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(MaskError::AnalyserTimeout {
                            timeout_ms: self.timeout.as_millis() as u64,
                        });
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    return Err(MaskError::AnalyserUnavailable { reason: e.to_string() });
                }
            }
        }

        let mut stdout = String::new();
        child
            .stdout
            .take()
            .ok_or_else(|| MaskError::AnalyserUnavailable {
                reason: "collaborator produced no stdout handle".to_string(),
            })?
            .read_to_string(&mut stdout)
            .map_err(|e| MaskError::AnalyserUnavailable { reason: e.to_string() })?;

        let wire: Vec<WireRecord> = serde_json::from_str(&stdout)
            .map_err(|e| MaskError::AnalyserUnavailable { reason: format!("malformed JSON output: {e}") })?;

        let records = wire
            .into_iter()
            .map(|r| TlsRecordDescriptor {
                content_type: TlsContentType::from(r.content_type),
                length: r.length,
                is_complete: r.is_complete,
                spans: r
                    .spans
                    .into_iter()
                    .map(|s| RecordFrameSpan {
                        frame_index: s.frame_index,
                        byte_range: s.start..s.end,
                    })
                    .collect(),
            })
            .collect();

        Ok(AnalyserOutput {
            records,
            diagnostics: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_record_deserialises_from_json() {
        let json = r#"[{"content_type":23,"length":10,"is_complete":true,"spans":[{"frame_index":0,"start":5,"end":15}]}]"#;
        let wire: Vec<WireRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].content_type, 23);
        assert_eq!(wire[0].spans[0].end, 15);
    }

    #[test]
    fn missing_collaborator_binary_is_unavailable_not_panic() {
        let analyser = ExternalAnalyser {
            path: PathBuf::from("/nonexistent/tls-analyser-binary"),
            timeout: Duration::from_millis(100),
        };
        let result = analyser.analyse(Path::new("irrelevant.pcap"));
        assert!(matches!(result, Err(MaskError::AnalyserUnavailable { .. })));
    }
}
