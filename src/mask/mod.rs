//! The Mask stage: a two-pass TLS ApplicationData payload zeroiser.
//!
//! Pass 1 (`analyser`) reassembles TCP flows and parses TLS record
//! boundaries out of them. Pass 2 (`rules` then `rewriter`) turns those
//! boundaries into per-frame byte ranges and zeroes the ones the content
//! type table marks for masking.

pub mod analyser;
pub mod external;
pub mod record;
pub mod rewriter;
pub mod rules;

use std::path::Path;

use crate::capture::CaptureReader;
use crate::config::{MaskConfig, TlsAnalyserConfig};
use crate::errors::MaskError;
use crate::frame::Frame;
use crate::stats::MaskStats;
use crate::tls_table::TlsRecordTypeTable;

use analyser::MaskStrategy;

pub struct MaskStage {
    strategy: MaskStrategy,
    table: TlsRecordTypeTable,
}

impl MaskStage {
    pub fn new(config: &MaskConfig) -> Self {
        let strategy = match &config.analyser {
            TlsAnalyserConfig::InProcess => MaskStrategy::InProcess,
            TlsAnalyserConfig::External { path, timeout } => MaskStrategy::External {
                path: path.clone(),
                timeout: *timeout,
            },
        };
        Self {
            strategy,
            table: TlsRecordTypeTable::standard(),
        }
    }

    /// Runs both passes over `capture_path`, returning the per-frame rules
    /// pass 2 needs plus the statistics gathered from pass 1.
    pub fn analyse(&self, capture_path: &Path) -> Result<(Vec<rules::MaskRule>, MaskStats), MaskError> {
        let output = self.strategy.analyse(capture_path);
        let mut stats = MaskStats::default();
        stats.diagnostics.extend(output.diagnostics);
        stats.tls_records_seen = output.records.len() as u64;
        stats.application_data_records_masked = output
            .records
            .iter()
            .filter(|r| r.content_type == record::TlsContentType::ApplicationData)
            .count() as u64;

        let generated = rules::generate_rules(&output.records, &self.table)?;
        stats.rules_generated = generated.len() as u64;
        Ok((generated, stats))
    }

    /// Pass 2: applies `rules` to every frame read from `capture_path`,
    /// writing the masked frames out via `on_frame`.
    pub fn rewrite(
        &self,
        capture_path: &Path,
        rules: &[rules::MaskRule],
        stats: &mut MaskStats,
        mut on_frame: impl FnMut(Frame) -> Result<(), MaskError>,
    ) -> Result<(), MaskError> {
        let reader = CaptureReader::open(capture_path)?;
        for (frame_index, frame_result) in reader.enumerate() {
            let mut frame = frame_result?;
            stats.frames_in += 1;
            rewriter::apply_rules(&mut frame, frame_index, rules, stats);
            on_frame(frame)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureFormat, CaptureWriter};
    use crate::frame::TsResolution;
    use etherparse::PacketBuilder;

    fn write_tls_capture(path: &Path) {
        let mut record = vec![23u8, 3, 3];
        let body = vec![0xAAu8; 16];
        record.extend_from_slice(&(body.len() as u16).to_be_bytes());
        record.extend_from_slice(&body);

        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(1234, 443, 1, 65535);
        let mut buffer = Vec::new();
        builder.write(&mut buffer, &record).unwrap();

        let mut writer = CaptureWriter::create_like(
            path,
            CaptureFormat::Pcap {
                ts_resolution: TsResolution::Micros,
            },
        )
        .unwrap();
        let frame = Frame::new(0, 0, TsResolution::Micros, buffer.len() as u32, buffer);
        writer.write_frame(&frame).unwrap();
    }

    #[test]
    fn end_to_end_masks_application_data_and_keeps_frame_count() {
        let tmp = std::env::temp_dir().join(format!("mask_mod_test_{}.pcap", std::process::id()));
        write_tls_capture(&tmp);

        let config = MaskConfig {
            enabled: true,
            analyser: TlsAnalyserConfig::InProcess,
        };
        let stage = MaskStage::new(&config);
        let (rules, mut stats) = stage.analyse(&tmp).unwrap();
        assert_eq!(stats.application_data_records_masked, 1);

        let mut out_frames = Vec::new();
        stage
            .rewrite(&tmp, &rules, &mut stats, |frame| {
                out_frames.push(frame);
                Ok(())
            })
            .unwrap();

        std::fs::remove_file(&tmp).ok();

        assert_eq!(out_frames.len(), 1);
        assert!(stats.bytes_zeroed > 0);
    }
}
