//! Stage composition, temp-file chaining, and the multi-file batch driver.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::anonymise::AnonymiseStage;
use crate::capture::{CaptureFormat, CaptureReader, CaptureWriter};
use crate::config::PipelineConfig;
use crate::dedup::DedupStage;
use crate::errors::{BatchReport, CoreError, FileOutcome};
use crate::mask::MaskStage;
use crate::progress::{ProgressEvent, ProgressObservers, ProgressThrottle, StageName};
use crate::stats::PipelineStats;

/// Runs the enabled stages over one capture file, writing the result to
/// `output_path`. Stages chain through temporary files in `driver.temp_dir`
/// (or the system temp dir) so each stage only ever reads a finished
/// capture file written by the one before it.
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    progress: &'a ProgressObservers,
    cancel: Arc<AtomicBool>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PipelineConfig, progress: &'a ProgressObservers) -> Self {
        Self {
            config,
            progress,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clone of the cancellation flag; setting it makes the pipeline stop
    /// at the next frame boundary and leave no output file behind.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn run(&self, input_path: &Path, output_path: &Path) -> Result<PipelineStats, CoreError> {
        let start = Instant::now();
        let temp_dir = self
            .config
            .driver
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);

        let mut current_path = input_path.to_path_buf();
        let mut owned_temp: Option<PathBuf> = None;
        let mut stats = PipelineStats::default();

        if self.config.dedup.enabled {
            let next = temp_stage_path(&temp_dir, "dedup");
            stats.dedup = Some(self.run_dedup(&current_path, &next)?);
            owned_temp = Some(next.clone());
            current_path = next;
        }

        if self.config.anonymise.enabled {
            let next = temp_stage_path(&temp_dir, "anonymise");
            stats.anonymise = Some(self.run_anonymise(&current_path, &next)?);
            cleanup(owned_temp.take());
            owned_temp = Some(next.clone());
            current_path = next;
        }

        if self.config.mask.enabled {
            let next = temp_stage_path(&temp_dir, "mask");
            stats.mask = Some(self.run_mask(&current_path, &next)?);
            cleanup(owned_temp.take());
            owned_temp = Some(next.clone());
            current_path = next;
        }

        if current_path == input_path {
            std::fs::copy(input_path, output_path).map_err(|e| {
                CoreError::Capture(crate::errors::CaptureError::Io {
                    context: format!("copying {} to {}", input_path.display(), output_path.display()),
                    message: e.to_string(),
                })
            })?;
        } else {
            std::fs::rename(&current_path, output_path).or_else(|_| std::fs::copy(&current_path, output_path).map(|_| ()))
                .map_err(|e| {
                    CoreError::Capture(crate::errors::CaptureError::Io {
                        context: format!("moving {} to {}", current_path.display(), output_path.display()),
                        message: e.to_string(),
                    })
                })?;
            owned_temp = None;
        }
        cleanup(owned_temp);

        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        self.progress.trigger(&ProgressEvent::FileCompleted {
            frames_done: stats.dedup.as_ref().map_or(0, |s| s.frames_in),
        });
        Ok(stats)
    }

    fn run_dedup(&self, input: &Path, output: &Path) -> Result<crate::stats::DedupStats, CoreError> {
        let reader = CaptureReader::open(input)?;
        let format = reader_format(&reader);
        let mut writer = CaptureWriter::create_like(output, format)?;
        let mut stage = DedupStage::new();
        let mut throttle = ProgressThrottle::new(self.config.driver.progress_interval_ms);

        self.progress.trigger(&ProgressEvent::StageStarted {
            stage: StageName::Dedup,
            total_frames: None,
        });

        for frame_result in reader {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(CoreError::Cancelled);
            }
            let frame = frame_result?;
            if stage.process(&frame) {
                writer.write_frame(&frame)?;
            }
            if throttle.should_emit(Instant::now()) {
                self.progress.trigger(&ProgressEvent::StageProgress {
                    stage: StageName::Dedup,
                    frames_done: stage.stats().frames_in,
                });
            }
        }

        self.progress.trigger(&ProgressEvent::StageFinished {
            stage: StageName::Dedup,
            frames_done: stage.stats().frames_in,
        });
        Ok(stage.stats().clone())
    }

    fn run_anonymise(&self, input: &Path, output: &Path) -> Result<crate::stats::AnonymiseStats, CoreError> {
        let reader = CaptureReader::open(input)?;
        let format = reader_format(&reader);
        let mut writer = CaptureWriter::create_like(output, format)?;
        let mut stage = AnonymiseStage::new(
            self.config.anonymise.seed,
            self.config.anonymise.prefix_v4,
            self.config.anonymise.prefix_v6,
        );
        let mut throttle = ProgressThrottle::new(self.config.driver.progress_interval_ms);
        let mut frames_done = 0u64;

        self.progress.trigger(&ProgressEvent::StageStarted {
            stage: StageName::Anonymise,
            total_frames: None,
        });

        for (index, frame_result) in reader.enumerate() {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(CoreError::Cancelled);
            }
            let mut frame = frame_result?;
            stage.process(&mut frame, index)?;
            writer.write_frame(&frame)?;
            frames_done += 1;
            if throttle.should_emit(Instant::now()) {
                self.progress.trigger(&ProgressEvent::StageProgress {
                    stage: StageName::Anonymise,
                    frames_done,
                });
            }
        }

        self.progress.trigger(&ProgressEvent::StageFinished {
            stage: StageName::Anonymise,
            frames_done,
        });
        Ok(stage.finish())
    }

    fn run_mask(&self, input: &Path, output: &Path) -> Result<crate::stats::MaskStats, CoreError> {
        let stage = MaskStage::new(&self.config.mask);

        self.progress.trigger(&ProgressEvent::StageStarted {
            stage: StageName::MaskAnalyse,
            total_frames: None,
        });
        let (rules, mut stats) = stage.analyse(input)?;
        self.progress.trigger(&ProgressEvent::StageFinished {
            stage: StageName::MaskAnalyse,
            frames_done: stats.tls_records_seen,
        });

        let format = reader_format(&CaptureReader::open(input)?);
        let mut writer = CaptureWriter::create_like(output, format)?;
        let mut throttle = ProgressThrottle::new(self.config.driver.progress_interval_ms);
        let cancel = self.cancel.clone();
        let progress = self.progress;
        let mut frames_done = 0u64;

        self.progress.trigger(&ProgressEvent::StageStarted {
            stage: StageName::MaskRewrite,
            total_frames: None,
        });

        stage.rewrite(input, &rules, &mut stats, |frame| {
            if cancel.load(Ordering::Relaxed) {
                return Err(crate::errors::MaskError::AnalyserUnavailable {
                    reason: "cancelled".to_string(),
                });
            }
            writer.write_frame(&frame).map_err(crate::errors::MaskError::Capture)?;
            frames_done += 1;
            if throttle.should_emit(Instant::now()) {
                progress.trigger(&ProgressEvent::StageProgress {
                    stage: StageName::MaskRewrite,
                    frames_done,
                });
            }
            Ok(())
        })?;

        self.progress.trigger(&ProgressEvent::StageFinished {
            stage: StageName::MaskRewrite,
            frames_done,
        });
        Ok(stats)
    }
}

fn reader_format(reader: &CaptureReader) -> CaptureFormat {
    match reader {
        CaptureReader::Pcap { resolution, .. } => CaptureFormat::Pcap {
            ts_resolution: *resolution,
        },
        CaptureReader::PcapNg { .. } => CaptureFormat::PcapNg {
            interfaces: reader.interfaces().to_vec(),
        },
    }
}

fn temp_stage_path(temp_dir: &Path, stage: &str) -> PathBuf {
    temp_dir.join(format!("pktmask-{}-{}-{}.pcap.tmp", stage, std::process::id(), fastrand_like()))
}

fn fastrand_like() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::time::{SystemTime, UNIX_EPOCH};
    let mut hasher = DefaultHasher::new();
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos().hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

fn cleanup(path: Option<PathBuf>) {
    if let Some(p) = path {
        let _ = std::fs::remove_file(p);
    }
}

/// Processes many files, continuing past per-file failures and reporting a
/// summary at the end. Uses `rayon`'s global pool, capped to
/// `config.driver.workers` when set.
pub fn run_batch(
    config: &PipelineConfig,
    progress: &ProgressObservers,
    inputs: &[PathBuf],
    output_dir: &Path,
) -> Result<BatchReport, CoreError> {
    use rayon::prelude::*;

    let run_one = |input: &PathBuf| -> FileOutcome {
        let output = output_dir.join(input.file_name().unwrap_or_default());
        let pipeline = Pipeline::new(config, progress);
        match pipeline.run(input, &output) {
            Ok(stats) => FileOutcome::Processed {
                path: input.clone(),
                stats,
            },
            Err(error) => FileOutcome::Failed {
                path: input.clone(),
                error,
            },
        }
    };

    let outcomes: Vec<FileOutcome> = if let Some(workers) = config.driver.workers {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| CoreError::Config { reason: e.to_string() })?;
        pool.install(|| inputs.par_iter().map(run_one).collect())
    } else {
        inputs.par_iter().map(run_one).collect()
    };

    Ok(BatchReport { outcomes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureFormat;
    use crate::frame::{Frame, TsResolution};
    use etherparse::PacketBuilder;

    fn write_sample_capture(path: &Path) {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(1234, 443, 1, 65535);
        let mut buffer = Vec::new();
        builder.write(&mut buffer, b"hello").unwrap();
        let mut writer = CaptureWriter::create_like(
            path,
            CaptureFormat::Pcap {
                ts_resolution: TsResolution::Micros,
            },
        )
        .unwrap();
        writer
            .write_frame(&Frame::new(0, 0, TsResolution::Micros, buffer.len() as u32, buffer))
            .unwrap();
    }

    #[test]
    fn full_pipeline_runs_all_enabled_stages() {
        let dir = std::env::temp_dir();
        let input = dir.join(format!("pipeline_in_{}.pcap", std::process::id()));
        let output = dir.join(format!("pipeline_out_{}.pcap", std::process::id()));
        write_sample_capture(&input);

        let (config, progress) = PipelineConfig::builder().build().unwrap();
        let pipeline = Pipeline::new(&config, &progress);
        let stats = pipeline.run(&input, &output).unwrap();

        assert!(stats.dedup.is_some());
        assert!(stats.anonymise.is_some());
        assert!(stats.mask.is_some());
        assert!(output.exists());

        std::fs::remove_file(&input).ok();
        std::fs::remove_file(&output).ok();
    }
}
