//! Pipeline configuration and its builder.
//!
//! Follows the same shape as the crate's parser builder: a plain `Config`
//! struct with public-ish defaults, a `Builder` with chainable
//! `#[must_use]` `with_*` methods, and a fallible `build()` that validates
//! before handing back the finished value.

use std::path::PathBuf;
use std::time::Duration;

use crate::progress::ProgressObservers;

/// Dedup stage configuration.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub enabled: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Anonymise stage configuration.
#[derive(Debug, Clone)]
pub struct AnonymiseConfig {
    pub enabled: bool,
    /// Bits of the IPv4 address preserved by the prefix-preserving map.
    pub prefix_v4: u8,
    /// Bits of the IPv6 address preserved by the prefix-preserving map.
    pub prefix_v6: u8,
    /// Keyed-PRF seed. A fixed seed makes two runs over the same capture
    /// produce the same anonymised addresses; a random one does not.
    pub seed: [u8; 32],
}

impl Default for AnonymiseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix_v4: 24,
            prefix_v6: 64,
            seed: [0u8; 32],
        }
    }
}

/// Where and how the Mask stage's TLS analyser runs.
#[derive(Debug, Clone)]
pub enum TlsAnalyserConfig {
    /// Parse TLS records with the in-process reassembler and parser.
    InProcess,
    /// Shell out to an external collaborator that speaks the JSON record
    /// descriptor contract, with a cooperative timeout and automatic
    /// fallback to `InProcess` on failure.
    External { path: PathBuf, timeout: Duration },
}

impl Default for TlsAnalyserConfig {
    fn default() -> Self {
        TlsAnalyserConfig::InProcess
    }
}

/// Mask stage configuration.
#[derive(Debug, Clone)]
pub struct MaskConfig {
    pub enabled: bool,
    pub analyser: TlsAnalyserConfig,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            analyser: TlsAnalyserConfig::default(),
        }
    }
}

/// Batch/driver-level configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub temp_dir: Option<PathBuf>,
    /// Worker count for the batch driver's `rayon` pool. `None` lets rayon
    /// pick the number of logical CPUs.
    pub workers: Option<usize>,
    pub progress_interval_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            workers: None,
            progress_interval_ms: 250,
        }
    }
}

/// The full configuration for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub dedup: DedupConfig,
    pub anonymise: AnonymiseConfig,
    pub mask: MaskConfig,
    pub driver: DriverConfig,
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }
}

/// Builder for a [`PipelineConfig`].
///
/// # Examples
///
/// ```rust
/// use pktmask_core::config::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .with_dedup(true)
///     .with_anonymise_prefix_v4(16)
///     .build()
///     .expect("invalid config");
/// ```
#[derive(Clone, Default)]
pub struct PipelineConfigBuilder {
    dedup: DedupConfig,
    anonymise: AnonymiseConfig,
    mask: MaskConfig,
    driver: DriverConfig,
    progress: ProgressObservers,
}

impl std::fmt::Debug for PipelineConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfigBuilder")
            .field("dedup", &self.dedup)
            .field("anonymise", &self.anonymise)
            .field("mask", &self.mask)
            .field("driver", &self.driver)
            .field("progress", &format!("{} hooks", self.progress.len()))
            .finish()
    }
}

impl PipelineConfigBuilder {
    #[must_use = "builder methods consume self and return a new builder; the return value must be used"]
    pub fn with_dedup(mut self, enabled: bool) -> Self {
        self.dedup.enabled = enabled;
        self
    }

    #[must_use = "builder methods consume self and return a new builder; the return value must be used"]
    pub fn with_anonymise(mut self, enabled: bool) -> Self {
        self.anonymise.enabled = enabled;
        self
    }

    #[must_use = "builder methods consume self and return a new builder; the return value must be used"]
    pub fn with_anonymise_prefix_v4(mut self, bits: u8) -> Self {
        self.anonymise.prefix_v4 = bits;
        self
    }

    #[must_use = "builder methods consume self and return a new builder; the return value must be used"]
    pub fn with_anonymise_prefix_v6(mut self, bits: u8) -> Self {
        self.anonymise.prefix_v6 = bits;
        self
    }

    #[must_use = "builder methods consume self and return a new builder; the return value must be used"]
    pub fn with_anonymise_seed(mut self, seed: [u8; 32]) -> Self {
        self.anonymise.seed = seed;
        self
    }

    #[must_use = "builder methods consume self and return a new builder; the return value must be used"]
    pub fn with_mask(mut self, enabled: bool) -> Self {
        self.mask.enabled = enabled;
        self
    }

    #[must_use = "builder methods consume self and return a new builder; the return value must be used"]
    pub fn with_external_analyser(mut self, path: PathBuf, timeout: Duration) -> Self {
        self.mask.analyser = TlsAnalyserConfig::External { path, timeout };
        self
    }

    #[must_use = "builder methods consume self and return a new builder; the return value must be used"]
    pub fn with_temp_dir(mut self, dir: PathBuf) -> Self {
        self.driver.temp_dir = Some(dir);
        self
    }

    #[must_use = "builder methods consume self and return a new builder; the return value must be used"]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.driver.workers = Some(workers);
        self
    }

    #[must_use = "builder methods consume self and return a new builder; the return value must be used"]
    pub fn with_progress_interval_ms(mut self, interval_ms: u64) -> Self {
        self.driver.progress_interval_ms = interval_ms;
        self
    }

    #[must_use = "builder methods consume self and return a new builder; the return value must be used"]
    pub fn on_progress<F>(mut self, hook: F) -> Self
    where
        F: Fn(&crate::progress::ProgressEvent) + Send + Sync + 'static,
    {
        self.progress.register(hook);
        self
    }

    /// Validates and assembles the configuration.
    ///
    /// Errors if every stage has been disabled (nothing left to run) or if
    /// a prefix length is out of range for its address family.
    pub fn build(self) -> Result<(PipelineConfig, ProgressObservers), String> {
        if !self.dedup.enabled && !self.anonymise.enabled && !self.mask.enabled {
            return Err("at least one stage must be enabled".to_string());
        }
        if self.anonymise.prefix_v4 > 32 {
            return Err(format!(
                "anonymise.prefix_v4 must be <= 32, got {}",
                self.anonymise.prefix_v4
            ));
        }
        if self.anonymise.prefix_v6 > 128 {
            return Err(format!(
                "anonymise.prefix_v6 must be <= 128, got {}",
                self.anonymise.prefix_v6
            ));
        }
        let config = PipelineConfig {
            dedup: self.dedup,
            anonymise: self.anonymise,
            mask: self.mask,
            driver: self.driver,
        };
        Ok((config, self.progress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_enables_all_stages() {
        let (config, _) = PipelineConfig::builder().build().unwrap();
        assert!(config.dedup.enabled);
        assert!(config.anonymise.enabled);
        assert!(config.mask.enabled);
        assert_eq!(config.anonymise.prefix_v4, 24);
        assert_eq!(config.anonymise.prefix_v6, 64);
    }

    #[test]
    fn rejects_all_stages_disabled() {
        let result = PipelineConfig::builder()
            .with_dedup(false)
            .with_anonymise(false)
            .with_mask(false)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_out_of_range_prefix() {
        let result = PipelineConfig::builder().with_anonymise_prefix_v4(40).build();
        assert!(result.is_err());
    }
}
