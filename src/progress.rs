//! Progress events and hooks for observing a running pipeline.
//!
//! Mirrors the hook container pattern used for template lifecycle events:
//! users register callbacks, the driver triggers them as frames move through
//! each stage, and the container's `Debug` impl never tries to print a
//! closure.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Which pipeline stage a [`ProgressEvent`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum StageName {
    Dedup,
    Anonymise,
    MaskAnalyse,
    MaskRewrite,
}

/// Pipeline lifecycle events.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A stage started processing a file.
    StageStarted { stage: StageName, total_frames: Option<u64> },
    /// A stage made progress; `frames_done` is cumulative for the current file.
    StageProgress { stage: StageName, frames_done: u64 },
    /// A stage finished processing a file.
    StageFinished { stage: StageName, frames_done: u64 },
    /// A whole file completed (all enabled stages ran).
    FileCompleted { frames_done: u64 },
}

/// Type alias for progress hooks.
///
/// Hooks must be `Send + Sync + 'static` so they can be shared across the
/// worker pool the batch driver spawns.
pub type ProgressHook = Arc<dyn Fn(&ProgressEvent) + Send + Sync + 'static>;

/// Container for registered progress hooks.
#[derive(Clone, Default)]
pub struct ProgressObservers {
    hooks: Vec<ProgressHook>,
}

impl std::fmt::Debug for ProgressObservers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressObservers")
            .field("hook_count", &self.hooks.len())
            .finish()
    }
}

impl ProgressObservers {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn register<F>(&mut self, hook: F)
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.hooks.push(Arc::new(hook));
    }

    pub fn trigger(&self, event: &ProgressEvent) {
        for hook in &self.hooks {
            hook(event);
        }
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

/// Rate-limits [`ProgressEvent::StageProgress`] emission so a hook sees at
/// most one update per `min_interval`, plus always the first and last frame.
pub struct ProgressThrottle {
    min_interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval: Duration::from_millis(min_interval_ms),
            last_emit: None,
        }
    }

    /// Returns true if enough time has passed since the last emitted update
    /// that a new one should go out now.
    pub fn should_emit(&mut self, now: Instant) -> bool {
        match self.last_emit {
            None => {
                self.last_emit = Some(now);
                true
            }
            Some(last) if now.duration_since(last) >= self.min_interval => {
                self.last_emit = Some(now);
                true
            }
            Some(_) => false,
        }
    }
}
