//! Progress-callback trait for stage-level pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to be told when
//! each stage starts, is skipped, finishes or fails. The CLI uses this to
//! drive its spinner; library users can forward events anywhere.
//!
//! # Example
//!
//! ```rust
//! use scan2epub::{PipelineProgressCallback, StageKind};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct SkipCounter(AtomicUsize);
//!
//! impl PipelineProgressCallback for SkipCounter {
//!     fn on_stage_skipped(&self, stage: StageKind, reason: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("skipped {stage}: {reason}");
//!     }
//! }
//! ```

use crate::stage::StageKind;
use std::sync::Arc;

/// Called by the stage runner as it walks the stage list.
///
/// Stages run one at a time, but the trait is `Send + Sync` so callbacks can
/// be shared with other tasks. Every method defaults to a no-op.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once, after the input is fingerprinted and the resume lookup
    /// has settled the stem.
    fn on_pipeline_start(&self, stem: &str, total_stages: usize) {
        let _ = (stem, total_stages);
    }

    /// Called before a stage does any work. `index` is 1-based.
    fn on_stage_start(&self, stage: StageKind, index: usize, total_stages: usize) {
        let _ = (stage, index, total_stages);
    }

    /// Called instead of start/complete when a stage's output already exists.
    fn on_stage_skipped(&self, stage: StageKind, reason: &str) {
        let _ = (stage, reason);
    }

    /// Called when a stage finished successfully.
    fn on_stage_complete(&self, stage: StageKind, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Called when a stage failed; the run aborts right after.
    fn on_stage_error(&self, stage: StageKind, error: &str) {
        let _ = (stage, error);
    }

    /// Called once after the artifact was verified.
    fn on_pipeline_complete(&self, ran: usize, skipped: usize) {
        let _ = (ran, skipped);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
