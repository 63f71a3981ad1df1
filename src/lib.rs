//! # scan2epub
//!
//! Turn a scanned PDF into an EPUB by driving cloud OCR and a chain of
//! text-cleanup scripts, resuming from earlier OCR output whenever the same
//! document has been processed before.
//!
//! OCR is the slow and billable part of the job, so the pipeline fingerprints
//! the input (SHA-256 of its bytes) and looks for merged OCR text left by an
//! earlier run. When it finds some, upload may still happen but OCR and merge
//! are skipped and the cheap local stages run again from that text.
//!
//! ## Pipeline Overview
//!
//! ```text
//! book.pdf
//!  │
//!  ├─ 0. Identify   validate, SHA-256, resume lookup (marker, then listing)
//!  ├─ 1. Upload     <input_prefix>/<stem>.pdf          (skipped if present)
//!  ├─ 2. OCR        batch OCR → <output_prefix>/<date>/batch_clean/…
//!  ├─ 3. Merge      shards → <stem>_ocr.txt, resume marker written
//!  ├─ 4. Download   merged text → working directory
//!  ├─ 5. Cleanup    ┐
//!  ├─ 6. Format     ├ external scripts, one text file each
//!  ├─ 7. Structure  ┘
//!  └─ 8. Package    <output_dir>/<stem>.epub
//! ```
//!
//! Stages run strictly in order. The first failure aborts the run and leaves
//! the working directory on disk.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scan2epub::{run_pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::from_env_file(".env")?.enhanced(true).build()?;
//!     let report = run_pipeline("scans/book.pdf", &config).await?;
//!     println!("{} ({} bytes)", report.artifact.display(), report.artifact_bytes);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scan2epub` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! scan2epub = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod input;
pub mod layout;
pub mod marker;
pub mod merge;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod resume;
pub mod stage;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CommandTemplate, MergeStrategy, PipelineConfig, PipelineConfigBuilder, StageCommands};
pub use error::PipelineError;
pub use fingerprint::{fingerprint_file, Fingerprint};
pub use input::WorkItem;
pub use pipeline::{run_pipeline, run_pipeline_sync, Pipeline};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use report::{PipelineReport, StageOutcome, StageRecord};
pub use resume::{ResumeSource, ResumeState};
pub use stage::{CommandRunner, ProcessRunner, StageExit, StageInvocation, StageKind};
pub use storage::{GsutilStore, LocalStore, ObjectStore, SharedStore};
