//! Error types for the scan2epub library.
//!
//! The taxonomy is flat. Two families of failure exist and both
//! abort the whole run:
//!
//! * **Missing precondition**: no input file, no configuration file, a
//!   required key absent, an unusable stem. Nothing has been started yet.
//!
//! * **Stage failure**: an external step returned non-zero, the object
//!   store refused an operation, or the packaged artifact is missing after a
//!   "successful" package step. Work may already have been done; the
//!   `work_dir` fields of `StageFailed` and `Aborted` point at the preserved
//!   scratch directory.
//!
//! There is no transient/permanent distinction and no retry path.

use std::path::PathBuf;
use thiserror::Error;

use crate::stage::StageKind;

/// All fatal errors returned by the scan2epub library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// Input exists but is not something we can hand to the OCR service.
    #[error("Input '{path}' is not a PDF: {reason}")]
    NotAPdf { path: PathBuf, reason: String },

    /// The stem derived from the file name (or given with `--stem`) cannot
    /// be used as an object-store path segment.
    #[error("Invalid stem '{stem}': {reason}")]
    InvalidStem { stem: String, reason: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// The configuration file does not exist.
    #[error("Configuration file not found: '{path}'\nCreate it or pass --config <PATH>.")]
    ConfigNotFound { path: PathBuf },

    /// A required configuration key is absent or empty.
    #[error("Missing required configuration key '{key}' in {source_name}")]
    MissingConfigKey { key: String, source_name: String },

    /// A configuration value failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Resume errors ─────────────────────────────────────────────────────
    /// A marker object exists but cannot be interpreted.
    #[error("Resume marker '{uri}' is invalid: {reason}")]
    MarkerInvalid { uri: String, reason: String },

    // ── Stage errors ──────────────────────────────────────────────────────
    /// An external stage exited with a non-zero status.
    #[error(
        "Stage '{stage}' failed with {}\nWorking files kept in: {}",
        code.map(|c| format!("exit code {c}")).unwrap_or_else(|| "a signal".to_string()),
        work_dir.display()
    )]
    StageFailed {
        stage: StageKind,
        code: Option<i32>,
        work_dir: PathBuf,
    },

    /// An external stage could not be started at all.
    #[error("Stage '{stage}' could not start '{program}': {source}")]
    StageSpawnFailed {
        stage: StageKind,
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// An object-store operation failed.
    #[error("Object store {operation} failed for '{uri}': {detail}")]
    Storage {
        operation: &'static str,
        uri: String,
        detail: String,
    },

    /// The built-in shard merger could not produce a merged text.
    #[error("Merging OCR shards for '{stem}' failed: {detail}")]
    MergeFailed { stem: String, detail: String },

    /// A stage failed for a reason other than its exit status; the scratch
    /// directory was kept.
    #[error("Stage '{stage}' aborted: {error}\nWorking files kept in: {}", work_dir.display())]
    Aborted {
        stage: StageKind,
        work_dir: PathBuf,
        error: Box<PipelineError>,
    },

    /// The package stage reported success but left no artifact behind.
    #[error("Expected artifact '{path}' was not produced by the package stage")]
    ArtifactMissing { path: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Local file-system failure outside of any stage process.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Wrap an `std::io::Error` with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach the kept working directory to an error that aborted `stage`.
    ///
    /// `StageFailed` already names the directory and is returned unchanged.
    pub fn aborted(self, stage: StageKind, work_dir: PathBuf) -> Self {
        match self {
            e @ PipelineError::StageFailed { .. } => e,
            e @ PipelineError::Aborted { .. } => e,
            other => PipelineError::Aborted {
                stage,
                work_dir,
                error: Box::new(other),
            },
        }
    }

    /// Scratch directory left on disk by a failed run, if any.
    pub fn kept_work_dir(&self) -> Option<&std::path::Path> {
        match self {
            PipelineError::StageFailed { work_dir, .. } | PipelineError::Aborted { work_dir, .. } => {
                Some(work_dir.as_path())
            }
            _ => None,
        }
    }

    /// The error that actually stopped the stage, looking through `Aborted`.
    pub fn cause(&self) -> &PipelineError {
        match self {
            PipelineError::Aborted { error, .. } => error.cause(),
            other => other,
        }
    }

    /// True for errors raised before any stage ran.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            PipelineError::InputNotFound { .. }
                | PipelineError::NotAPdf { .. }
                | PipelineError::InvalidStem { .. }
                | PipelineError::ConfigNotFound { .. }
                | PipelineError::MissingConfigKey { .. }
                | PipelineError::InvalidConfig(_)
        )
    }
}
