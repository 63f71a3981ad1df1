//! Stage descriptors and the process-spawning seam.
//!
//! The pipeline is an explicit list of [`StageDescriptor`]s walked by one
//! control loop in [`crate::pipeline`]. Each descriptor names the stage, says
//! when it may be skipped, and says what running it means: an object-store
//! transfer, the built-in merger, or an external command.
//!
//! ```text
//! upload ─▶ ocr ─▶ merge ─▶ download ─▶ cleanup ─▶ format ─▶ structure ─▶ package
//!   │        └──────┴── skipped when merged output is reused
//!   └── skipped when the PDF is already uploaded
//! ```
//!
//! External commands go through the [`CommandRunner`] trait so the control
//! loop can be tested without spawning anything.

use crate::config::{CommandTemplate, MergeStrategy, PipelineConfig};
use crate::error::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// The eight pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Upload,
    Ocr,
    Merge,
    Download,
    Cleanup,
    Format,
    Structure,
    Package,
}

impl StageKind {
    pub const ALL: [StageKind; 8] = [
        StageKind::Upload,
        StageKind::Ocr,
        StageKind::Merge,
        StageKind::Download,
        StageKind::Cleanup,
        StageKind::Format,
        StageKind::Structure,
        StageKind::Package,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Upload => "upload",
            StageKind::Ocr => "ocr",
            StageKind::Merge => "merge",
            StageKind::Download => "download",
            StageKind::Cleanup => "cleanup",
            StageKind::Format => "format",
            StageKind::Structure => "structure",
            StageKind::Package => "package",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a stage may be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipPolicy {
    /// Always runs.
    Never,
    /// Skipped when the upload destination already holds an object.
    IfUploaded,
    /// Skipped when merged OCR text from an earlier run is reusable.
    IfMergedOutputReusable,
}

/// What running a stage means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageAction {
    /// Copy the local PDF to the input prefix.
    Upload,
    /// Copy the merged text into the working directory.
    Download,
    /// Merge OCR shards in-process.
    BuiltinMerge,
    /// Run an external command.
    Command(CommandTemplate),
}

/// What happens when a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop the run; later stages are not attempted.
    Abort,
}

/// One entry of the ordered stage list.
#[derive(Debug, Clone)]
pub struct StageDescriptor {
    pub kind: StageKind,
    pub skip: SkipPolicy,
    pub action: StageAction,
    pub on_failure: FailurePolicy,
}

impl StageDescriptor {
    fn new(kind: StageKind, skip: SkipPolicy, action: StageAction) -> Self {
        Self {
            kind,
            skip,
            action,
            on_failure: FailurePolicy::Abort,
        }
    }
}

/// Build the ordered stage list for a configuration.
pub fn plan(config: &PipelineConfig) -> Vec<StageDescriptor> {
    let c = &config.commands;
    let ocr = if config.enhanced {
        c.ocr_enhanced.clone()
    } else {
        c.ocr.clone()
    };
    let merge = match &c.merge {
        MergeStrategy::Builtin => StageAction::BuiltinMerge,
        MergeStrategy::External(t) => StageAction::Command(t.clone()),
    };

    vec![
        StageDescriptor::new(StageKind::Upload, SkipPolicy::IfUploaded, StageAction::Upload),
        StageDescriptor::new(
            StageKind::Ocr,
            SkipPolicy::IfMergedOutputReusable,
            StageAction::Command(ocr),
        ),
        StageDescriptor::new(StageKind::Merge, SkipPolicy::IfMergedOutputReusable, merge),
        StageDescriptor::new(StageKind::Download, SkipPolicy::Never, StageAction::Download),
        StageDescriptor::new(
            StageKind::Cleanup,
            SkipPolicy::Never,
            StageAction::Command(c.cleanup.clone()),
        ),
        StageDescriptor::new(
            StageKind::Format,
            SkipPolicy::Never,
            StageAction::Command(c.format.clone()),
        ),
        StageDescriptor::new(
            StageKind::Structure,
            SkipPolicy::Never,
            StageAction::Command(c.structure.clone()),
        ),
        StageDescriptor::new(
            StageKind::Package,
            SkipPolicy::Never,
            StageAction::Command(c.package.clone()),
        ),
    ]
}

// ── Process seam ─────────────────────────────────────────────────────────

/// A fully-rendered external command for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInvocation {
    pub stage: StageKind,
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment for the child, on top of the inherited one.
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl fmt::Display for StageInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

/// Exit status of a stage process; `None` when killed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageExit {
    pub code: Option<i32>,
}

impl StageExit {
    pub fn success() -> Self {
        Self { code: Some(0) }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external stage commands to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &StageInvocation) -> Result<StageExit, PipelineError>;
}

/// [`CommandRunner`] that spawns real processes with inherited stdio and
/// waits for them without a timeout.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &StageInvocation) -> Result<StageExit, PipelineError> {
        debug!("[{}] spawning: {}", invocation.stage, invocation);
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(ref dir) = invocation.current_dir {
            cmd.current_dir(dir);
        }

        let status = cmd
            .status()
            .await
            .map_err(|e| PipelineError::StageSpawnFailed {
                stage: invocation.stage,
                program: invocation.program.clone(),
                source: e,
            })?;
        Ok(StageExit {
            code: status.code(),
        })
    }
}
