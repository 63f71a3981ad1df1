//! The stage runner: one control loop over the ordered stage list.
//!
//! ## Flow
//!
//! ```text
//! pdf ─▶ validate + fingerprint ─▶ resume lookup ─▶ work item
//!                                                      │
//!        ┌─────────────────────────────────────────────┘
//!        ▼
//!   for stage in plan:  skip?  ──yes──▶ record Skipped
//!                         │no
//!                         ▼
//!                       run ──fail──▶ keep work dir, abort
//!                         │ok
//!                         ▼
//!                    record Ran (merge → write marker)
//!        │
//!        ▼
//! verify artifact ─▶ delete work dir ─▶ PipelineReport
//! ```
//!
//! Stages are awaited strictly one after another. Nothing is retried and
//! nothing times out.

use crate::config::{PipelineConfig, PARTITION_FORMAT};
use crate::error::PipelineError;
use crate::input::{resolve_input, WorkItem};
use crate::layout::{merged_file_name, StorageLayout};
use crate::merge::merge_volume;
use crate::report::{verify_artifact, PipelineReport, StageOutcome, StageRecord};
use crate::resume::ResumeLocator;
use crate::stage::{
    plan, CommandRunner, FailurePolicy, ProcessRunner, SkipPolicy, StageAction, StageDescriptor,
    StageInvocation, StageKind,
};
use crate::storage::{GsutilStore, SharedStore};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const MAX_WORK_DIR_ATTEMPTS: u32 = 1000;

/// Run the whole pipeline for one PDF with the production backends
/// (`gsutil` object store, real child processes).
pub async fn run_pipeline(
    pdf: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<PipelineReport, PipelineError> {
    Pipeline::new(
        config.clone(),
        Arc::new(GsutilStore::new()),
        Arc::new(ProcessRunner),
    )
    .run(pdf.as_ref())
    .await
}

/// Synchronous wrapper around [`run_pipeline`].
///
/// Creates a temporary tokio runtime internally.
pub fn run_pipeline_sync(
    pdf: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<PipelineReport, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run_pipeline(pdf, config))
}

/// A configured pipeline with its two external collaborators.
pub struct Pipeline {
    config: PipelineConfig,
    store: SharedStore,
    runner: Arc<dyn CommandRunner>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, store: SharedStore, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            store,
            runner,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage for `pdf`.
    pub async fn run(&self, pdf: &Path) -> Result<PipelineReport, PipelineError> {
        let total_start = Instant::now();
        let config = &self.config;
        let layout = StorageLayout::from_config(config);
        let locator = ResumeLocator::new(Arc::clone(&self.store), layout.clone());

        // ── Identify the input ───────────────────────────────────────────
        let input = resolve_input(pdf, config.stem.as_deref()).await?;
        info!("Input {} → stem '{}', sha256 {}", pdf.display(), input.stem, input.hash.short());

        // ── Resume lookup ────────────────────────────────────────────────
        let resume = locator.locate(&input.hash, &input.stem).await?;
        let reusable = locator
            .reusable_output(&resume, config.stem.as_deref())
            .await?;
        let merged_reusable = reusable.is_some();
        let (stem, partition) = match reusable {
            Some((partition, stem)) => (stem, partition),
            None => (input.stem.clone(), config.default_partition()),
        };
        let item = input.into_work_item(stem, partition);
        info!(
            "Work item '{}' in partition {} ({})",
            item.stem,
            item.partition_str(),
            if merged_reusable { "resuming" } else { "fresh run" }
        );

        let work = WorkDir::create(config.work_root.as_deref(), item.hash.short()).await?;
        let mut run = StageRun {
            pipeline: self,
            layout: &layout,
            locator: &locator,
            item: &item,
            work_dir: work.path().to_path_buf(),
            merged_reusable,
            marker_written: None,
            text_file: None,
        };

        let descriptors = plan(config);
        if let Some(ref cb) = config.progress_callback {
            cb.on_pipeline_start(&item.stem, descriptors.len());
        }

        // ── Stage loop ───────────────────────────────────────────────────
        let mut records = Vec::with_capacity(descriptors.len());
        for (i, desc) in descriptors.iter().enumerate() {
            match run.step(desc, i + 1, descriptors.len()).await {
                Ok(record) => records.push(record),
                Err(e) => {
                    if let Some(ref cb) = config.progress_callback {
                        cb.on_stage_error(desc.kind, &e.to_string());
                    }
                    match desc.on_failure {
                        FailurePolicy::Abort => {
                            let kept = work.keep();
                            warn!("Stage '{}' failed; working files kept in {}", desc.kind, kept.display());
                            return Err(e.aborted(desc.kind, kept));
                        }
                    }
                }
            }
        }

        // ── Verify artifact ──────────────────────────────────────────────
        let artifact = self.artifact_path(&item.stem);
        let artifact_bytes = match verify_artifact(&artifact).await {
            Ok(n) => n,
            Err(e) => {
                let kept = work.keep();
                warn!("Working files kept in {}", kept.display());
                return Err(e.aborted(StageKind::Package, kept));
            }
        };
        let marker_written = run.marker_written.take();
        work.remove().await;

        let report = PipelineReport {
            work_item: item.clone(),
            resume,
            artifact,
            artifact_bytes,
            stages: records,
            marker_written,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };
        info!(
            "Pipeline complete: {} ran, {} skipped, {}ms",
            report.ran_count(),
            report.skipped_count(),
            report.total_duration_ms
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_pipeline_complete(report.ran_count(), report.skipped_count());
        }
        Ok(report)
    }

    /// `<output_dir>/<stem>.epub`
    pub fn artifact_path(&self, stem: &str) -> PathBuf {
        self.config.output_dir.join(format!("{stem}.epub"))
    }
}

// ── Per-run state ────────────────────────────────────────────────────────

/// Mutable state threaded through the stage loop.
struct StageRun<'a> {
    pipeline: &'a Pipeline,
    layout: &'a StorageLayout,
    locator: &'a ResumeLocator,
    item: &'a WorkItem,
    work_dir: PathBuf,
    merged_reusable: bool,
    marker_written: Option<String>,
    /// Latest local text file in the cleanup chain.
    text_file: Option<PathBuf>,
}

impl StageRun<'_> {
    async fn step(
        &mut self,
        desc: &StageDescriptor,
        index: usize,
        total: usize,
    ) -> Result<StageRecord, PipelineError> {
        let cb = self.pipeline.config.progress_callback.clone();

        if let Some(reason) = self.skip_reason(desc).await? {
            info!("[{}] skipped: {}", desc.kind, reason);
            if let Some(ref cb) = cb {
                cb.on_stage_skipped(desc.kind, &reason);
            }
            return Ok(StageRecord {
                stage: desc.kind,
                outcome: StageOutcome::Skipped { reason },
                duration_ms: 0,
            });
        }

        info!("[{}] starting ({}/{})", desc.kind, index, total);
        if let Some(ref cb) = cb {
            cb.on_stage_start(desc.kind, index, total);
        }
        let start = Instant::now();
        self.execute(desc).await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        if desc.kind == StageKind::Merge {
            self.record_marker().await;
        }

        info!("[{}] done in {}ms", desc.kind, duration_ms);
        if let Some(ref cb) = cb {
            cb.on_stage_complete(desc.kind, duration_ms);
        }
        Ok(StageRecord {
            stage: desc.kind,
            outcome: StageOutcome::Ran,
            duration_ms,
        })
    }

    async fn skip_reason(&self, desc: &StageDescriptor) -> Result<Option<String>, PipelineError> {
        match desc.skip {
            SkipPolicy::Never => Ok(None),
            SkipPolicy::IfUploaded => {
                let uri = self.layout.input_pdf(&self.item.stem);
                if self.pipeline.store.exists(&uri).await? {
                    Ok(Some(format!("{uri} already exists")))
                } else {
                    Ok(None)
                }
            }
            SkipPolicy::IfMergedOutputReusable => {
                if self.merged_reusable {
                    Ok(Some(format!(
                        "merged text from {} reused",
                        self.item.partition_str()
                    )))
                } else {
                    Ok(None)
                }
            }
        }
    }

    async fn execute(&mut self, desc: &StageDescriptor) -> Result<(), PipelineError> {
        let store = &self.pipeline.store;
        match &desc.action {
            StageAction::Upload => {
                let uri = self.layout.input_pdf(&self.item.stem);
                store.upload(&self.item.path, &uri).await
            }
            StageAction::Download => {
                let uri = self.layout.merged_text(self.item.partition, &self.item.stem);
                let local = self.work_dir.join(merged_file_name(&self.item.stem));
                store.download(&uri, &local).await?;
                self.text_file = Some(local);
                Ok(())
            }
            StageAction::BuiltinMerge => {
                let summary = merge_volume(
                    store.as_ref(),
                    self.layout,
                    self.item.partition,
                    &self.item.stem,
                    &self.work_dir,
                )
                .await?;
                debug!(
                    "merged {}/{} shards, {} bytes",
                    summary.shards_used, summary.shards_found, summary.bytes
                );
                Ok(())
            }
            StageAction::Command(template) => {
                let (input, output) = self.stage_files(desc.kind).await?;
                let invocation = StageInvocation {
                    stage: desc.kind,
                    program: template.program.clone(),
                    args: template.render(&self.template_vars(&input, &output)),
                    env: self
                        .pipeline
                        .config
                        .stage_env(&self.item.stem, self.item.partition),
                    current_dir: None,
                };
                debug!("[{}] {}", desc.kind, invocation);

                let exit = self.pipeline.runner.run(&invocation).await?;
                if !exit.is_success() {
                    return Err(PipelineError::StageFailed {
                        stage: desc.kind,
                        code: exit.code,
                        work_dir: self.work_dir.clone(),
                    });
                }
                if is_text_stage(desc.kind) {
                    self.text_file = Some(output);
                }
                Ok(())
            }
        }
    }

    /// Input and output files for a command stage.
    async fn stage_files(&self, kind: StageKind) -> Result<(PathBuf, PathBuf), PipelineError> {
        let stem = &self.item.stem;
        let current = self
            .text_file
            .clone()
            .unwrap_or_else(|| self.work_dir.join(merged_file_name(stem)));
        let files = match kind {
            StageKind::Cleanup => (current, self.work_dir.join(format!("{stem}_step1_clean.txt"))),
            StageKind::Format => (current, self.work_dir.join(format!("{stem}_step2_format.txt"))),
            StageKind::Structure => {
                (current, self.work_dir.join(format!("{stem}_step3_structure.txt")))
            }
            StageKind::Package => {
                let out = self.pipeline.artifact_path(stem);
                if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| PipelineError::io(parent, e))?;
                }
                (current, out)
            }
            // OCR and an external merge talk to the object store themselves.
            _ => (
                self.item.path.clone(),
                PathBuf::from(self.layout.merged_text(self.item.partition, stem)),
            ),
        };
        Ok(files)
    }

    fn template_vars(&self, input: &Path, output: &Path) -> Vec<(&'static str, String)> {
        let c = &self.pipeline.config;
        vec![
            ("input", input.display().to_string()),
            ("output", output.display().to_string()),
            ("stem", self.item.stem.clone()),
            ("date", self.item.partition.format(PARTITION_FORMAT).to_string()),
            ("work_dir", self.work_dir.display().to_string()),
            ("pdf", self.item.path.display().to_string()),
            ("hash", self.item.hash.to_string()),
            ("languages", c.language_hints.join(",")),
        ]
    }

    /// Write the resume marker after a merge. A failed write only costs the
    /// next run its shortcut, so it is logged rather than raised.
    async fn record_marker(&mut self) {
        match self
            .locator
            .write_marker(&self.item.hash, self.item.partition, &self.item.stem)
            .await
        {
            Ok(uri) => self.marker_written = Some(uri),
            Err(e) => warn!("Could not write resume marker: {}", e),
        }
    }
}

fn is_text_stage(kind: StageKind) -> bool {
    matches!(
        kind,
        StageKind::Cleanup | StageKind::Format | StageKind::Structure
    )
}

// ── Working directory ────────────────────────────────────────────────────

/// Scratch directory for one run: removed on success, kept on failure.
///
/// Nothing happens on drop, so an aborted run (including a panic) leaves its
/// files for inspection. A directory that already exists is never reused.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    /// Create `<root>/scan2epub-<tag>-<timestamp>-<pid>`; `root` defaults to
    /// the system temp dir. A numeric suffix is added if that name is taken.
    pub async fn create(root: Option<&Path>, tag: &str) -> Result<Self, PipelineError> {
        let root = root
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| PipelineError::io(&root, e))?;

        let base = format!(
            "scan2epub-{}-{}-{}",
            tag,
            Utc::now().format("%Y%m%dT%H%M%S"),
            std::process::id()
        );
        for attempt in 0..MAX_WORK_DIR_ATTEMPTS {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}-{attempt}")
            };
            let path = root.join(name);
            match tokio::fs::create_dir(&path).await {
                Ok(()) => {
                    debug!("Working directory {}", path.display());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(PipelineError::io(&path, e)),
            }
        }
        Err(PipelineError::Internal(format!(
            "no free working directory name for '{base}' under {}",
            root.display()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Leave the directory on disk and return its path.
    pub fn keep(self) -> PathBuf {
        self.path
    }

    /// Delete the directory. Failure is logged; the run already succeeded.
    pub async fn remove(self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            warn!("Could not remove {}: {}", self.path.display(), e);
        }
    }
}
