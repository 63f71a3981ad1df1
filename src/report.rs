//! Run results and the final artifact check.

use crate::error::PipelineError;
use crate::input::WorkItem;
use crate::resume::ResumeState;
use crate::stage::StageKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// What happened to one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    Ran,
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: StageKind,
    #[serde(flatten)]
    pub outcome: StageOutcome,
    pub duration_ms: u64,
}

/// Everything a successful run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub work_item: WorkItem,
    pub resume: ResumeState,
    /// Final packaged document.
    pub artifact: PathBuf,
    pub artifact_bytes: u64,
    pub stages: Vec<StageRecord>,
    /// Marker object written by this run, if merge ran.
    pub marker_written: Option<String>,
    pub total_duration_ms: u64,
}

impl PipelineReport {
    pub fn outcome(&self, stage: StageKind) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| &r.outcome)
    }

    pub fn ran(&self, stage: StageKind) -> bool {
        matches!(self.outcome(stage), Some(StageOutcome::Ran))
    }

    pub fn skipped(&self, stage: StageKind) -> bool {
        matches!(self.outcome(stage), Some(StageOutcome::Skipped { .. }))
    }

    pub fn ran_count(&self) -> usize {
        self.stages
            .iter()
            .filter(|r| r.outcome == StageOutcome::Ran)
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.stages.len() - self.ran_count()
    }
}

/// Confirm the package stage really produced `path`; returns its size.
pub async fn verify_artifact(path: &Path) -> Result<u64, PipelineError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {
            info!("Artifact {} ({} bytes)", path.display(), meta.len());
            Ok(meta.len())
        }
        _ => Err(PipelineError::ArtifactMissing {
            path: path.to_path_buf(),
        }),
    }
}

/// Human-readable byte count: `1536` → `1.5 KiB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_artifact_is_error() {
        let err = verify_artifact(Path::new("/no/such/book.epub"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactMissing { .. }));
    }

    #[tokio::test]
    async fn present_artifact_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("book.epub");
        std::fs::write(&p, vec![0u8; 2048]).unwrap();
        assert_eq!(verify_artifact(&p).await.unwrap(), 2048);
    }

    #[test]
    fn sizes_are_humanised() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(3 * 1024 * 1024), "3.0 MiB");
    }

    #[test]
    fn stage_record_serialises_flat() {
        let r = StageRecord {
            stage: StageKind::Ocr,
            outcome: StageOutcome::Skipped {
                reason: "reused".into(),
            },
            duration_ms: 0,
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["stage"], "ocr");
        assert_eq!(v["outcome"], "skipped");
        assert_eq!(v["reason"], "reused");
    }
}
