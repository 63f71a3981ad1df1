//! Cloud Storage backend that shells out to the `gsutil` CLI.
//!
//! Authentication, retries and parallel composite uploads are gsutil's
//! business. This backend only maps the six [`ObjectStore`] operations onto
//! gsutil sub-commands and interprets their exit codes.

use super::ObjectStore;
use crate::error::PipelineError;
use async_trait::async_trait;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// [`ObjectStore`] implemented with `gsutil`.
#[derive(Debug, Clone)]
pub struct GsutilStore {
    program: String,
}

impl Default for GsutilStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GsutilStore {
    pub fn new() -> Self {
        Self::with_program("gsutil")
    }

    /// Use a specific gsutil binary (or a wrapper script).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, operation: &'static str, uri: &str, args: &[&str]) -> Result<Output, PipelineError> {
        debug!("{} {}", self.program, args.join(" "));
        Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| PipelineError::Storage {
                operation,
                uri: uri.to_string(),
                detail: format!("cannot run {}: {e}", self.program),
            })
    }

    fn failure(operation: &'static str, uri: &str, output: &Output) -> PipelineError {
        PipelineError::Storage {
            operation,
            uri: uri.to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

/// gsutil reports an empty wildcard match on stderr with a non-zero exit.
fn is_no_match(stderr: &[u8]) -> bool {
    let s = String::from_utf8_lossy(stderr);
    s.contains("matched no objects") || s.contains("No URLs matched")
}

#[async_trait]
impl ObjectStore for GsutilStore {
    fn name(&self) -> &str {
        "gsutil"
    }

    async fn exists(&self, uri: &str) -> Result<bool, PipelineError> {
        let out = self.run("stat", uri, &["-q", "stat", uri]).await?;
        Ok(out.status.success())
    }

    async fn upload(&self, local: &Path, uri: &str) -> Result<(), PipelineError> {
        let local_str = local.to_string_lossy();
        let out = self.run("upload", uri, &["cp", &local_str, uri]).await?;
        if out.status.success() {
            Ok(())
        } else {
            Err(Self::failure("upload", uri, &out))
        }
    }

    async fn download(&self, uri: &str, local: &Path) -> Result<(), PipelineError> {
        let local_str = local.to_string_lossy();
        let out = self.run("download", uri, &["cp", uri, &local_str]).await?;
        if out.status.success() {
            Ok(())
        } else {
            Err(Self::failure("download", uri, &out))
        }
    }

    async fn list(&self, pattern: &str) -> Result<Vec<String>, PipelineError> {
        let out = self.run("list", pattern, &["ls", pattern]).await?;
        if !out.status.success() {
            if is_no_match(&out.stderr) {
                return Ok(Vec::new());
            }
            return Err(Self::failure("list", pattern, &out));
        }
        let mut uris: Vec<String> = String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.ends_with(':'))
            .map(str::to_string)
            .collect();
        uris.sort();
        Ok(uris)
    }

    async fn read_text(&self, uri: &str) -> Result<Option<String>, PipelineError> {
        let out = self.run("read", uri, &["cat", uri]).await?;
        if out.status.success() {
            return String::from_utf8(out.stdout)
                .map(Some)
                .map_err(|e| PipelineError::Storage {
                    operation: "read",
                    uri: uri.to_string(),
                    detail: format!("object is not UTF-8: {e}"),
                });
        }
        if is_no_match(&out.stderr) {
            Ok(None)
        } else {
            Err(Self::failure("read", uri, &out))
        }
    }

    async fn write_text(&self, uri: &str, contents: &str) -> Result<(), PipelineError> {
        debug!("{} cp - {}", self.program, uri);
        let storage_err = |detail: String| PipelineError::Storage {
            operation: "write",
            uri: uri.to_string(),
            detail,
        };

        let mut child = Command::new(&self.program)
            .args(["cp", "-", uri])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| storage_err(format!("cannot run {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(contents.as_bytes())
                .await
                .map_err(|e| storage_err(e.to_string()))?;
            // Dropping stdin closes the pipe so gsutil sees EOF.
        }

        let out = child
            .wait_with_output()
            .await
            .map_err(|e| storage_err(e.to_string()))?;
        if out.status.success() {
            Ok(())
        } else {
            Err(Self::failure("write", uri, &out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_match_detection() {
        assert!(is_no_match(
            b"CommandException: One or more URLs matched no objects."
        ));
        assert!(is_no_match(b"CommandException: No URLs matched: gs://b/x"));
        assert!(!is_no_match(b"AccessDeniedException: 403"));
    }

    #[tokio::test]
    async fn missing_binary_is_storage_error() {
        let store = GsutilStore::with_program("/definitely/not/gsutil");
        let err = store.exists("gs://b/x").await.unwrap_err();
        assert!(matches!(err, PipelineError::Storage { operation: "stat", .. }));
    }
}
