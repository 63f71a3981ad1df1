//! Local-directory object store.
//!
//! Maps `scheme://bucket/key` onto `<root>/bucket/key`. Useful for offline
//! runs where the OCR stage is replaced by a local tool, and as a realistic
//! backend in tests.

use super::{glob_to_regex, ObjectStore};
use crate::error::PipelineError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// [`ObjectStore`] backed by a directory tree.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    scheme: String,
}

impl LocalStore {
    /// A store rooted at `root` that answers to `gs://` URIs.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            scheme: "gs".to_string(),
        }
    }

    /// Answer to a different URI scheme, e.g. `s3`.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path backing `uri`.
    pub fn path_for(&self, uri: &str) -> Result<PathBuf, PipelineError> {
        let prefix = format!("{}://", self.scheme);
        let key = uri
            .strip_prefix(&prefix)
            .ok_or_else(|| PipelineError::Storage {
                operation: "resolve",
                uri: uri.to_string(),
                detail: format!("expected a {prefix} URI"),
            })?;
        if key.split('/').any(|seg| seg == "..") {
            return Err(PipelineError::Storage {
                operation: "resolve",
                uri: uri.to_string(),
                detail: "'..' segments are not allowed".into(),
            });
        }
        Ok(self.root.join(key.trim_start_matches('/')))
    }

    fn uri_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let key: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(format!("{}://{}", self.scheme, key.join("/")))
    }

    async fn ensure_parent(path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::io(parent, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn exists(&self, uri: &str) -> Result<bool, PipelineError> {
        let path = self.path_for(uri)?;
        Ok(tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    async fn upload(&self, local: &Path, uri: &str) -> Result<(), PipelineError> {
        let dest = self.path_for(uri)?;
        Self::ensure_parent(&dest).await?;
        debug!("local store: {} → {}", local.display(), dest.display());
        tokio::fs::copy(local, &dest)
            .await
            .map(|_| ())
            .map_err(|e| PipelineError::Storage {
                operation: "upload",
                uri: uri.to_string(),
                detail: e.to_string(),
            })
    }

    async fn download(&self, uri: &str, local: &Path) -> Result<(), PipelineError> {
        let src = self.path_for(uri)?;
        Self::ensure_parent(local).await?;
        tokio::fs::copy(&src, local)
            .await
            .map(|_| ())
            .map_err(|e| PipelineError::Storage {
                operation: "download",
                uri: uri.to_string(),
                detail: e.to_string(),
            })
    }

    async fn list(&self, pattern: &str) -> Result<Vec<String>, PipelineError> {
        let re = glob_to_regex(pattern)?;
        let root = self.root.clone();
        // Directory walking is blocking; keep it off the async workers.
        let paths = tokio::task::spawn_blocking(move || {
            WalkDir::new(&root)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("listing task panicked: {e}")))?;

        let mut uris: Vec<String> = paths
            .iter()
            .filter_map(|p| self.uri_for(p))
            .filter(|u| re.is_match(u))
            .collect();
        uris.sort();
        Ok(uris)
    }

    async fn read_text(&self, uri: &str) -> Result<Option<String>, PipelineError> {
        let path = self.path_for(uri)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PipelineError::Storage {
                operation: "read",
                uri: uri.to_string(),
                detail: e.to_string(),
            }),
        }
    }

    async fn write_text(&self, uri: &str, contents: &str) -> Result<(), PipelineError> {
        let path = self.path_for(uri)?;
        Self::ensure_parent(&path).await?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| PipelineError::Storage {
                operation: "write",
                uri: uri.to_string(),
                detail: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_exists_and_download() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let store = LocalStore::new(root.path());

        let src = scratch.path().join("book.pdf");
        std::fs::write(&src, b"0123456789").unwrap();

        let uri = "gs://books/input/book.pdf";
        assert!(!store.exists(uri).await.unwrap());
        store.upload(&src, uri).await.unwrap();
        assert!(store.exists(uri).await.unwrap());

        let back = scratch.path().join("nested/copy.pdf");
        store.download(uri, &back).await.unwrap();
        assert_eq!(std::fs::read(&back).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn list_matches_glob_and_sorts() {
        let root = tempfile::tempdir().unwrap();
        let store = LocalStore::new(root.path());
        for uri in [
            "gs://b/out/2024-02-01/batch_clean/book_ocr.txt",
            "gs://b/out/2023-12-31/batch_clean/book_ocr.txt",
            "gs://b/out/2024-02-01/batch_clean/other_ocr.txt",
        ] {
            store.write_text(uri, "x").await.unwrap();
        }

        let hits = store
            .list("gs://b/out/*/batch_clean/book_ocr.txt")
            .await
            .unwrap();
        assert_eq!(
            hits,
            vec![
                "gs://b/out/2023-12-31/batch_clean/book_ocr.txt",
                "gs://b/out/2024-02-01/batch_clean/book_ocr.txt",
            ]
        );
        assert!(store.list("gs://b/nothing/*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_missing_is_none() {
        let root = tempfile::tempdir().unwrap();
        let store = LocalStore::new(root.path());
        assert!(store.read_text("gs://b/none.env").await.unwrap().is_none());
    }

    #[test]
    fn rejects_foreign_scheme_and_parent_segments() {
        let store = LocalStore::new("/tmp/root");
        assert!(store.path_for("s3://b/x").is_err());
        assert!(store.path_for("gs://b/../etc/passwd").is_err());
        assert_eq!(
            store.path_for("gs://b/x/y").unwrap(),
            PathBuf::from("/tmp/root/b/x/y")
        );
    }
}
