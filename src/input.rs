//! Input validation and work-item identity.
//!
//! A run starts from a local PDF path. Before anything touches the network
//! we check the file exists, is a regular file and carries a `.pdf`
//! extension, derive its stem, and fingerprint it. The magic bytes are not
//! checked: the OCR service is the authority on what it can read.

use crate::config::PARTITION_FORMAT;
use crate::error::PipelineError;
use crate::fingerprint::{fingerprint_file, Fingerprint};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One input document, fully identified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Local path of the PDF.
    pub path: PathBuf,
    /// Content hash of the PDF bytes.
    pub hash: Fingerprint,
    /// Logical volume name keying every output path.
    pub stem: String,
    /// Date partition the OCR output lives under.
    pub partition: NaiveDate,
}

impl WorkItem {
    /// `YYYY-MM-DD` rendering of the partition.
    pub fn partition_str(&self) -> String {
        self.partition.format(PARTITION_FORMAT).to_string()
    }
}

/// A validated input file before its partition is known.
#[derive(Debug, Clone)]
pub struct InputDocument {
    pub path: PathBuf,
    pub hash: Fingerprint,
    pub stem: String,
}

impl InputDocument {
    pub fn into_work_item(self, stem: String, partition: NaiveDate) -> WorkItem {
        WorkItem {
            path: self.path,
            hash: self.hash,
            stem,
            partition,
        }
    }
}

/// Validate the input path, derive its stem and fingerprint it.
///
/// `stem_override` replaces the file-name stem when given; it is validated
/// the same way.
pub async fn resolve_input(
    path: &Path,
    stem_override: Option<&str>,
) -> Result<InputDocument, PipelineError> {
    let meta = tokio::fs::metadata(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PipelineError::InputNotFound {
                path: path.to_path_buf(),
            }
        } else {
            PipelineError::io(path, e)
        }
    })?;

    if !meta.is_file() {
        return Err(PipelineError::NotAPdf {
            path: path.to_path_buf(),
            reason: "not a regular file".into(),
        });
    }
    if !has_pdf_extension(path) {
        return Err(PipelineError::NotAPdf {
            path: path.to_path_buf(),
            reason: "expected a .pdf extension".into(),
        });
    }

    let stem = match stem_override {
        Some(s) => s.to_string(),
        None => derive_stem(path)?,
    };
    validate_stem(&stem)?;

    let hash = fingerprint_file(path).await?;
    debug!("Resolved input {} as stem '{}'", path.display(), stem);

    Ok(InputDocument {
        path: path.to_path_buf(),
        hash,
        stem,
    })
}

/// Case-insensitive `.pdf` extension check.
pub fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// File name without its extension: `/scans/HOL_Vol1.pdf` → `HOL_Vol1`.
pub fn derive_stem(path: &Path) -> Result<String, PipelineError> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| PipelineError::InvalidStem {
            stem: path.display().to_string(),
            reason: "file name is not valid UTF-8".into(),
        })
}

// Characters that would change the meaning of an object-store path or glob.
static RE_STEM_FORBIDDEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[/\\*?\[\]\x00-\x1f]").unwrap());

/// Reject stems that cannot serve as a single object-store path segment.
pub fn validate_stem(stem: &str) -> Result<(), PipelineError> {
    let reason = if stem.trim().is_empty() {
        Some("stem is empty")
    } else if stem != stem.trim() {
        Some("stem has leading or trailing whitespace")
    } else if RE_STEM_FORBIDDEN.is_match(stem) {
        Some("stem contains a path separator, glob or control character")
    } else if stem == "." || stem == ".." {
        Some("stem is a relative path component")
    } else {
        None
    };

    match reason {
        Some(r) => Err(PipelineError::InvalidStem {
            stem: stem.to_string(),
            reason: r.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_extension_is_case_insensitive() {
        assert!(has_pdf_extension(Path::new("a/book.pdf")));
        assert!(has_pdf_extension(Path::new("BOOK.PDF")));
        assert!(!has_pdf_extension(Path::new("book.epub")));
        assert!(!has_pdf_extension(Path::new("book")));
    }

    #[test]
    fn stem_from_path() {
        assert_eq!(derive_stem(Path::new("/scans/HOL_Vol1.pdf")).unwrap(), "HOL_Vol1");
        assert_eq!(derive_stem(Path::new("my.book.pdf")).unwrap(), "my.book");
    }

    #[test]
    fn stem_validation() {
        assert!(validate_stem("HOL_Vol1").is_ok());
        assert!(validate_stem("Vol 2").is_ok());
        assert!(validate_stem("").is_err());
        assert!(validate_stem("a/b").is_err());
        assert!(validate_stem("vol*").is_err());
        assert!(validate_stem(" vol").is_err());
        assert!(validate_stem("..").is_err());
    }

    #[tokio::test]
    async fn resolve_missing_file() {
        let err = resolve_input(Path::new("/nope/book.pdf"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InputNotFound { .. }));
    }

    #[tokio::test]
    async fn resolve_rejects_wrong_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.txt");
        std::fs::write(&path, b"0123456789").unwrap();
        let err = resolve_input(&path, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotAPdf { .. }));
    }

    #[tokio::test]
    async fn resolve_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("folder.pdf");
        std::fs::create_dir(&sub).unwrap();
        let err = resolve_input(&sub, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotAPdf { .. }));
    }

    #[tokio::test]
    async fn resolve_uses_override_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan_0001.pdf");
        std::fs::write(&path, b"0123456789").unwrap();

        let doc = resolve_input(&path, Some("HOL_Vol3")).await.unwrap();
        assert_eq!(doc.stem, "HOL_Vol3");
        assert_eq!(doc.hash, Fingerprint::of_bytes(b"0123456789"));

        let err = resolve_input(&path, Some("bad/stem")).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidStem { .. }));
    }
}
