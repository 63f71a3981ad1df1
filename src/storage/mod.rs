//! Object-store access behind one small trait.
//!
//! The pipeline only ever needs six operations on external storage: an
//! existence check, upload, download, glob listing, and reading/writing a
//! small text object (the resume marker). [`ObjectStore`] captures exactly
//! those so the stage runner can be exercised against a stub, against a local
//! directory ([`LocalStore`]) or against Cloud Storage through the `gsutil`
//! CLI ([`GsutilStore`]).
//!
//! ## Glob syntax
//!
//! `list` accepts the subset of gsutil wildcards the pipeline uses:
//! `*` matches within one path segment, `**` matches across segments and
//! `?` matches one character.

pub mod gsutil;
pub mod local;

pub use gsutil::GsutilStore;
pub use local::LocalStore;

use crate::error::PipelineError;
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;

/// The external object store the pipeline reads from and writes to.
///
/// URIs are full object URIs such as `gs://bucket/path/to/object`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for log lines.
    fn name(&self) -> &str;

    /// Whether an object exists at `uri`.
    async fn exists(&self, uri: &str) -> Result<bool, PipelineError>;

    /// Copy a local file to `uri`, overwriting any existing object.
    async fn upload(&self, local: &Path, uri: &str) -> Result<(), PipelineError>;

    /// Copy the object at `uri` to a local file.
    async fn download(&self, uri: &str, local: &Path) -> Result<(), PipelineError>;

    /// All object URIs matching `pattern`, sorted. No match is an empty list.
    async fn list(&self, pattern: &str) -> Result<Vec<String>, PipelineError>;

    /// Contents of a small text object, `None` when it does not exist.
    async fn read_text(&self, uri: &str) -> Result<Option<String>, PipelineError>;

    /// Create or replace a small text object.
    async fn write_text(&self, uri: &str, contents: &str) -> Result<(), PipelineError>;
}

/// Shared handle used throughout the pipeline.
pub type SharedStore = Arc<dyn ObjectStore>;

/// Join a prefix and path segments with single slashes.
pub fn join_uri(prefix: &str, segments: &[&str]) -> String {
    let mut out = prefix.trim_end_matches('/').to_string();
    for seg in segments {
        let seg = seg.trim_matches('/');
        if seg.is_empty() {
            continue;
        }
        out.push('/');
        out.push_str(seg);
    }
    out
}

/// Last path segment of a URI: `gs://b/x/y.txt` → `y.txt`.
pub fn uri_basename(uri: &str) -> &str {
    uri.trim_end_matches('/').rsplit('/').next().unwrap_or(uri)
}

/// Translate a gsutil-style wildcard into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, PipelineError> {
    let mut re = String::with_capacity(pattern.len() * 2 + 2);
    re.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| PipelineError::Internal(format!("bad glob '{pattern}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_uri_normalises_slashes() {
        assert_eq!(
            join_uri("gs://b/out/", &["2024-01-01", "/batch_clean/", "x.txt"]),
            "gs://b/out/2024-01-01/batch_clean/x.txt"
        );
        assert_eq!(join_uri("gs://b", &["", "a"]), "gs://b/a");
    }

    #[test]
    fn basename_of_uri() {
        assert_eq!(uri_basename("gs://b/x/y.txt"), "y.txt");
        assert_eq!(uri_basename("gs://b/x/"), "x");
    }

    #[test]
    fn single_star_stays_in_segment() {
        let re = glob_to_regex("gs://b/out/*/batch_clean/book_ocr.txt").unwrap();
        assert!(re.is_match("gs://b/out/2024-01-01/batch_clean/book_ocr.txt"));
        assert!(!re.is_match("gs://b/out/a/b/batch_clean/book_ocr.txt"));
        assert!(!re.is_match("gs://b/out/2024-01-01/batch_clean/book_ocr.txt.bak"));
    }

    #[test]
    fn double_star_crosses_segments() {
        let re = glob_to_regex("gs://b/batch/**/book-*.json").unwrap();
        assert!(re.is_match("gs://b/batch/book-0.json"));
        assert!(re.is_match("gs://b/batch/123/0/book-12.json"));
        assert!(!re.is_match("gs://b/batch/123/other-1.json"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let re = glob_to_regex("gs://b/a.b(c)/x?.txt").unwrap();
        assert!(re.is_match("gs://b/a.b(c)/x1.txt"));
        assert!(!re.is_match("gs://b/aXb(c)/x1.txt"));
    }
}
