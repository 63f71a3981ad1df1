//! Built-in merge of OCR output shards into one text file.
//!
//! Batch OCR writes each volume as a series of JSON documents named
//! `<stem>-<N>.json`, possibly nested under operation and document
//! sub-directories. Each carries the recognised text of its page range in a
//! top-level `text` field. Merging means: fetch every shard, order them by
//! shard index, concatenate the `text` fields, drop leading blank lines, and
//! publish the result as `<stem>_ocr.txt` next to the batch output.
//!
//! Ordering is numeric on `N` so that `-2` precedes `-10`.

use crate::error::PipelineError;
use crate::layout::{merged_file_name, StorageLayout};
use crate::storage::{uri_basename, ObjectStore};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

static RE_SHARD_INDEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"-(\d+)\.json$").unwrap());

/// What a merge produced.
#[derive(Debug, Clone, Serialize)]
pub struct MergeSummary {
    pub merged_uri: String,
    pub shards_found: usize,
    pub shards_used: usize,
    pub bytes: usize,
}

/// Sort key for shard URIs: numeric shard index, then the URI itself.
fn shard_order_key(uri: &str) -> (u64, String) {
    let index = RE_SHARD_INDEX
        .captures(uri_basename(uri))
        .and_then(|c| c[1].parse::<u64>().ok())
        .unwrap_or(u64::MAX);
    (index, uri.to_string())
}

/// Order shard URIs by shard index.
pub fn order_shards(mut uris: Vec<String>) -> Vec<String> {
    uris.sort_by_cached_key(|u| shard_order_key(u));
    uris
}

/// Extract the `text` field of one shard document. A missing field is empty.
pub fn shard_text(json: &str) -> Result<String, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    Ok(value
        .get("text")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string())
}

/// Concatenate shard texts and drop leading blank lines.
pub fn merge_texts<I, S>(texts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined: String = texts.into_iter().map(|t| t.as_ref().to_string()).collect();
    trim_leading_blank_lines(&joined).to_string()
}

fn trim_leading_blank_lines(s: &str) -> &str {
    let mut offset = 0;
    for line in s.split_inclusive('\n') {
        if line.trim().is_empty() {
            offset += line.len();
        } else {
            break;
        }
    }
    &s[offset..]
}

/// Merge the shards of `stem` in `partition` and upload the merged text.
///
/// Shards are staged under `<work_dir>/shards/`; the merged text is written
/// to `<work_dir>/<stem>_ocr.txt` before upload. Shards that are not valid
/// JSON are skipped with a warning; no usable shard at all is an error.
pub async fn merge_volume(
    store: &dyn ObjectStore,
    layout: &StorageLayout,
    partition: NaiveDate,
    stem: &str,
    work_dir: &Path,
) -> Result<MergeSummary, PipelineError> {
    let fail = |detail: String| PipelineError::MergeFailed {
        stem: stem.to_string(),
        detail,
    };

    let pattern = layout.shard_glob(partition, stem);
    let shards = order_shards(store.list(&pattern).await?);
    if shards.is_empty() {
        return Err(fail(format!("no OCR shards match {pattern}")));
    }
    info!("Merging {} shard(s) for '{}'", shards.len(), stem);

    let shard_dir = work_dir.join("shards");
    tokio::fs::create_dir_all(&shard_dir)
        .await
        .map_err(|e| PipelineError::io(&shard_dir, e))?;

    let mut texts = Vec::with_capacity(shards.len());
    for (i, uri) in shards.iter().enumerate() {
        // Prefix with the position: nested shards may share a basename.
        let local = shard_dir.join(format!("{i:05}-{}", uri_basename(uri)));
        store.download(uri, &local).await?;
        let raw = tokio::fs::read_to_string(&local)
            .await
            .map_err(|e| PipelineError::io(&local, e))?;
        match shard_text(&raw) {
            Ok(text) => {
                debug!("shard {} → {} chars", uri_basename(uri), text.len());
                texts.push(text);
            }
            Err(e) => warn!("Skipping unreadable shard {}: {}", uri, e),
        }
    }
    if texts.is_empty() {
        return Err(fail(format!("none of the {} shard(s) could be parsed", shards.len())));
    }

    let merged = merge_texts(&texts);
    let local = work_dir.join(merged_file_name(stem));
    tokio::fs::write(&local, &merged)
        .await
        .map_err(|e| PipelineError::io(&local, e))?;

    let merged_uri = layout.merged_text(partition, stem);
    store.upload(&local, &merged_uri).await?;
    info!("Merged text → {}", merged_uri);

    Ok(MergeSummary {
        merged_uri,
        shards_found: shards.len(),
        shards_used: texts.len(),
        bytes: merged.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStore;

    #[test]
    fn shards_sort_numerically() {
        let ordered = order_shards(vec![
            "gs://b/x/op/0/book-10.json".into(),
            "gs://b/x/op/0/book-2.json".into(),
            "gs://b/x/op/0/book-0.json".into(),
        ]);
        assert_eq!(
            ordered,
            vec![
                "gs://b/x/op/0/book-0.json",
                "gs://b/x/op/0/book-2.json",
                "gs://b/x/op/0/book-10.json",
            ]
        );
    }

    #[test]
    fn shard_text_handles_missing_field() {
        assert_eq!(shard_text(r#"{"text":"Hello\n"}"#).unwrap(), "Hello\n");
        assert_eq!(shard_text(r#"{"pages":[]}"#).unwrap(), "");
        assert!(shard_text("not json").is_err());
    }

    #[test]
    fn leading_blank_lines_are_dropped() {
        let merged = merge_texts(["\n  \n", "CHAPTER I\n", "text\n"]);
        assert_eq!(merged, "CHAPTER I\ntext\n");
        assert_eq!(merge_texts(["\n\n"]), "");
    }

    #[tokio::test]
    async fn merge_volume_uploads_merged_text() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let store = LocalStore::new(root.path());
        let layout = StorageLayout::new("gs://b/in", "gs://b/out");
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let batch = layout.batch_prefix(day);

        store
            .write_text(&format!("{batch}/op/0/book-10.json"), r#"{"text":"third\n"}"#)
            .await
            .unwrap();
        store
            .write_text(&format!("{batch}/op/0/book-0.json"), r#"{"text":"\n\nfirst\n"}"#)
            .await
            .unwrap();
        store
            .write_text(&format!("{batch}/op/0/book-2.json"), r#"{"text":"second\n"}"#)
            .await
            .unwrap();
        store
            .write_text(&format!("{batch}/op/0/book-3.json"), "{broken")
            .await
            .unwrap();
        store
            .write_text(&format!("{batch}/op/0/other-0.json"), r#"{"text":"nope"}"#)
            .await
            .unwrap();

        let summary = merge_volume(&store, &layout, day, "book", work.path())
            .await
            .unwrap();
        assert_eq!(summary.shards_found, 4);
        assert_eq!(summary.shards_used, 3);

        let merged = store
            .read_text(&layout.merged_text(day, "book"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged, "first\nsecond\nthird\n");
    }

    #[tokio::test]
    async fn merge_without_shards_fails() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let store = LocalStore::new(root.path());
        let layout = StorageLayout::new("gs://b/in", "gs://b/out");
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let err = merge_volume(&store, &layout, day, "book", work.path())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MergeFailed { .. }));
    }
}
