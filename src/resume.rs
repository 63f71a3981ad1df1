//! Resume lookup: find prior OCR output for a content hash.
//!
//! Two lookups, most specific first:
//!
//! 1. **Marker**: `<output_prefix>/_markers/<sha256>.env`, written after a
//!    successful merge. Survives renamed input files.
//! 2. **Listing**: `<output_prefix>/*/batch_clean/<stem>_ocr.txt`. Catches
//!    output from runs that predate markers. Partition segments are parsed as
//!    dates and the latest *date* wins; segments that are not dates are
//!    ignored rather than compared as strings.
//!
//! A hit is only a location. Whether OCR can actually be skipped is decided by
//! [`ResumeLocator::reusable_output`], which checks the merged text is still
//! there.

use crate::error::PipelineError;
use crate::fingerprint::Fingerprint;
use crate::layout::StorageLayout;
use crate::marker::Marker;
use crate::storage::SharedStore;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Where a [`ResumeState::Found`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeSource {
    Marker,
    Listing,
}

/// Outcome of a resume lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResumeState {
    NotFound,
    Found {
        partition: NaiveDate,
        stem: String,
        source: ResumeSource,
    },
}

/// Looks up and records resume markers in the object store.
pub struct ResumeLocator {
    store: SharedStore,
    layout: StorageLayout,
}

impl ResumeLocator {
    pub fn new(store: SharedStore, layout: StorageLayout) -> Self {
        Self { store, layout }
    }

    /// Find prior output for `hash`, falling back to a listing for `stem`.
    pub async fn locate(&self, hash: &Fingerprint, stem: &str) -> Result<ResumeState, PipelineError> {
        let marker_uri = self.layout.marker(hash);
        if let Some(text) = self.store.read_text(&marker_uri).await? {
            let marker = Marker::parse(&text).map_err(|reason| PipelineError::MarkerInvalid {
                uri: marker_uri.clone(),
                reason,
            })?;
            info!(
                "Resume marker found for {}: stem '{}', partition {}",
                hash.short(),
                marker.stem,
                marker.partition
            );
            return Ok(ResumeState::Found {
                partition: marker.partition,
                stem: marker.stem,
                source: ResumeSource::Marker,
            });
        }
        debug!("No resume marker at {}", marker_uri);

        let pattern = self.layout.merged_text_glob(stem);
        let hits = self.store.list(&pattern).await?;
        let latest = latest_partition(&self.layout, &hits);
        match latest {
            Some(partition) => {
                info!(
                    "Found earlier merged output for '{}' in partition {} ({} candidate(s))",
                    stem,
                    partition,
                    hits.len()
                );
                Ok(ResumeState::Found {
                    partition,
                    stem: stem.to_string(),
                    source: ResumeSource::Listing,
                })
            }
            None => {
                if !hits.is_empty() {
                    warn!(
                        "Ignoring {} merged output(s) for '{}' without a date partition",
                        hits.len(),
                        stem
                    );
                }
                Ok(ResumeState::NotFound)
            }
        }
    }

    /// Partition and stem whose merged text can be reused, if any.
    ///
    /// `explicit_stem` (from `--stem`) takes precedence over the stem recorded
    /// in the marker. A `Found` state pointing at a merged text that no longer
    /// exists is treated as a fresh run.
    pub async fn reusable_output(
        &self,
        state: &ResumeState,
        explicit_stem: Option<&str>,
    ) -> Result<Option<(NaiveDate, String)>, PipelineError> {
        match state {
            ResumeState::NotFound => Ok(None),
            ResumeState::Found {
                partition, stem, ..
            } => {
                let stem = explicit_stem.unwrap_or(stem);
                let uri = self.layout.merged_text(*partition, stem);
                if self.store.exists(&uri).await? {
                    Ok(Some((*partition, stem.to_string())))
                } else {
                    warn!("Resume state points at {} but it is missing; running OCR again", uri);
                    Ok(None)
                }
            }
        }
    }

    /// Record that `hash` now has merged output at (partition, stem).
    pub async fn write_marker(
        &self,
        hash: &Fingerprint,
        partition: NaiveDate,
        stem: &str,
    ) -> Result<String, PipelineError> {
        let uri = self.layout.marker(hash);
        let marker = Marker::new(partition, stem, hash.as_str());
        self.store.write_text(&uri, &marker.to_env_string()).await?;
        debug!("Wrote resume marker {}", uri);
        Ok(uri)
    }
}

/// Latest date partition among merged-text URIs.
fn latest_partition(layout: &StorageLayout, uris: &[String]) -> Option<NaiveDate> {
    uris.iter().filter_map(|u| layout.partition_of(u)).max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalStore, ObjectStore};
    use std::sync::Arc;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn setup() -> (tempfile::TempDir, Arc<LocalStore>, ResumeLocator, StorageLayout) {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::new(root.path()));
        let layout = StorageLayout::new("gs://b/in", "gs://b/out");
        let locator = ResumeLocator::new(store.clone(), layout.clone());
        (root, store, locator, layout)
    }

    #[test]
    fn latest_partition_compares_dates_not_strings() {
        let layout = StorageLayout::new("gs://b/in", "gs://b/out");
        let uris = vec![
            "gs://b/out/2024-01-09/batch_clean/book_ocr.txt".to_string(),
            "gs://b/out/2024-01-10/batch_clean/book_ocr.txt".to_string(),
            "gs://b/out/zzz-latest/batch_clean/book_ocr.txt".to_string(),
        ];
        assert_eq!(latest_partition(&layout, &uris), Some(d(2024, 1, 10)));
    }

    #[tokio::test]
    async fn nothing_stored_is_not_found() {
        let (_root, _store, locator, _) = setup();
        let fp = Fingerprint::of_bytes(b"book");
        assert_eq!(locator.locate(&fp, "book").await.unwrap(), ResumeState::NotFound);
    }

    #[tokio::test]
    async fn marker_wins_over_listing() {
        let (_root, store, locator, layout) = setup();
        let fp = Fingerprint::of_bytes(b"book");
        store
            .write_text(&layout.merged_text(d(2024, 5, 1), "book"), "text")
            .await
            .unwrap();
        locator.write_marker(&fp, d(2024, 1, 1), "renamed").await.unwrap();

        let state = locator.locate(&fp, "book").await.unwrap();
        assert_eq!(
            state,
            ResumeState::Found {
                partition: d(2024, 1, 1),
                stem: "renamed".into(),
                source: ResumeSource::Marker,
            }
        );
    }

    #[tokio::test]
    async fn listing_fallback_picks_latest_partition() {
        let (_root, store, locator, layout) = setup();
        for p in [d(2023, 12, 31), d(2024, 2, 1), d(2024, 1, 15)] {
            store
                .write_text(&layout.merged_text(p, "book"), "text")
                .await
                .unwrap();
        }
        let fp = Fingerprint::of_bytes(b"book");
        let state = locator.locate(&fp, "book").await.unwrap();
        assert_eq!(
            state,
            ResumeState::Found {
                partition: d(2024, 2, 1),
                stem: "book".into(),
                source: ResumeSource::Listing,
            }
        );
    }

    #[tokio::test]
    async fn corrupt_marker_is_an_error() {
        let (_root, store, locator, layout) = setup();
        let fp = Fingerprint::of_bytes(b"book");
        store
            .write_text(&layout.marker(&fp), "STEM=book\n")
            .await
            .unwrap();
        let err = locator.locate(&fp, "book").await.unwrap_err();
        assert!(matches!(err, PipelineError::MarkerInvalid { .. }));
    }

    #[tokio::test]
    async fn stale_marker_is_not_reusable() {
        let (_root, _store, locator, _) = setup();
        let state = ResumeState::Found {
            partition: d(2024, 1, 1),
            stem: "book".into(),
            source: ResumeSource::Marker,
        };
        assert!(locator.reusable_output(&state, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn present_output_is_reusable() {
        let (_root, store, locator, layout) = setup();
        store
            .write_text(&layout.merged_text(d(2024, 1, 1), "book"), "text")
            .await
            .unwrap();
        let state = ResumeState::Found {
            partition: d(2024, 1, 1),
            stem: "book".into(),
            source: ResumeSource::Listing,
        };
        assert_eq!(
            locator.reusable_output(&state, None).await.unwrap(),
            Some((d(2024, 1, 1), "book".to_string()))
        );
        // An explicit stem looks for its own merged text instead.
        assert!(locator
            .reusable_output(&state, Some("other"))
            .await
            .unwrap()
            .is_none());
    }
}
