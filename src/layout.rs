//! Object-store path conventions.
//!
//! ```text
//! <input_prefix>/<stem>.pdf                                 uploaded source
//! <output_prefix>/<YYYY-MM-DD>/batch_clean/**/<stem>-N.json OCR shards
//! <output_prefix>/<YYYY-MM-DD>/batch_clean/<stem>_ocr.txt   merged text
//! <output_prefix>/_markers/<sha256>.env                     resume marker
//! ```
//!
//! Outputs are addressed by (stem, partition). The hash only names the
//! marker, which in turn points at a human-readable output path.

use crate::config::{PipelineConfig, PARTITION_FORMAT};
use crate::fingerprint::Fingerprint;
use crate::storage::join_uri;
use chrono::NaiveDate;

const BATCH_DIR: &str = "batch_clean";
const MARKER_DIR: &str = "_markers";

/// Resolves every object URI the pipeline touches.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    input_prefix: String,
    output_prefix: String,
}

impl StorageLayout {
    pub fn new(input_prefix: impl Into<String>, output_prefix: impl Into<String>) -> Self {
        Self {
            input_prefix: input_prefix.into(),
            output_prefix: output_prefix.into(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.input_prefix.clone(), config.output_prefix.clone())
    }

    pub fn output_prefix(&self) -> &str {
        &self.output_prefix
    }

    /// Upload destination of the source PDF.
    pub fn input_pdf(&self, stem: &str) -> String {
        join_uri(&self.input_prefix, &[&format!("{stem}.pdf")])
    }

    /// Directory the OCR batch writes into for one partition.
    pub fn batch_prefix(&self, partition: NaiveDate) -> String {
        join_uri(
            &self.output_prefix,
            &[&partition.format(PARTITION_FORMAT).to_string(), BATCH_DIR],
        )
    }

    /// Merged plain-text OCR output of one volume.
    pub fn merged_text(&self, partition: NaiveDate, stem: &str) -> String {
        join_uri(&self.batch_prefix(partition), &[&merged_file_name(stem)])
    }

    /// Glob for the OCR JSON shards of one volume.
    pub fn shard_glob(&self, partition: NaiveDate, stem: &str) -> String {
        join_uri(&self.batch_prefix(partition), &["**", &format!("{stem}-*.json")])
    }

    /// Glob for the merged text of `stem` across all partitions.
    pub fn merged_text_glob(&self, stem: &str) -> String {
        join_uri(&self.output_prefix, &["*", BATCH_DIR, &merged_file_name(stem)])
    }

    /// Resume marker for a content hash.
    pub fn marker(&self, hash: &Fingerprint) -> String {
        join_uri(
            &self.output_prefix,
            &[MARKER_DIR, &format!("{}.env", hash.as_str())],
        )
    }

    /// Partition segment of a merged-text URI produced by
    /// [`merged_text_glob`](Self::merged_text_glob), if it is a date.
    pub fn partition_of(&self, merged_uri: &str) -> Option<NaiveDate> {
        let rest = merged_uri
            .strip_prefix(&self.output_prefix)?
            .trim_start_matches('/');
        let segment = rest.split('/').next()?;
        NaiveDate::parse_from_str(segment, PARTITION_FORMAT).ok()
    }
}

/// File name of the merged text for `stem`.
pub fn merged_file_name(stem: &str) -> String {
    format!("{stem}_ocr.txt")
}
