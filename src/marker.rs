//! The persisted resume marker.
//!
//! A marker is a tiny `KEY=value` text object mapping a content hash to the
//! (partition, stem) pair under which that book's merged OCR text lives. It
//! uses the same env-file syntax as the configuration so it can be read with
//! `dotenvy` and inspected by hand.

use crate::config::{KEY_DATE_PREFIX, PARTITION_FORMAT};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const KEY_STEM: &str = "STEM";
const KEY_SOURCE_SHA256: &str = "SOURCE_SHA256";
const KEY_CREATED_AT: &str = "CREATED_AT";

/// Decoded marker contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub partition: NaiveDate,
    pub stem: String,
    /// Informational; the marker's object name already carries the hash.
    pub source_hash: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Marker {
    pub fn new(partition: NaiveDate, stem: impl Into<String>, source_hash: impl Into<String>) -> Self {
        Self {
            partition,
            stem: stem.into(),
            source_hash: Some(source_hash.into()),
            created_at: Some(Utc::now()),
        }
    }

    /// Render as env-file text.
    pub fn to_env_string(&self) -> String {
        let mut s = String::from("# scan2epub resume marker\n");
        s.push_str(&format!(
            "{KEY_DATE_PREFIX}={}\n",
            self.partition.format(PARTITION_FORMAT)
        ));
        s.push_str(&format!("{KEY_STEM}={}\n", quote(&self.stem)));
        if let Some(ref h) = self.source_hash {
            s.push_str(&format!("{KEY_SOURCE_SHA256}={h}\n"));
        }
        if let Some(ref t) = self.created_at {
            s.push_str(&format!("{KEY_CREATED_AT}={}\n", t.to_rfc3339()));
        }
        s
    }

    /// Parse env-file text. The error string says what is wrong.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut map = HashMap::new();
        for item in dotenvy::from_read_iter(text.as_bytes()) {
            let (k, v) = item.map_err(|e| format!("unparseable line: {e}"))?;
            map.insert(k, v);
        }

        let date = map
            .get(KEY_DATE_PREFIX)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| format!("missing {KEY_DATE_PREFIX}"))?;
        let partition = NaiveDate::parse_from_str(date.trim(), PARTITION_FORMAT)
            .map_err(|_| format!("{KEY_DATE_PREFIX} '{date}' is not YYYY-MM-DD"))?;

        let stem = map
            .get(KEY_STEM)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| format!("missing {KEY_STEM}"))?;

        let created_at = map
            .get(KEY_CREATED_AT)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(Self {
            partition,
            stem,
            source_hash: map.get(KEY_SOURCE_SHA256).cloned(),
            created_at,
        })
    }
}

/// Double-quote a value for the env parser.
///
/// Inside double quotes `dotenvy` expands `$NAME` and treats `\` as an
/// escape, so `\`, `"` and `$` are escaped. `'` and `#` need nothing.
fn quote(v: &str) -> String {
    let mut out = String::with_capacity(v.len() + 2);
    out.push('"');
    for c in v.chars() {
        if matches!(c, '\\' | '"' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_marker() {
        let m = Marker::parse("DATE_PREFIX=2024-01-01\nSTEM=book\n").unwrap();
        assert_eq!(m.partition, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(m.stem, "book");
        assert!(m.source_hash.is_none());
        assert!(m.created_at.is_none());
    }

    #[test]
    fn written_marker_parses_back() {
        let m = Marker::new(
            NaiveDate::from_ymd_opt(2023, 11, 30).unwrap(),
            "HOL Vol 2",
            "abc123",
        );
        let parsed = Marker::parse(&m.to_env_string()).unwrap();
        assert_eq!(parsed.stem, "HOL Vol 2");
        assert_eq!(parsed.partition, m.partition);
        assert_eq!(parsed.source_hash.as_deref(), Some("abc123"));
        assert!(parsed.created_at.is_some());
    }

    #[test]
    fn stems_with_env_syntax_round_trip() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for stem in [
            "Homer's Odyssey",
            "Vol$1",
            "${HOME}",
            "Say \"hi\"",
            "Book #2",
            "O'Brien $5 \"draft\" #3",
            "plain",
        ] {
            let written = Marker::new(day, stem, "abc").to_env_string();
            let parsed = Marker::parse(&written)
                .unwrap_or_else(|e| panic!("{stem:?} did not parse back: {e}\n{written}"));
            assert_eq!(parsed.stem, stem);
        }
    }

    #[test]
    fn stem_is_written_double_quoted() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let text = Marker::new(day, "Vol$1", "abc").to_env_string();
        assert!(text.contains("STEM=\"Vol\\$1\"\n"), "got: {text}");
    }

    #[test]
    fn missing_fields_are_reported() {
        assert!(Marker::parse("STEM=book\n").unwrap_err().contains("DATE_PREFIX"));
        assert!(Marker::parse("DATE_PREFIX=2024-01-01\n")
            .unwrap_err()
            .contains("STEM"));
    }

    #[test]
    fn non_date_partition_rejected() {
        let err = Marker::parse("DATE_PREFIX=latest\nSTEM=book\n").unwrap_err();
        assert!(err.contains("YYYY-MM-DD"), "got: {err}");
    }
}
