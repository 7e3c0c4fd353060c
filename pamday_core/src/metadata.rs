//! JSON metadata describing recorded segments.
//!
//! A metadata file holds either one entry or an array of entries:
//!
//! ```json
//! [
//!   {"uri": "/PAM/wav/MARS-20220902T095800Z.wav",
//!    "start": "2022-09-02T10:00:00Z", "end": "2022-09-02T10:05:00Z"},
//!   {"start": "2022-09-02T10:05:00Z", "duration_secs": 300}
//! ]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::error::MatchError;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MetadataFile {
    Many(Vec<RawEntry>),
    One(RawEntry),
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    start: DateTime<Utc>,
    #[serde(default)]
    end: Option<DateTime<Utc>>,
    #[serde(default)]
    duration_secs: Option<f64>,
    #[serde(default)]
    uri: Option<String>,
}

/// One validated segment description from a metadata file.
#[derive(Clone, Debug, PartialEq)]
pub struct MetadataEntry {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Audio location recorded by the producer, without any `file://` scheme.
    pub uri: Option<PathBuf>,
}

fn invalid(path: &Path, reason: impl Into<String>) -> MatchError {
    MatchError::InvalidMetadata {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

impl RawEntry {
    fn validate(self, path: &Path, index: usize) -> Result<MetadataEntry, MatchError> {
        let end = match (self.end, self.duration_secs) {
            (Some(end), _) => end,
            (None, Some(secs)) if secs.is_finite() && secs > 0.0 => {
                let millis = (secs * 1_000.0).round();
                (millis < i64::MAX as f64)
                    .then(|| Duration::try_milliseconds(millis as i64))
                    .flatten()
                    .and_then(|delta| self.start.checked_add_signed(delta))
                    .ok_or_else(|| {
                        invalid(
                            path,
                            format!("entry {index}: duration_secs {secs} is out of range"),
                        )
                    })?
            }
            (None, Some(secs)) => {
                return Err(invalid(
                    path,
                    format!("entry {index}: duration_secs must be positive, got {secs}"),
                ))
            }
            (None, None) => {
                return Err(invalid(
                    path,
                    format!("entry {index}: either end or duration_secs is required"),
                ))
            }
        };

        if end <= self.start {
            return Err(invalid(
                path,
                format!("entry {index}: end {end} is not after start {}", self.start),
            ));
        }

        Ok(MetadataEntry {
            start: self.start,
            end,
            uri: self.uri.map(|uri| {
                PathBuf::from(uri.strip_prefix("file://").unwrap_or(&uri))
            }),
        })
    }
}

/// Parse metadata from its JSON text.
///
/// Each entry is validated on its own so that one bad entry does not hide
/// the others. A file that is not valid JSON yields a single error.
pub fn parse_entries(path: &Path, text: &str) -> Vec<Result<MetadataEntry, MatchError>> {
    match serde_json::from_str::<MetadataFile>(text) {
        Ok(MetadataFile::One(entry)) => vec![entry.validate(path, 0)],
        Ok(MetadataFile::Many(entries)) => entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| entry.validate(path, index))
            .collect(),
        Err(err) => vec![Err(invalid(path, err.to_string()))],
    }
}

/// Read and parse a metadata file.
pub fn read_entries(path: &Path) -> Vec<Result<MetadataEntry, MatchError>> {
    match fs::read_to_string(path) {
        Ok(text) => parse_entries(path, &text),
        Err(err) => vec![Err(invalid(path, err.to_string()))],
    }
}
