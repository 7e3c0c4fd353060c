//! Find the metadata segments of one day and pair them with audio recordings.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info};
use walkdir::WalkDir;

use crate::error::{ConfigurationError, MatchError};
use crate::metadata::{self, MetadataEntry};
use crate::request::{prefix_path, DayRequest};
use crate::timestamp;

const AUDIO_EXTENSIONS: &[&str] = &["wav", "flac"];

/// Where a segment's samples come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioSource {
    pub path: PathBuf,
    /// Wall-clock time of the recording's first sample.
    pub recording_start: DateTime<Utc>,
}

/// A metadata segment resolved to its audio, clipped to the requested day.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchedSegment {
    pub metadata_path: PathBuf,
    pub audio: Option<AudioSource>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl MatchedSegment {
    /// Deterministic name of this segment, derived from its start time.
    pub fn identifier(&self) -> String {
        timestamp::identifier(self.start_time)
    }

    pub fn audio_path(&self) -> Option<&Path> {
        self.audio.as_ref().map(|audio| audio.path.as_path())
    }
}

/// An audio recording discovered under the audio base directory.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Recording {
    start: DateTime<Utc>,
    path: PathBuf,
}

/// Recordings sorted by start time, then path.
#[derive(Clone, Debug, Default)]
pub struct AudioIndex {
    recordings: Vec<Recording>,
}

impl AudioIndex {
    /// Scan `dir` recursively for audio files with a recording timestamp.
    pub fn scan(dir: &Path) -> Self {
        let mut recordings: Vec<Recording> = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| has_extension(entry.path(), AUDIO_EXTENSIONS))
            .filter_map(|entry| match timestamp::recording_start(entry.path()) {
                Some(start) => Some(Recording {
                    start,
                    path: entry.into_path(),
                }),
                None => {
                    debug!(
                        "ignoring audio file without timestamp: {}",
                        entry.path().display()
                    );
                    None
                }
            })
            .collect();
        recordings.sort();
        Self { recordings }
    }

    /// Build an index from known `(start, path)` pairs.
    pub fn from_recordings<I>(recordings: I) -> Self
    where
        I: IntoIterator<Item = (DateTime<Utc>, PathBuf)>,
    {
        let mut recordings: Vec<Recording> = recordings
            .into_iter()
            .map(|(start, path)| Recording { start, path })
            .collect();
        recordings.sort();
        Self { recordings }
    }

    pub fn len(&self) -> usize {
        self.recordings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recordings.is_empty()
    }

    /// The recording with the latest start not after `instant`.
    ///
    /// Among recordings sharing that start, the first path in order wins.
    pub fn nearest_before(&self, instant: DateTime<Utc>) -> Option<AudioSource> {
        let after = self
            .recordings
            .partition_point(|recording| recording.start <= instant);
        let latest = self.recordings[..after].last()?;
        let first_at_start = self.recordings[..after].partition_point(|r| r.start < latest.start);
        let chosen = &self.recordings[first_at_start];
        Some(AudioSource {
            path: chosen.path.clone(),
            recording_start: chosen.start,
        })
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

#[derive(Clone, Debug)]
struct PlannedEntry {
    metadata_path: PathBuf,
    index: usize,
    entry: MetadataEntry,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Clone, Debug)]
enum AudioMode {
    Indexed(AudioIndex),
    MetadataOnly { prefix: String },
}

/// The segments of one day, resolved lazily on iteration.
///
/// Iterating twice yields identical items in identical order.
#[derive(Clone, Debug)]
pub struct SegmentPlan {
    rejected: Vec<MatchError>,
    entries: Vec<PlannedEntry>,
    audio: AudioMode,
}

impl SegmentPlan {
    /// Number of items [`SegmentPlan::iter`] yields.
    pub fn len(&self) -> usize {
        self.rejected.len() + self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> Segments<'_> {
        Segments {
            plan: self,
            position: 0,
            seen: HashSet::new(),
        }
    }

    fn resolve(&self, planned: &PlannedEntry) -> Result<MatchedSegment, MatchError> {
        let audio = match &self.audio {
            AudioMode::Indexed(index) => Some(index.nearest_before(planned.start).ok_or_else(
                || MatchError::NoAudio {
                    metadata: planned.metadata_path.clone(),
                    start: planned.start,
                },
            )?),
            AudioMode::MetadataOnly { prefix } => planned.entry.uri.as_ref().map(|uri| {
                let path = prefix_path(prefix, uri);
                let recording_start =
                    timestamp::recording_start(&path).unwrap_or(planned.entry.start);
                AudioSource {
                    path,
                    recording_start,
                }
            }),
        };

        Ok(MatchedSegment {
            metadata_path: planned.metadata_path.clone(),
            audio,
            start_time: planned.start,
            end_time: planned.end,
        })
    }
}

impl<'a> IntoIterator for &'a SegmentPlan {
    type Item = Result<MatchedSegment, MatchError>;
    type IntoIter = Segments<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`SegmentPlan`].
pub struct Segments<'a> {
    plan: &'a SegmentPlan,
    position: usize,
    seen: HashSet<String>,
}

impl Iterator for Segments<'_> {
    type Item = Result<MatchedSegment, MatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        let rejected = self.plan.rejected.len();
        let position = self.position;
        if position >= self.plan.len() {
            return None;
        }
        self.position += 1;

        if position < rejected {
            return Some(Err(self.plan.rejected[position].clone()));
        }

        let planned = &self.plan.entries[position - rejected];
        let identifier = timestamp::identifier(planned.start);
        if !self.seen.insert(identifier.clone()) {
            return Some(Err(MatchError::DuplicateSegment {
                metadata: planned.metadata_path.clone(),
                identifier,
            }));
        }
        Some(self.plan.resolve(planned))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.plan.len() - self.position;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Segments<'_> {}

/// Locates metadata and audio for a day.
#[derive(Clone, Debug, Default)]
pub struct Locator;

impl Locator {
    pub fn new() -> Self {
        Self
    }

    /// Collect the segments of `request`'s day.
    ///
    /// Missing base directories are configuration errors. Problems with
    /// individual files surface as [`MatchError`] items of the plan.
    pub fn find_segments(&self, request: &DayRequest) -> Result<SegmentPlan, ConfigurationError> {
        let json_dir = request.json_base_dir();
        if !json_dir.is_dir() {
            return Err(ConfigurationError::MissingDirectory {
                role: "JSON base",
                path: json_dir.to_path_buf(),
            });
        }

        let audio = match request.audio_search_dir() {
            Some(dir) => {
                if !dir.is_dir() {
                    return Err(ConfigurationError::MissingDirectory {
                        role: "audio base",
                        path: dir,
                    });
                }
                let index = AudioIndex::scan(&dir);
                info!(
                    "indexed {} audio recording(s) under {}",
                    index.len(),
                    dir.display()
                );
                AudioMode::Indexed(index)
            }
            None => {
                info!("no audio base directory given, running in metadata-only mode");
                AudioMode::MetadataOnly {
                    prefix: request.audio_path_prefix().to_owned(),
                }
            }
        };

        let files = metadata_files(json_dir, request);
        info!(
            "found {} metadata file(s) for {} under {}",
            files.len(),
            request.date(),
            json_dir.display()
        );

        let mut rejected = Vec::new();
        let mut entries = Vec::new();
        for path in files {
            for (index, entry) in metadata::read_entries(&path).into_iter().enumerate() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        rejected.push(err);
                        continue;
                    }
                };

                let start = entry.start.max(request.day_start());
                let end = entry.end.min(request.day_end());
                if start >= end {
                    debug!(
                        "entry {index} of {} lies outside {}",
                        path.display(),
                        request.date()
                    );
                    continue;
                }

                entries.push(PlannedEntry {
                    metadata_path: path.clone(),
                    index,
                    entry,
                    start,
                    end,
                });
            }
        }

        entries.sort_by(|a, b| {
            (a.start, &a.metadata_path, a.index).cmp(&(b.start, &b.metadata_path, b.index))
        });

        Ok(SegmentPlan {
            rejected,
            entries,
            audio,
        })
    }
}

fn metadata_files(dir: &Path, request: &DayRequest) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| has_extension(path, &["json"]))
        .filter(|path| timestamp::name_matches_date(path, request.date()))
        .collect();
    files.sort();
    files
}
