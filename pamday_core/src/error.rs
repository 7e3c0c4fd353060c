use std::path::PathBuf;

use chrono::{DateTime, Utc};
use symphonia::core::errors::Error as SymphoniaError;
use thiserror::Error;

/// Errors detected while validating the run configuration.
///
/// These are fatal: they are reported before any segment is processed.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The requested year/month/day is not a calendar date.
    #[error("invalid date {year:04}-{month:02}-{day:02}")]
    InvalidDate { year: i32, month: u32, day: u32 },

    /// A base directory that must exist could not be found.
    #[error("{role} directory does not exist: {}", path.display())]
    MissingDirectory { role: &'static str, path: PathBuf },

    /// The output directory could not be created.
    #[error("failed to create output directory '{}'", path.display())]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The PSD window length must be a positive number of seconds.
    #[error("PSD window length must be greater than zero seconds")]
    InvalidWindowLength,

    /// The PSD overlap must lie in `[0, 1)`.
    #[error("PSD overlap must be within [0, 1), got {0}")]
    InvalidOverlap(f64),

    /// The worker pool could not be started.
    #[error("failed to start a pool of {threads} worker(s)")]
    WorkerPool {
        threads: usize,
        #[source]
        source: rayon::ThreadPoolBuildError,
    },
}

/// A segment that could not be paired with the inputs it needs.
///
/// Recoverable: the segment is skipped and the run continues.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MatchError {
    /// No audio recording starts at or before the segment start.
    #[error("no audio recording starts at or before {start} (metadata '{}')", metadata.display())]
    NoAudio {
        metadata: PathBuf,
        start: DateTime<Utc>,
    },

    /// A metadata file or one of its entries could not be understood.
    #[error("invalid metadata '{}': {reason}", path.display())]
    InvalidMetadata { path: PathBuf, reason: String },

    /// Another segment already claimed the same output name.
    #[error("segment {identifier} from '{}' duplicates an earlier segment", metadata.display())]
    DuplicateSegment {
        metadata: PathBuf,
        identifier: String,
    },
}

/// Failure while processing a single matched segment.
///
/// Recoverable: the failure is logged and counted, sibling segments proceed.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Wrapper around errors produced by the Symphonia decoding library.
    #[error("failed to decode '{}'", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: SymphoniaError,
    },

    /// The container does not expose a decodable default track.
    #[error("'{}' does not provide a decodable audio track", path.display())]
    UnsupportedAudio { path: PathBuf },

    /// The decoder track lacks a sample rate.
    #[error("'{}' does not advertise a sample rate", path.display())]
    MissingSampleRate { path: PathBuf },

    /// The segment window starts after the recording ends.
    #[error("segment {identifier} has no samples in '{}'", path.display())]
    EmptySegment { identifier: String, path: PathBuf },

    /// Errors raised while writing the extracted WAV file.
    #[error("failed to write extracted audio '{}'", path.display())]
    WavWrite {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    /// IO errors encountered while reading or writing files.
    #[error("I/O error on '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The segment report could not be serialized.
    #[error("failed to serialize report for segment {identifier}")]
    Report {
        identifier: String,
        #[source]
        source: serde_json::Error,
    },

    /// The acoustic routine rejected its input.
    #[error("acoustic processing failed: {0}")]
    Acoustic(String),
}

/// Errors that escape [`crate::SegmentProcessor::process_day`].
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Every segment that was attempted failed.
    #[error("all {failed} attempted segment(s) failed")]
    AllSegmentsFailed { failed: usize },
}
