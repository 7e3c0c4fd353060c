//! Dispatch matched segments to workers and write their results.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::audio;
use crate::error::{ConfigurationError, MatchError, ProcessError, ProcessingError};
use crate::locator::{Locator, MatchedSegment, SegmentPlan};
use crate::psd::{AcousticProcessor, PsdMetrics, WelchPsd};
use crate::request::{DayRequest, InputLayout};
use crate::Config;

const RESULT_PREFIX: &str = "psd";
const EXTRACTED_PREFIX: &str = "extracted";

/// Shared flag requesting that no further segments be started.
///
/// Segments already running are allowed to finish.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a segment ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Audio was analysed and the report written.
    Processed,
    /// No audio was available; the report only describes the window.
    MetadataOnly,
    /// A report already existed and overwriting was disabled.
    SkippedExisting,
}

/// Outputs of one successfully handled segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessResult {
    pub segment_identifier: String,
    pub output_path: PathBuf,
    pub extracted_path: Option<PathBuf>,
    pub status: ProcessStatus,
}

/// Everything that can happen to one item of a day's plan.
#[derive(Debug)]
pub enum SegmentOutcome {
    Done(ProcessResult),
    Unmatched(MatchError),
    Failed {
        identifier: String,
        error: ProcessingError,
    },
    Cancelled {
        identifier: String,
    },
}

/// Tally of a day's run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DaySummary {
    pub total: usize,
    pub processed: usize,
    pub metadata_only: usize,
    pub skipped: usize,
    pub unmatched: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl DaySummary {
    fn record(&mut self, outcome: &SegmentOutcome) {
        self.total += 1;
        match outcome {
            SegmentOutcome::Done(result) => match result.status {
                ProcessStatus::Processed => self.processed += 1,
                ProcessStatus::MetadataOnly => self.metadata_only += 1,
                ProcessStatus::SkippedExisting => self.skipped += 1,
            },
            SegmentOutcome::Unmatched(_) => self.unmatched += 1,
            SegmentOutcome::Failed { .. } => self.failed += 1,
            SegmentOutcome::Cancelled { .. } => self.cancelled += 1,
        }
    }

    /// Segments the processor actually tried to produce a report for.
    pub fn attempted(&self) -> usize {
        self.processed + self.metadata_only + self.failed
    }
}

/// Receives progress notifications while a day is processed.
///
/// Called from worker threads; every method defaults to a no-op.
pub trait ProgressReporter: Sync {
    fn on_start(&self, _total: usize) {}
    fn on_segment(&self, _outcome: &SegmentOutcome) {}
    fn on_finish(&self, _summary: &DaySummary) {}
}

/// Reporter that ignores every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {}

#[derive(Serialize)]
struct SegmentReport<'a> {
    identifier: &'a str,
    status: ProcessStatus,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    metadata_path: &'a Path,
    audio_path: Option<&'a Path>,
    recording_start: Option<DateTime<Utc>>,
    /// File name of the extracted clip, relative to the output directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    extracted_file: Option<&'a str>,
    metrics: Option<&'a PsdMetrics>,
}

/// Number of workers for a requested CPU count; `0` means every core.
pub fn worker_count(num_cpus: usize) -> usize {
    if num_cpus == 0 {
        num_cpus::get().max(1)
    } else {
        num_cpus
    }
}

/// Processes the segments of a day, one worker per segment at a time.
pub struct SegmentProcessor {
    layout: InputLayout,
    config: Config,
    locator: Locator,
    routine: Box<dyn AcousticProcessor>,
    cancellation: CancellationToken,
}

impl SegmentProcessor {
    /// Build a processor using the Welch PSD routine configured in `config`.
    pub fn new(layout: InputLayout, config: Config) -> Result<Self, ConfigurationError> {
        let routine = WelchPsd::new(config.psd)?;
        Ok(Self {
            layout,
            config,
            locator: Locator::new(),
            routine: Box::new(routine),
            cancellation: CancellationToken::new(),
        })
    }

    /// Replace the acoustic routine.
    pub fn with_routine<R: AcousticProcessor + 'static>(mut self, routine: R) -> Self {
        self.routine = Box::new(routine);
        self
    }

    /// Use `token` to stop dispatching new segments.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Where the report of segment `identifier` is written.
    pub fn result_path(&self, identifier: &str) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{RESULT_PREFIX}_{identifier}.json"))
    }

    /// Where the extracted audio of segment `identifier` is written.
    pub fn extracted_path(&self, identifier: &str) -> PathBuf {
        self.config.output_dir.join(extracted_file_name(identifier))
    }

    /// Locate the segments of a day without processing them.
    pub fn plan_day(&self, year: i32, month: u32, day: u32) -> Result<SegmentPlan, ConfigurationError> {
        let request = self.layout.request(year, month, day)?;
        self.locator.find_segments(&request)
    }

    pub fn process_day(&self, year: i32, month: u32, day: u32) -> Result<DaySummary, ProcessError> {
        self.process_day_with_progress(year, month, day, &NoProgress)
    }

    pub fn process_day_with_progress(
        &self,
        year: i32,
        month: u32,
        day: u32,
        progress: &dyn ProgressReporter,
    ) -> Result<DaySummary, ProcessError> {
        let request = self.layout.request(year, month, day)?;
        self.process_request(&request, progress)
    }

    /// Process every segment of `request`.
    ///
    /// Per-segment problems are logged and counted. An error is returned for
    /// configuration problems, or when every attempted segment failed.
    pub fn process_request(
        &self,
        request: &DayRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<DaySummary, ProcessError> {
        let plan = self.locator.find_segments(request)?;

        fs::create_dir_all(&self.config.output_dir).map_err(|source| {
            ConfigurationError::OutputDirectory {
                path: self.config.output_dir.clone(),
                source,
            }
        })?;

        let items: Vec<_> = plan.iter().collect();
        let workers = worker_count(self.config.num_cpus);
        info!(
            "processing {} item(s) for {} with {} worker(s)",
            items.len(),
            request.date(),
            workers
        );
        progress.on_start(items.len());

        let run = |item: Result<MatchedSegment, MatchError>| {
            let outcome = self.run_item(item);
            progress.on_segment(&outcome);
            outcome
        };

        let outcomes: Vec<SegmentOutcome> = if workers == 1 {
            items.into_iter().map(run).collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|index| format!("pamday-worker-{index}"))
                .build()
                .map_err(|source| ConfigurationError::WorkerPool {
                    threads: workers,
                    source,
                })?;
            pool.install(|| items.into_par_iter().map(run).collect())
        };

        let mut summary = DaySummary::default();
        for outcome in &outcomes {
            summary.record(outcome);
        }
        info!(
            "{}: {} processed, {} metadata-only, {} skipped, {} unmatched, {} failed, {} cancelled",
            request.date(),
            summary.processed,
            summary.metadata_only,
            summary.skipped,
            summary.unmatched,
            summary.failed,
            summary.cancelled
        );
        progress.on_finish(&summary);

        if summary.failed > 0 && summary.failed == summary.attempted() {
            return Err(ProcessError::AllSegmentsFailed {
                failed: summary.failed,
            });
        }
        Ok(summary)
    }

    fn run_item(&self, item: Result<MatchedSegment, MatchError>) -> SegmentOutcome {
        let segment = match item {
            Ok(segment) => segment,
            Err(err) => {
                warn!("skipping segment: {err}");
                return SegmentOutcome::Unmatched(err);
            }
        };

        let identifier = segment.identifier();
        if self.cancellation.is_cancelled() {
            debug!("cancelled before segment {identifier}");
            return SegmentOutcome::Cancelled { identifier };
        }

        match self.process_segment(&segment) {
            Ok(result) => {
                debug!("segment {identifier}: {:?}", result.status);
                SegmentOutcome::Done(result)
            }
            Err(error) => {
                error!("segment {identifier} failed: {}", error_chain(&error));
                SegmentOutcome::Failed { identifier, error }
            }
        }
    }

    /// Process one segment and write its outputs.
    ///
    /// Depends only on `segment` and the processor's configuration.
    pub fn process_segment(&self, segment: &MatchedSegment) -> Result<ProcessResult, ProcessingError> {
        let identifier = segment.identifier();
        let output_path = self.result_path(&identifier);

        if !self.config.overwrite && output_path.exists() {
            info!(
                "result for segment {identifier} already exists, skipping: {}",
                output_path.display()
            );
            return Ok(ProcessResult {
                segment_identifier: identifier,
                output_path,
                extracted_path: None,
                status: ProcessStatus::SkippedExisting,
            });
        }

        let Some(source) = &segment.audio else {
            self.write_report(&identifier, segment, ProcessStatus::MetadataOnly, false, None)?;
            return Ok(ProcessResult {
                segment_identifier: identifier,
                output_path,
                extracted_path: None,
                status: ProcessStatus::MetadataOnly,
            });
        };

        let window_start = segment.start_time.max(source.recording_start);
        let empty = || ProcessingError::EmptySegment {
            identifier: identifier.clone(),
            path: source.path.clone(),
        };
        if window_start >= segment.end_time {
            return Err(empty());
        }
        let offset = (window_start - source.recording_start)
            .to_std()
            .map_err(|_| empty())?;
        let length = (segment.end_time - window_start)
            .to_std()
            .map_err(|_| empty())?;

        let clip = audio::read_window(&source.path, offset, length)?;
        if clip.samples.is_empty() {
            return Err(empty());
        }
        if clip.is_truncated() {
            warn!(
                "segment {identifier}: {} ends early, using {} of {} frame(s)",
                source.path.display(),
                clip.samples.len(),
                clip.requested_frames
            );
        }

        let extracted_path = if self.config.save_extracted_wav {
            let path = self.extracted_path(&identifier);
            audio::write_clip(&path, &clip)?;
            Some(path)
        } else {
            None
        };

        let metrics = self.routine.process(&clip.samples, clip.sample_rate)?;
        self.write_report(
            &identifier,
            segment,
            ProcessStatus::Processed,
            extracted_path.is_some(),
            Some(&metrics),
        )?;

        Ok(ProcessResult {
            segment_identifier: identifier,
            output_path,
            extracted_path,
            status: ProcessStatus::Processed,
        })
    }

    fn write_report(
        &self,
        identifier: &str,
        segment: &MatchedSegment,
        status: ProcessStatus,
        extracted: bool,
        metrics: Option<&PsdMetrics>,
    ) -> Result<(), ProcessingError> {
        let extracted_file = extracted.then(|| extracted_file_name(identifier));
        let report = SegmentReport {
            identifier,
            status,
            start: segment.start_time,
            end: segment.end_time,
            metadata_path: &segment.metadata_path,
            audio_path: segment.audio_path(),
            recording_start: segment.audio.as_ref().map(|a| a.recording_start),
            extracted_file: extracted_file.as_deref(),
            metrics,
        };

        let mut bytes =
            serde_json::to_vec_pretty(&report).map_err(|source| ProcessingError::Report {
                identifier: identifier.to_owned(),
                source,
            })?;
        bytes.push(b'\n');

        let path = self.result_path(identifier);
        fs::write(&path, bytes).map_err(|source| ProcessingError::Io { path, source })
    }
}

fn extracted_file_name(identifier: &str) -> String {
    format!("{EXTRACTED_PREFIX}_{identifier}.wav")
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
