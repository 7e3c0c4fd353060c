//! Per-day processing of passive acoustic monitoring recordings.
//!
//! The [`Locator`] finds the JSON metadata of a day and pairs every segment
//! with the audio recording that was running when it started. The
//! [`SegmentProcessor`] slices each segment out of its recording, computes
//! its power spectral density, and writes one report per segment.

pub mod audio;
pub mod error;
pub mod locator;
pub mod metadata;
pub mod processor;
pub mod psd;
pub mod request;
pub mod timestamp;

use std::path::{Path, PathBuf};

pub use error::{ConfigurationError, MatchError, ProcessError, ProcessingError};
pub use locator::{AudioIndex, AudioSource, Locator, MatchedSegment, SegmentPlan};
pub use processor::{
    worker_count, CancellationToken, DaySummary, NoProgress, ProcessResult, ProcessStatus,
    ProgressReporter, SegmentOutcome, SegmentProcessor,
};
pub use psd::{AcousticProcessor, PsdMetrics, PsdSettings, WelchPsd};
pub use request::{DayRequest, InputLayout};

/// Settings of the segment processing stage.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory receiving the reports and extracted clips.
    pub output_dir: PathBuf,
    /// Also write the audio of every segment as a WAV file.
    pub save_extracted_wav: bool,
    /// Worker count; `0` uses every core and `1` runs sequentially.
    pub num_cpus: usize,
    /// Replace reports left by an earlier run instead of skipping them.
    pub overwrite: bool,
    pub psd: PsdSettings,
}

impl Config {
    /// Construct a [`Config`] with default options.
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self, ConfigurationError> {
        Self::builder(output_dir).build()
    }

    /// Start building a [`Config`] with optional settings.
    pub fn builder<P: AsRef<Path>>(output_dir: P) -> ConfigBuilder {
        ConfigBuilder {
            output_dir: output_dir.as_ref().to_path_buf(),
            save_extracted_wav: false,
            num_cpus: 1,
            overwrite: false,
            psd: PsdSettings::default(),
        }
    }
}

/// Builder for [`Config`].
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    output_dir: PathBuf,
    save_extracted_wav: bool,
    num_cpus: usize,
    overwrite: bool,
    psd: PsdSettings,
}

impl ConfigBuilder {
    pub fn save_extracted_wav(mut self, save: bool) -> Self {
        self.save_extracted_wav = save;
        self
    }

    pub fn num_cpus(mut self, num_cpus: usize) -> Self {
        self.num_cpus = num_cpus;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn psd_settings(mut self, psd: PsdSettings) -> Self {
        self.psd = psd;
        self
    }

    /// Validate the settings and produce a [`Config`].
    ///
    /// The output directory is created when processing starts, not here.
    pub fn build(self) -> Result<Config, ConfigurationError> {
        self.psd.validate()?;

        Ok(Config {
            output_dir: self.output_dir,
            save_extracted_wav: self.save_extracted_wav,
            num_cpus: self.num_cpus,
            overwrite: self.overwrite,
            psd: self.psd,
        })
    }
}
