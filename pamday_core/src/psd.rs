//! Acoustic metrics computed over a segment's samples.

use std::f64::consts::PI;

use rustfft::{num_complex::Complex, FftPlanner};
use serde::Serialize;

use crate::error::{ConfigurationError, ProcessingError};

/// Smallest power fed to the logarithm, keeps silent bins finite.
const POWER_FLOOR: f64 = 1e-20;

/// Levels and spectrum of one segment.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PsdMetrics {
    pub sample_rate: u32,
    pub num_samples: usize,
    /// Samples per Welch window.
    pub window_length: usize,
    pub overlap: f64,
    pub frequencies_hz: Vec<f64>,
    /// Power spectral density in dB re 1 unit²/Hz, minus the sensitivity.
    pub psd_db: Vec<f64>,
    /// Broadband sound pressure level in dB, minus the sensitivity.
    pub broadband_spl_db: f64,
    pub rms: f64,
}

/// A routine turning samples into acoustic metrics.
///
/// Implementations must be deterministic: equal inputs give equal outputs
/// regardless of the worker they run on.
pub trait AcousticProcessor: Send + Sync {
    fn process(&self, samples: &[f32], sample_rate: u32) -> Result<PsdMetrics, ProcessingError>;
}

/// Settings of the Welch estimator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PsdSettings {
    pub window_secs: f64,
    pub overlap: f64,
    /// Hydrophone sensitivity in dB, subtracted from every level.
    pub sensitivity_db: f64,
}

impl Default for PsdSettings {
    fn default() -> Self {
        Self {
            window_secs: 1.0,
            overlap: 0.5,
            sensitivity_db: 0.0,
        }
    }
}

impl PsdSettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.window_secs.is_finite() && self.window_secs > 0.0) {
            return Err(ConfigurationError::InvalidWindowLength);
        }
        if !(0.0..1.0).contains(&self.overlap) {
            return Err(ConfigurationError::InvalidOverlap(self.overlap));
        }
        Ok(())
    }
}

/// Welch power spectral density with a Hann window and one-sided density
/// scaling.
#[derive(Clone, Debug, Default)]
pub struct WelchPsd {
    settings: PsdSettings,
}

impl WelchPsd {
    pub fn new(settings: PsdSettings) -> Result<Self, ConfigurationError> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &PsdSettings {
        &self.settings
    }

    fn window_length(&self, sample_rate: u32, available: usize) -> usize {
        let wanted = (self.settings.window_secs * f64::from(sample_rate)).round() as usize;
        wanted.clamp(2, available.max(2)).min(available)
    }
}

fn hann_window(size: usize) -> Vec<f64> {
    // Periodic Hann, as used for spectral estimation.
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / size as f64).cos()))
        .collect()
}

impl AcousticProcessor for WelchPsd {
    fn process(&self, samples: &[f32], sample_rate: u32) -> Result<PsdMetrics, ProcessingError> {
        if samples.len() < 2 {
            return Err(ProcessingError::Acoustic(format!(
                "at least 2 samples are required, got {}",
                samples.len()
            )));
        }
        if sample_rate == 0 {
            return Err(ProcessingError::Acoustic("sample rate is zero".into()));
        }

        let fs = f64::from(sample_rate);
        let n = self.window_length(sample_rate, samples.len());
        let step = ((n as f64) * (1.0 - self.settings.overlap)).round().max(1.0) as usize;
        let window = hann_window(n);
        let window_power: f64 = window.iter().map(|w| w * w).sum();
        let bins = n / 2 + 1;

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(n);
        let mut buffer = vec![Complex::new(0.0, 0.0); n];
        let mut accumulated = vec![0.0f64; bins];
        let mut segments = 0usize;

        let mut start = 0;
        while start + n <= samples.len() {
            let chunk = &samples[start..start + n];
            let mean = chunk.iter().map(|&s| f64::from(s)).sum::<f64>() / n as f64;
            for ((slot, &sample), w) in buffer.iter_mut().zip(chunk).zip(&window) {
                *slot = Complex::new((f64::from(sample) - mean) * w, 0.0);
            }
            fft.process(&mut buffer);
            for (acc, value) in accumulated.iter_mut().zip(&buffer[..bins]) {
                *acc += value.norm_sqr();
            }
            segments += 1;
            start += step;
        }

        let scale = 1.0 / (fs * window_power * segments as f64);
        let nyquist_bin = if n % 2 == 0 { Some(bins - 1) } else { None };
        let sensitivity = self.settings.sensitivity_db;
        let psd_db = accumulated
            .iter()
            .enumerate()
            .map(|(k, &power)| {
                let one_sided = if k == 0 || Some(k) == nyquist_bin { 1.0 } else { 2.0 };
                10.0 * (power * scale * one_sided).max(POWER_FLOOR).log10() - sensitivity
            })
            .collect();
        let frequencies_hz = (0..bins).map(|k| k as f64 * fs / n as f64).collect();

        let mean_square = samples
            .iter()
            .map(|&s| f64::from(s) * f64::from(s))
            .sum::<f64>()
            / samples.len() as f64;
        let rms = mean_square.sqrt();
        let broadband_spl_db = 10.0 * mean_square.max(POWER_FLOOR).log10() - sensitivity;

        Ok(PsdMetrics {
            sample_rate,
            num_samples: samples.len(),
            window_length: n,
            overlap: self.settings.overlap,
            frequencies_hz,
            psd_db,
            broadband_spl_db,
            rms,
        })
    }
}
