//! Decode a time window of a recording and persist extracted clips.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use log::debug;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::{Error as SymphoniaError, SeekErrorKind};
use symphonia::core::formats::{FormatOptions, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::error::ProcessingError;

/// Mono samples of one segment.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Frames the window asked for.
    pub requested_frames: u64,
}

impl AudioClip {
    /// Whether the recording ended before the requested window did.
    pub fn is_truncated(&self) -> bool {
        (self.samples.len() as u64) < self.requested_frames
    }
}

fn frames_for(duration: Duration, sample_rate: u32) -> u64 {
    let frames = duration.as_nanos() * u128::from(sample_rate) / 1_000_000_000;
    frames.min(u128::from(u64::MAX)) as u64
}

/// Decode the first channel of `path` between `offset` and `offset + length`.
///
/// The returned clip may hold fewer frames than requested when the recording
/// ends early; it is empty when the window starts past the end.
pub fn read_window(
    path: &Path,
    offset: Duration,
    length: Duration,
) -> Result<AudioClip, ProcessingError> {
    let decode_err = |source| ProcessingError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let file = File::open(path).map_err(|source| ProcessingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(decode_err)?;
    let mut reader = probed.format;

    let track = reader
        .default_track()
        .ok_or_else(|| ProcessingError::UnsupportedAudio {
            path: path.to_path_buf(),
        })?;
    if track.codec_params.codec == CODEC_TYPE_NULL {
        return Err(ProcessingError::UnsupportedAudio {
            path: path.to_path_buf(),
        });
    }
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| ProcessingError::MissingSampleRate {
            path: path.to_path_buf(),
        })?;

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(decode_err)?;

    let first_frame = frames_for(offset, sample_rate);
    let requested_frames = frames_for(length, sample_rate);
    let last_frame = first_frame.saturating_add(requested_frames);

    let mut frame_cursor: u64 = 0;
    if first_frame > 0 {
        match reader.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: first_frame,
                track_id,
            },
        ) {
            Ok(seeked) => {
                frame_cursor = seeked.actual_ts;
                decoder.reset();
            }
            Err(SymphoniaError::SeekError(SeekErrorKind::OutOfRange)) => {
                return Ok(AudioClip {
                    samples: Vec::new(),
                    sample_rate,
                    requested_frames,
                });
            }
            Err(err) => return Err(decode_err(err)),
        }
    }

    let mut samples = Vec::with_capacity(requested_frames.min(1 << 24) as usize);

    while frame_cursor < last_frame {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(err) => return Err(decode_err(err)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(reason)) => {
                debug!("skipping undecodable packet in {}: {reason}", path.display());
                continue;
            }
            Err(err) => return Err(decode_err(err)),
        };

        let frames = decoded.frames() as u64;
        if frames == 0 {
            continue;
        }
        let packet_start = frame_cursor;
        frame_cursor += frames;
        if frame_cursor <= first_frame {
            continue;
        }

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);

        let from = first_frame.saturating_sub(packet_start) as usize;
        let to = (last_frame.min(frame_cursor) - packet_start) as usize;
        samples.extend(
            buffer
                .samples()
                .chunks_exact(channels)
                .skip(from)
                .take(to - from)
                .map(|frame| frame[0]),
        );
    }

    Ok(AudioClip {
        samples,
        sample_rate,
        requested_frames,
    })
}

/// Write `clip` as a mono 32-bit float WAV file.
pub fn write_clip(path: &Path, clip: &AudioClip) -> Result<(), ProcessingError> {
    let wav_err = |source| ProcessingError::WavWrite {
        path: path.to_path_buf(),
        source,
    };

    let spec = WavSpec {
        channels: 1,
        sample_rate: clip.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec).map_err(wav_err)?;
    for &sample in &clip.samples {
        writer.write_sample(sample).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)?;
    Ok(())
}
