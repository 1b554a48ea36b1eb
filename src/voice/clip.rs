//! Decoded audio clips
//!
//! Chunks arrive as base64 text wrapping a complete container (WAV from the
//! backend's TTS, MP3 accepted as well). Clips are decoded to mono f32.

use std::io::Cursor;
use std::time::Duration;

use base64::Engine as _;
use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Frames per resampler block
const RESAMPLE_CHUNK: usize = 1024;

/// Mono f32 samples at a known sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioClip {
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decode a base64 payload
    ///
    /// `sample_rate` is only used when the container does not declare one.
    ///
    /// # Errors
    ///
    /// Returns error if the payload is not valid base64 or not a supported container
    pub fn from_base64(payload: &str, sample_rate: u32) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(payload.trim())?;
        tracing::trace!(encoded = payload.len(), decoded = bytes.len(), "decoded audio payload");
        Self::from_bytes(&bytes, sample_rate)
    }

    /// Decode WAV or MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a supported container
    pub fn from_bytes(bytes: &[u8], sample_rate: u32) -> Result<Self> {
        if bytes.starts_with(b"RIFF") {
            return decode_wav(bytes);
        }

        let clip = decode_mp3(bytes, sample_rate)?;
        if clip.samples.is_empty() {
            return Err(Error::Decode("unrecognized audio container".to_string()));
        }
        Ok(clip)
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playing time at the clip's sample rate
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Scale every sample by `gain`
    #[must_use]
    pub fn with_gain(mut self, gain: f32) -> Self {
        if (gain - 1.0).abs() > f32::EPSILON {
            for sample in &mut self.samples {
                *sample *= gain;
            }
        }
        self
    }

    /// Convert to another sample rate
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be built for these rates
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn resampled(&self, to_rate: u32) -> Result<Self> {
        if to_rate == self.sample_rate || self.samples.is_empty() {
            return Ok(Self::new(self.samples.clone(), to_rate));
        }

        let mut resampler = FftFixedIn::<f32>::new(
            self.sample_rate as usize,
            to_rate as usize,
            RESAMPLE_CHUNK,
            2,
            1,
        )
        .map_err(|e| Error::Audio(format!("failed to create resampler: {e}")))?;

        let expected =
            (self.samples.len() as f64 * f64::from(to_rate) / f64::from(self.sample_rate)).ceil()
                as usize;
        let mut out = Vec::with_capacity(expected + RESAMPLE_CHUNK);

        // Trailing zero blocks flush the resampler's delay line
        let padded_len = self.samples.len() + 2 * RESAMPLE_CHUNK;
        let mut pos = 0;
        while pos < padded_len {
            let mut block = vec![0.0; RESAMPLE_CHUNK];
            if pos < self.samples.len() {
                let end = (pos + RESAMPLE_CHUNK).min(self.samples.len());
                block[..end - pos].copy_from_slice(&self.samples[pos..end]);
            }

            let frames = resampler
                .process(&[block], None)
                .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
            out.extend_from_slice(&frames[0]);
            pos += RESAMPLE_CHUNK;
        }

        let delay = resampler.output_delay().min(out.len());
        out.drain(..delay);
        out.truncate(expected);

        Ok(Self::new(out, to_rate))
    }
}

fn decode_wav(bytes: &[u8]) -> Result<AudioClip> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| Error::Decode(format!("invalid WAV data: {e}")))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Decode(format!("invalid WAV samples: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Decode(format!("invalid WAV samples: {e}")))?
        }
    };

    Ok(AudioClip::new(
        mix_to_mono(&interleaved, channels),
        spec.sample_rate,
    ))
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8], fallback_rate: u32) -> Result<AudioClip> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate.is_none() {
                    sample_rate = u32::try_from(frame.sample_rate).ok();
                }
                let frame_samples: Vec<f32> =
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(mix_to_mono(&frame_samples, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Decode(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(AudioClip::new(
        samples,
        sample_rate.unwrap_or(fallback_rate),
    ))
}

#[allow(clippy::cast_precision_loss)]
fn mix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Convert f32 samples to 16-bit mono WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
