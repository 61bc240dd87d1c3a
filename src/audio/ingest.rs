//! Inbound audio frame conversion
//!
//! Peers send mono float32 PCM at the input rate. The recognizer wants
//! PCM16 at its own rate, so each frame is validated, decoded, resampled,
//! clipped and re-encoded here.

use rubato::{FftFixedIn, Resampler};
use thiserror::Error;

/// Input frames per resampler pass
const RESAMPLE_CHUNK: usize = 960;

/// Sub-chunks per FFT pass
const RESAMPLE_SUB_CHUNKS: usize = 2;

/// Why an inbound frame was dropped
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Byte count is odd, so the frame cannot hold 16-bit aligned audio
    #[error("frame length {0} is not divisible by 2")]
    OddLength(usize),

    /// Byte count is even but cannot be decoded as float32 samples
    #[error("frame length {0} is not divisible by 4 (float32)")]
    Misaligned(usize),

    /// Resampler failure
    #[error("resample failed: {0}")]
    Resample(String),
}

/// Converts float32 frames into recognizer-ready PCM16
///
/// Holds resampler state across frames, so use one decoder per session.
pub struct FrameDecoder {
    input_rate: u32,
    output_rate: u32,
    resampler: Option<StreamResampler>,
}

impl FrameDecoder {
    /// Create a decoder from `input_rate` float32 to `output_rate` PCM16
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be built for these rates
    pub fn new(input_rate: u32, output_rate: u32) -> crate::Result<Self> {
        let resampler = if input_rate == output_rate {
            None
        } else {
            Some(StreamResampler::new(input_rate, output_rate)?)
        };

        tracing::debug!(input_rate, output_rate, "frame decoder initialized");

        Ok(Self {
            input_rate,
            output_rate,
            resampler,
        })
    }

    /// Input sample rate
    #[must_use]
    pub const fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Output sample rate
    #[must_use]
    pub const fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Convert one frame
    ///
    /// May return an empty buffer when the resampler is still accumulating
    /// a full chunk.
    ///
    /// # Errors
    ///
    /// Returns `FrameError` if the frame must be dropped
    pub fn decode(&mut self, frame: &[u8]) -> Result<Vec<u8>, FrameError> {
        let samples = decode_f32le(frame)?;
        if samples.is_empty() {
            return Ok(Vec::new());
        }

        let samples = match &mut self.resampler {
            Some(resampler) => resampler.push(&samples)?,
            None => samples,
        };

        Ok(samples_to_pcm16(&samples))
    }
}

/// Decode little-endian float32 bytes, sanitizing non-finite values
///
/// # Errors
///
/// Returns `FrameError` if the byte count cannot hold whole samples
pub fn decode_f32le(frame: &[u8]) -> Result<Vec<f32>, FrameError> {
    if frame.len() % 2 != 0 {
        return Err(FrameError::OddLength(frame.len()));
    }
    if frame.len() % 4 != 0 {
        return Err(FrameError::Misaligned(frame.len()));
    }

    Ok(frame
        .chunks_exact(4)
        .map(|b| {
            let s = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            if s.is_nan() {
                0.0
            } else if s.is_infinite() {
                s.signum()
            } else {
                s
            }
        })
        .collect())
}

/// Clip to [-1, 1] and encode as little-endian PCM16
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Stateful FFT resampler fed with arbitrary-length frames
struct StreamResampler {
    inner: FftFixedIn<f64>,
    pending: Vec<f64>,
}

impl StreamResampler {
    fn new(from_rate: u32, to_rate: u32) -> crate::Result<Self> {
        let inner = FftFixedIn::<f64>::new(
            from_rate as usize,
            to_rate as usize,
            RESAMPLE_CHUNK,
            RESAMPLE_SUB_CHUNKS,
            1,
        )
        .map_err(|e| crate::Error::Audio(format!("resampler init failed: {e}")))?;

        Ok(Self {
            inner,
            pending: Vec::with_capacity(RESAMPLE_CHUNK * 2),
        })
    }

    /// Append samples and resample every complete chunk; the tail waits
    #[allow(clippy::cast_possible_truncation)]
    fn push(&mut self, samples: &[f32]) -> Result<Vec<f32>, FrameError> {
        self.pending.extend(samples.iter().map(|&s| f64::from(s)));

        let mut output = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }

            let chunk: Vec<f64> = self.pending.drain(..needed).collect();
            let result = self
                .inner
                .process(&[chunk], None)
                .map_err(|e| FrameError::Resample(e.to_string()))?;
            output.extend(result[0].iter().map(|&s| s as f32));
        }

        Ok(output)
    }
}
