//! WAV and PCM16 helpers

use crate::{Error, Result};

/// Convert f32 samples to WAV bytes for STT APIs
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

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
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

/// Decode little-endian PCM16 bytes to f32 samples
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn pcm16_to_samples(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
        .collect()
}

/// Write raw PCM16 mono audio to a WAV file
///
/// # Errors
///
/// Returns error if the file cannot be created or written
pub fn write_pcm16_wav(path: &std::path::Path, pcm: &[u8], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer =
        hound::WavWriter::create(path, spec).map_err(|e| Error::Audio(e.to_string()))?;
    for b in pcm.chunks_exact(2) {
        writer
            .write_sample(i16::from_le_bytes([b[0], b[1]]))
            .map_err(|e| Error::Audio(e.to_string()))?;
    }
    writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;

    Ok(())
}

/// Calculate RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(rms(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(rms(&loud) > 0.4);
    }

    #[test]
    fn pcm16_decoding_ignores_trailing_byte() {
        let pcm = [0x00, 0x40, 0x00, 0xC0, 0x7F];
        let samples = pcm16_to_samples(&pcm);
        assert_eq!(samples, vec![0.5, -0.5]);
    }
}
