//! Audio format handling
//!
//! Inbound frame conversion for the recognizer, plus WAV helpers used by
//! HTTP transcription and the CLI.

mod ingest;
mod wav;

pub use ingest::{FrameDecoder, FrameError, decode_f32le, samples_to_pcm16};
pub use wav::{pcm16_to_samples, rms, samples_to_wav, write_pcm16_wav};
