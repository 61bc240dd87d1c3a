//! Speech engine boundary
//!
//! The pipeline talks to recognizers and synthesizers only through the
//! [`Recognizer`] and [`Synthesizer`] traits. Engine callbacks become
//! messages on a channel; nothing on the engine side touches session state.
//!
//! Concrete engines live alongside the traits:
//! - [`SegmentingRecognizer`]: continuous recognition over an HTTP
//!   [`Transcriber`] (Whisper or Deepgram)
//! - [`StreamingSynthesizer`]: text-stream-driven synthesis over HTTP
//!   [`TextToSpeech`] (`OpenAI` or `ElevenLabs`)

mod recognizer;
mod segmenter;
mod stt;
mod synthesizer;
mod tts;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::{Error, Result};

pub use recognizer::{RecognizerSettings, SegmentingRecognizer};
pub use segmenter::{SegmentEvent, SegmenterState, SpeechSegmenter};
pub use stt::{SpeechToText, Transcriber};
pub use synthesizer::{AudioSink, StreamingSynthesizer, split_sentences};
pub use tts::TextToSpeech;

/// Sender half recognizers deliver events on
pub type RecognitionEvents = mpsc::UnboundedSender<RecognitionEvent>;

/// An event from a continuous recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Low-confidence hypothesis for the utterance in progress
    Partial(String),
    /// Confirmed transcript of a finished utterance
    Final(String),
    /// Recognition ended; no further events follow
    Canceled(CancellationReason),
}

/// Why a recognizer stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancellationReason {
    /// The audio input was closed
    EndOfStream,
    /// The engine failed
    Error(String),
}

/// Continuous speech recognizer
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Begin recognizing pushed audio, delivering events on `events`
    async fn start_continuous_recognition(&self, events: RecognitionEvents) -> Result<()>;

    /// Stop recognizing; pending audio is discarded
    async fn stop_continuous_recognition(&self) -> Result<()>;

    /// Push PCM16 mono audio at the recognizer's sample rate
    fn push_audio(&self, pcm16: Vec<u8>) -> Result<()>;

    /// Close the audio input; further pushes fail
    fn close_input(&self);
}

/// Continuous speech synthesizer fed by a text stream
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Open a synthesis request whose text arrives incrementally
    async fn speak(&self) -> Result<SynthesisTask>;

    /// Ask the in-flight request (if any) to stop producing audio
    async fn stop(&self) -> Result<()>;
}

/// One in-flight synthesis request
pub struct SynthesisTask {
    /// Text input, written while the completion streams
    pub input: TextInput,
    /// Resolves once audio production ends
    pub completion: SynthesisCompletion,
}

impl SynthesisTask {
    /// Create a task along with the engine-side ends of its channels
    #[must_use]
    pub fn channel() -> (Self, TextReceiver, CompletionSender) {
        let (text_tx, text_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        let task = Self {
            input: TextInput { tx: text_tx },
            completion: SynthesisCompletion { rx: done_rx },
        };

        (task, text_rx, CompletionSender { tx: done_tx })
    }
}

/// Engine side of a synthesis text input
pub type TextReceiver = mpsc::UnboundedReceiver<String>;

/// Half-duplex text input of a synthesis request
///
/// Text is consumed in write order. Dropping or closing the input signals
/// that no more text follows.
#[derive(Debug)]
pub struct TextInput {
    tx: mpsc::UnboundedSender<String>,
}

impl TextInput {
    /// Append text to the request
    ///
    /// # Errors
    ///
    /// Returns error if the synthesis request has already ended
    pub fn write(&self, text: &str) -> Result<()> {
        self.tx
            .send(text.to_string())
            .map_err(|_| Error::Tts("synthesis input closed".to_string()))
    }

    /// Signal that no more text follows
    pub fn close(self) {
        drop(self);
    }

    /// Whether the engine is still accepting text
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// How a synthesis request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisOutcome {
    /// All text was synthesized
    Completed {
        /// Bytes of PCM16 audio produced
        audio_bytes: usize,
    },
    /// Stopped before finishing
    Stopped,
}

/// Engine side of a synthesis completion
#[derive(Debug)]
pub struct CompletionSender {
    tx: oneshot::Sender<Result<SynthesisOutcome>>,
}

impl CompletionSender {
    /// Resolve the completion; ignored if nobody waits anymore
    pub fn send(self, outcome: Result<SynthesisOutcome>) {
        let _ = self.tx.send(outcome);
    }
}

/// Future-like handle resolving when audio production ends
#[derive(Debug)]
pub struct SynthesisCompletion {
    rx: oneshot::Receiver<Result<SynthesisOutcome>>,
}

impl SynthesisCompletion {
    /// Wait for the synthesis request to end
    ///
    /// # Errors
    ///
    /// Returns the engine's error, or an error if the engine vanished
    /// without reporting
    pub async fn wait(self) -> Result<SynthesisOutcome> {
        self.rx
            .await
            .map_err(|_| Error::Tts("synthesis dropped without completing".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_input_preserves_write_order() {
        let (task, mut text_rx, _done) = SynthesisTask::channel();
        for token in ["Bon", "jour", ", ", "monde"] {
            task.input.write(token).unwrap();
        }
        task.input.close();

        let mut received = Vec::new();
        while let Some(text) = text_rx.recv().await {
            received.push(text);
        }
        assert_eq!(received, vec!["Bon", "jour", ", ", "monde"]);
    }

    #[tokio::test]
    async fn write_after_engine_drop_fails() {
        let (task, text_rx, _done) = SynthesisTask::channel();
        drop(text_rx);
        assert!(!task.input.is_open());
        assert!(task.input.write("hello").is_err());
    }

    #[tokio::test]
    async fn completion_reports_dropped_engine() {
        let (task, _text_rx, done) = SynthesisTask::channel();
        drop(done);
        assert!(task.completion.wait().await.is_err());
    }

    #[tokio::test]
    async fn completion_resolves_outcome() {
        let (task, _text_rx, done) = SynthesisTask::channel();
        done.send(Ok(SynthesisOutcome::Completed { audio_bytes: 42 }));
        assert_eq!(
            task.completion.wait().await.unwrap(),
            SynthesisOutcome::Completed { audio_bytes: 42 }
        );
    }
}
