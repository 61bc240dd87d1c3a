//! Continuous recognition over a batch transcriber
//!
//! A worker task segments pushed PCM16 into utterances. While an utterance
//! is in progress it is re-transcribed every partial interval and emitted
//! as a partial result; when it ends it is transcribed once more and
//! emitted as the final result.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::segmenter::{SegmentEvent, SpeechSegmenter};
use super::stt::Transcriber;
use super::{CancellationReason, RecognitionEvent, RecognitionEvents, Recognizer};
use crate::audio::{pcm16_to_samples, samples_to_wav};
use crate::{Error, Result};

/// Recognizer tuning
#[derive(Debug, Clone, Copy)]
pub struct RecognizerSettings {
    /// Sample rate of pushed PCM16
    pub sample_rate: u32,
    /// New speech between partial transcripts; `None` disables partials
    pub partial_interval: Option<Duration>,
}

impl RecognizerSettings {
    /// Build settings, treating a zero interval as "no partials"
    #[must_use]
    pub fn new(sample_rate: u32, partial_interval_ms: u64) -> Self {
        Self {
            sample_rate,
            partial_interval: (partial_interval_ms > 0)
                .then(|| Duration::from_millis(partial_interval_ms)),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn partial_samples(&self) -> Option<usize> {
        self.partial_interval
            .map(|d| (d.as_millis() as usize * self.sample_rate as usize) / 1000)
    }
}

/// Continuous recognizer built on any [`Transcriber`]
pub struct SegmentingRecognizer {
    transcriber: Arc<dyn Transcriber>,
    settings: RecognizerSettings,
    audio_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    audio_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stop: CancellationToken,
}

impl SegmentingRecognizer {
    /// Create a recognizer; audio pushed before start is buffered
    #[must_use]
    pub fn new(transcriber: Arc<dyn Transcriber>, settings: RecognizerSettings) -> Self {
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        Self {
            transcriber,
            settings,
            audio_tx: Mutex::new(Some(audio_tx)),
            audio_rx: Mutex::new(Some(audio_rx)),
            worker: Mutex::new(None),
            stop: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Recognizer for SegmentingRecognizer {
    async fn start_continuous_recognition(&self, events: RecognitionEvents) -> Result<()> {
        let audio_rx = self
            .audio_rx
            .lock()
            .ok()
            .and_then(|mut rx| rx.take())
            .ok_or_else(|| Error::Stt("recognition already started".to_string()))?;

        let worker = Worker {
            transcriber: Arc::clone(&self.transcriber),
            segmenter: SpeechSegmenter::new(self.settings.sample_rate),
            sample_rate: self.settings.sample_rate,
            partial_samples: self.settings.partial_samples(),
            events,
            stop: self.stop.clone(),
        };

        let handle = tokio::spawn(worker.run(audio_rx));
        if let Ok(mut slot) = self.worker.lock() {
            *slot = Some(handle);
        }

        tracing::debug!(
            sample_rate = self.settings.sample_rate,
            partial_interval = ?self.settings.partial_interval,
            "continuous recognition started"
        );
        Ok(())
    }

    async fn stop_continuous_recognition(&self) -> Result<()> {
        self.stop.cancel();
        let handle = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "recognition worker ended abnormally");
            }
        }
        tracing::debug!("continuous recognition stopped");
        Ok(())
    }

    fn push_audio(&self, pcm16: Vec<u8>) -> Result<()> {
        let guard = self
            .audio_tx
            .lock()
            .map_err(|_| Error::Stt("recognizer input poisoned".to_string()))?;
        let tx = guard
            .as_ref()
            .ok_or_else(|| Error::Stt("recognizer input closed".to_string()))?;
        tx.send(pcm16)
            .map_err(|_| Error::Stt("recognizer stopped".to_string()))
    }

    fn close_input(&self) {
        if let Ok(mut tx) = self.audio_tx.lock() {
            tx.take();
        }
    }
}

/// Recognition worker state
struct Worker {
    transcriber: Arc<dyn Transcriber>,
    segmenter: SpeechSegmenter,
    sample_rate: u32,
    partial_samples: Option<usize>,
    events: RecognitionEvents,
    stop: CancellationToken,
}

impl Worker {
    async fn run(mut self, mut audio_rx: mpsc::UnboundedReceiver<Vec<u8>>) {
        let mut since_partial = 0usize;

        loop {
            let chunk = tokio::select! {
                () = self.stop.cancelled() => return,
                chunk = audio_rx.recv() => chunk,
            };

            let Some(chunk) = chunk else {
                self.finish_input().await;
                return;
            };

            let samples = pcm16_to_samples(&chunk);
            match self.segmenter.process(&samples) {
                SegmentEvent::Started => since_partial = samples.len(),
                SegmentEvent::Continuing => since_partial += samples.len(),
                SegmentEvent::Ended => {
                    since_partial = 0;
                    let utterance = self.segmenter.take_utterance();
                    if !self.emit_final(&utterance).await {
                        return;
                    }
                    continue;
                }
                SegmentEvent::Discarded | SegmentEvent::None => since_partial = 0,
            }

            if let Some(every) = self.partial_samples {
                if self.segmenter.has_speech() && since_partial >= every {
                    since_partial = 0;
                    if !self.emit_partial().await {
                        return;
                    }
                }
            }
        }
    }

    /// Transcribe the utterance so far; failures only skip this partial
    async fn emit_partial(&self) -> bool {
        let Some(result) = self.transcribe(self.segmenter.utterance()).await else {
            return false;
        };

        match result {
            Ok(text) if text.is_empty() => true,
            Ok(text) => self.events.send(RecognitionEvent::Partial(text)).is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, "partial transcription failed");
                true
            }
        }
    }

    /// Transcribe a finished utterance; a failure cancels recognition
    async fn emit_final(&self, utterance: &[f32]) -> bool {
        let Some(result) = self.transcribe(utterance).await else {
            return false;
        };

        match result {
            Ok(text) => {
                tracing::info!(transcript = %text, "utterance recognized");
                self.events.send(RecognitionEvent::Final(text)).is_ok()
            }
            Err(e) => {
                tracing::error!(error = %e, "final transcription failed");
                let _ = self
                    .events
                    .send(RecognitionEvent::Canceled(CancellationReason::Error(
                        e.to_string(),
                    )));
                false
            }
        }
    }

    /// Flush a pending utterance and report end of stream
    async fn finish_input(&mut self) {
        if self.segmenter.has_speech() {
            let utterance = self.segmenter.take_utterance();
            if !self.emit_final(&utterance).await {
                return;
            }
        }
        let _ = self
            .events
            .send(RecognitionEvent::Canceled(CancellationReason::EndOfStream));
    }

    /// Run a transcription unless recognition is stopped first
    async fn transcribe(&self, samples: &[f32]) -> Option<Result<String>> {
        let wav = match samples_to_wav(samples, self.sample_rate) {
            Ok(wav) => wav,
            Err(e) => return Some(Err(e)),
        };

        tokio::select! {
            () = self.stop.cancelled() => None,
            result = self.transcriber.transcribe(&wav) => Some(result),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::audio::samples_to_pcm16;

    const RATE: u32 = 16_000;

    /// Transcriber answering "utterance <n>" with a call counter
    struct CountingTranscriber {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Transcriber for CountingTranscriber {
        async fn transcribe(&self, wav: &[u8]) -> Result<String> {
            assert_eq!(&wav[0..4], b"RIFF");
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(Error::Stt("boom".to_string()));
            }
            Ok(format!("utterance {n}"))
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn tone(secs: f32) -> Vec<u8> {
        let n = (RATE as f32 * secs) as usize;
        let samples: Vec<f32> = (0..n)
            .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / RATE as f32).sin())
            .collect();
        samples_to_pcm16(&samples)
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn silence(secs: f32) -> Vec<u8> {
        vec![0u8; (RATE as f32 * secs) as usize * 2]
    }

    fn recognizer(fail: bool, partial_ms: u64) -> SegmentingRecognizer {
        SegmentingRecognizer::new(
            Arc::new(CountingTranscriber {
                calls: AtomicUsize::new(0),
                fail,
            }),
            RecognizerSettings::new(RATE, partial_ms),
        )
    }

    #[tokio::test]
    async fn utterance_yields_final_then_end_of_stream() {
        let recognizer = recognizer(false, 0);
        let (tx, mut rx) = mpsc::unbounded_channel();
        recognizer.start_continuous_recognition(tx).await.unwrap();

        recognizer.push_audio(tone(0.6)).unwrap();
        recognizer.push_audio(silence(0.7)).unwrap();
        recognizer.close_input();

        assert_eq!(
            rx.recv().await,
            Some(RecognitionEvent::Final("utterance 1".to_string()))
        );
        assert_eq!(
            rx.recv().await,
            Some(RecognitionEvent::Canceled(CancellationReason::EndOfStream))
        );
        assert!(recognizer.push_audio(tone(0.1)).is_err());
    }

    #[tokio::test]
    async fn partials_precede_final() {
        let recognizer = recognizer(false, 200);
        let (tx, mut rx) = mpsc::unbounded_channel();
        recognizer.start_continuous_recognition(tx).await.unwrap();

        for _ in 0..6 {
            recognizer.push_audio(tone(0.1)).unwrap();
        }
        recognizer.push_audio(silence(0.7)).unwrap();
        recognizer.close_input();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        let finals = events
            .iter()
            .filter(|e| matches!(e, RecognitionEvent::Final(_)))
            .count();
        assert_eq!(finals, 1);
        assert!(matches!(events[0], RecognitionEvent::Partial(_)));
        assert!(matches!(
            events.last(),
            Some(RecognitionEvent::Canceled(CancellationReason::EndOfStream))
        ));
    }

    #[tokio::test]
    async fn final_failure_cancels_recognition() {
        let recognizer = recognizer(true, 0);
        let (tx, mut rx) = mpsc::unbounded_channel();
        recognizer.start_continuous_recognition(tx).await.unwrap();

        recognizer.push_audio(tone(0.6)).unwrap();
        recognizer.push_audio(silence(0.7)).unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(RecognitionEvent::Canceled(CancellationReason::Error(_)))
        ));
    }

    #[tokio::test]
    async fn stop_ends_worker_without_events() {
        let recognizer = recognizer(false, 0);
        let (tx, mut rx) = mpsc::unbounded_channel();
        recognizer.start_continuous_recognition(tx).await.unwrap();
        recognizer.stop_continuous_recognition().await.unwrap();

        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let recognizer = recognizer(false, 0);
        let (tx, _rx) = mpsc::unbounded_channel();
        recognizer.start_continuous_recognition(tx.clone()).await.unwrap();
        assert!(recognizer.start_continuous_recognition(tx).await.is_err());
    }
}
