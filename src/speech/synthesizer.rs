//! Text-stream-driven synthesis
//!
//! Text written into a synthesis input is cut into sentences as it arrives.
//! Each complete sentence is synthesized right away and its audio streamed
//! to the sink, so audio starts before the full text is known.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::tts::TextToSpeech;
use super::{CompletionSender, SynthesisOutcome, SynthesisTask, Synthesizer, TextReceiver};
use crate::{Error, Result};

/// Destination for synthesized PCM16 audio
#[async_trait]
pub trait AudioSink: Send + Sync + 'static {
    /// Deliver a chunk; returns false once the receiver is gone
    async fn send_audio(&self, pcm16: Vec<u8>) -> bool;
}

/// Synthesizer that speaks text sentence by sentence as it streams in
pub struct StreamingSynthesizer<S> {
    tts: Arc<TextToSpeech>,
    sink: Arc<S>,
    current: Mutex<Option<CancellationToken>>,
}

impl<S: AudioSink> StreamingSynthesizer<S> {
    /// Create a synthesizer writing audio to `sink`
    #[must_use]
    pub fn new(tts: Arc<TextToSpeech>, sink: Arc<S>) -> Self {
        Self {
            tts,
            sink,
            current: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<S: AudioSink> Synthesizer for StreamingSynthesizer<S> {
    async fn speak(&self) -> Result<SynthesisTask> {
        let (task, text_rx, done) = SynthesisTask::channel();
        let token = CancellationToken::new();

        {
            let mut current = self
                .current
                .lock()
                .map_err(|_| Error::Tts("synthesizer state poisoned".to_string()))?;
            *current = Some(token.clone());
        }

        let job = SpeakJob {
            tts: Arc::clone(&self.tts),
            sink: Arc::clone(&self.sink),
            token,
            audio_bytes: 0,
            carry: None,
        };
        tokio::spawn(job.run(text_rx, done));

        Ok(task)
    }

    async fn stop(&self) -> Result<()> {
        let token = self.current.lock().ok().and_then(|mut c| c.take());
        if let Some(token) = token {
            tracing::debug!("stopping in-flight synthesis");
            token.cancel();
        }
        Ok(())
    }
}

/// One synthesis request being spoken
struct SpeakJob<S> {
    tts: Arc<TextToSpeech>,
    sink: Arc<S>,
    token: CancellationToken,
    audio_bytes: usize,
    /// Odd byte held back so chunks stay sample-aligned
    carry: Option<u8>,
}

impl<S: AudioSink> SpeakJob<S> {
    async fn run(mut self, mut text_rx: TextReceiver, done: CompletionSender) {
        let mut pending = String::new();

        let outcome = loop {
            let next = tokio::select! {
                () = self.token.cancelled() => break Ok(SynthesisOutcome::Stopped),
                text = text_rx.recv() => text,
            };

            let sentences = if let Some(text) = next {
                pending.push_str(&text);
                let (sentences, rest) = split_sentences(&pending);
                pending = rest;
                sentences
            } else {
                let tail = pending.trim();
                let sentences = if tail.is_empty() {
                    Vec::new()
                } else {
                    vec![tail.to_string()]
                };
                match self.speak_all(&sentences).await {
                    Ok(true) => {
                        break Ok(SynthesisOutcome::Completed {
                            audio_bytes: self.audio_bytes,
                        });
                    }
                    Ok(false) => break Ok(SynthesisOutcome::Stopped),
                    Err(e) => break Err(e),
                }
            };

            match self.speak_all(&sentences).await {
                Ok(true) => {}
                Ok(false) => break Ok(SynthesisOutcome::Stopped),
                Err(e) => break Err(e),
            }
        };

        match &outcome {
            Ok(SynthesisOutcome::Completed { audio_bytes }) => {
                tracing::debug!(audio_bytes, "synthesis completed");
            }
            Ok(SynthesisOutcome::Stopped) => tracing::debug!("synthesis stopped"),
            Err(e) => tracing::warn!(error = %e, "synthesis failed"),
        }
        done.send(outcome);
    }

    /// Speak sentences in order; `Ok(false)` when stopped
    async fn speak_all(&mut self, sentences: &[String]) -> Result<bool> {
        for sentence in sentences {
            if !self.speak_sentence(sentence).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn speak_sentence(&mut self, sentence: &str) -> Result<bool> {
        tracing::trace!(sentence, "synthesizing sentence");

        let mut stream = tokio::select! {
            () = self.token.cancelled() => return Ok(false),
            stream = self.tts.synthesize_stream(sentence) => stream?,
        };

        loop {
            let chunk = tokio::select! {
                () = self.token.cancelled() => return Ok(false),
                chunk = stream.next() => chunk,
            };

            let Some(chunk) = chunk else {
                self.carry = None;
                return Ok(true);
            };

            if !self.deliver(chunk?).await? {
                return Ok(false);
            }
        }
    }

    /// Hand one chunk to the sink; `Ok(false)` once stopped
    ///
    /// Audio of a stopped request never reaches the sink, even when the
    /// sink is applying backpressure at the moment of the stop.
    async fn deliver(&mut self, chunk: Vec<u8>) -> Result<bool> {
        let aligned = self.align(chunk);
        if aligned.is_empty() {
            return Ok(true);
        }
        if self.token.is_cancelled() {
            return Ok(false);
        }

        let len = aligned.len();
        let delivered = tokio::select! {
            biased;
            () = self.token.cancelled() => return Ok(false),
            delivered = self.sink.send_audio(aligned) => delivered,
        };
        if !delivered {
            return Err(Error::Session("audio receiver closed".to_string()));
        }
        self.audio_bytes += len;
        Ok(true)
    }

    /// Prepend any held-back byte and hold back a new odd tail
    fn align(&mut self, chunk: Vec<u8>) -> Vec<u8> {
        let mut bytes = match self.carry.take() {
            Some(b) => {
                let mut joined = Vec::with_capacity(chunk.len() + 1);
                joined.push(b);
                joined.extend_from_slice(&chunk);
                joined
            }
            None => chunk,
        };
        if bytes.len() % 2 != 0 {
            self.carry = bytes.pop();
        }
        bytes
    }
}

/// Split streamed text into complete sentences and the unfinished rest
///
/// A sentence ends at a newline, or at `.`, `!`, `?` or `…` followed by
/// whitespace. Terminal punctuation at the very end stays pending because
/// the next token may continue it (`3.` then `5`).
#[must_use]
pub fn split_sentences(text: &str) -> (Vec<String>, String) {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let end = match c {
            '\n' => Some(i + c.len_utf8()),
            '.' | '!' | '?' | '…' => match chars.peek() {
                Some((_, next)) if next.is_whitespace() => Some(i + c.len_utf8()),
                _ => None,
            },
            _ => None,
        };

        if let Some(end) = end {
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = end;
        }
    }

    (sentences, text[start..].trim_start().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminal_punctuation_followed_by_space() {
        let (sentences, rest) = split_sentences("Bonjour. Comment ça va? Très");
        assert_eq!(sentences, vec!["Bonjour.", "Comment ça va?"]);
        assert_eq!(rest, "Très");
    }

    #[test]
    fn trailing_punctuation_waits_for_more_text() {
        let (sentences, rest) = split_sentences("It costs 3.");
        assert!(sentences.is_empty());
        assert_eq!(rest, "It costs 3.");

        let (sentences, rest) = split_sentences("It costs 3.5 euros. Ok");
        assert_eq!(sentences, vec!["It costs 3.5 euros."]);
        assert_eq!(rest, "Ok");
    }

    #[test]
    fn newline_ends_sentence() {
        let (sentences, rest) = split_sentences("First line\n\nSecond");
        assert_eq!(sentences, vec!["First line"]);
        assert_eq!(rest, "Second");
    }

    struct NullSink;

    #[async_trait]
    impl AudioSink for NullSink {
        async fn send_audio(&self, _pcm16: Vec<u8>) -> bool {
            true
        }
    }

    /// Sink that records chunks, or never accepts them when `stalled`
    #[derive(Default)]
    struct RecordingSink {
        chunks: Mutex<Vec<Vec<u8>>>,
        stalled: bool,
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn send_audio(&self, pcm16: Vec<u8>) -> bool {
            if self.stalled {
                std::future::pending::<()>().await;
            }
            self.chunks.lock().unwrap().push(pcm16);
            true
        }
    }

    fn job_with<S: AudioSink>(sink: Arc<S>) -> SpeakJob<S> {
        let tts = TextToSpeech::new_openai(
            "sk-test".to_string(),
            "alloy".to_string(),
            1.0,
            "tts-1".to_string(),
        )
        .unwrap();
        SpeakJob {
            tts: Arc::new(tts),
            sink,
            token: CancellationToken::new(),
            audio_bytes: 0,
            carry: None,
        }
    }

    #[tokio::test]
    async fn delivered_audio_is_counted() {
        let sink = Arc::new(RecordingSink::default());
        let mut job = job_with(Arc::clone(&sink));

        assert!(job.deliver(vec![1, 2, 3, 4]).await.unwrap());
        assert_eq!(job.audio_bytes, 4);
        assert_eq!(*sink.chunks.lock().unwrap(), vec![vec![1, 2, 3, 4]]);
    }

    #[tokio::test]
    async fn stopped_job_sends_no_more_audio() {
        let sink = Arc::new(RecordingSink::default());
        let mut job = job_with(Arc::clone(&sink));

        job.token.cancel();
        assert!(!job.deliver(vec![1, 2, 3, 4]).await.unwrap());
        assert!(sink.chunks.lock().unwrap().is_empty());
        assert_eq!(job.audio_bytes, 0);
    }

    #[tokio::test]
    async fn stop_unblocks_a_stalled_send() {
        let sink = Arc::new(RecordingSink {
            stalled: true,
            ..RecordingSink::default()
        });
        let mut job = job_with(Arc::clone(&sink));
        let token = job.token.clone();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            token.cancel();
        });

        let delivered = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            job.deliver(vec![1, 2, 3, 4]),
        )
        .await
        .expect("stop should interrupt the send");
        assert!(!delivered.unwrap());
        assert!(sink.chunks.lock().unwrap().is_empty());
        stopper.await.unwrap();
    }

    fn job() -> SpeakJob<NullSink> {
        let tts = TextToSpeech::new_openai(
            "sk-test".to_string(),
            "alloy".to_string(),
            1.0,
            "tts-1".to_string(),
        )
        .unwrap();
        SpeakJob {
            tts: Arc::new(tts),
            sink: Arc::new(NullSink),
            token: CancellationToken::new(),
            audio_bytes: 0,
            carry: None,
        }
    }

    #[test]
    fn odd_chunks_are_realigned() {
        let mut job = job();
        assert_eq!(job.align(vec![1, 2, 3]), vec![1, 2]);
        assert_eq!(job.align(vec![4, 5, 6]), vec![3, 4, 5, 6]);
        assert_eq!(job.align(vec![7]), Vec::<u8>::new());
        assert_eq!(job.align(vec![8]), vec![7, 8]);
    }

    #[tokio::test]
    async fn stop_before_text_resolves_stopped() {
        let tts = Arc::new(
            TextToSpeech::new_openai(
                "sk-test".to_string(),
                "alloy".to_string(),
                1.0,
                "tts-1".to_string(),
            )
            .unwrap(),
        );
        let synthesizer = StreamingSynthesizer::new(tts, Arc::new(NullSink));

        let task = synthesizer.speak().await.unwrap();
        synthesizer.stop().await.unwrap();

        assert_eq!(
            task.completion.wait().await.unwrap(),
            SynthesisOutcome::Stopped
        );
    }

    #[tokio::test]
    async fn empty_input_completes_without_requests() {
        let tts = Arc::new(
            TextToSpeech::new_openai(
                "sk-test".to_string(),
                "alloy".to_string(),
                1.0,
                "tts-1".to_string(),
            )
            .unwrap(),
        );
        let synthesizer = StreamingSynthesizer::new(tts, Arc::new(NullSink));

        let task = synthesizer.speak().await.unwrap();
        task.input.write("   ").unwrap();
        task.input.close();

        assert_eq!(
            task.completion.wait().await.unwrap(),
            SynthesisOutcome::Completed { audio_bytes: 0 }
        );
    }
}
