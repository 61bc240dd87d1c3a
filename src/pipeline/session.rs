//! Per-peer session and its coordinating task
//!
//! The coordinator is the only task that touches the conversation and the
//! barge-in state. Recognizer events, relay completions and shutdown all
//! arrive as messages and are handled one at a time, in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::barge_in::BargeIn;
use super::outbound::{Outbound, OutboundSender};
use super::relay::{Relay, RelayOutcome};
use super::waiter::{CompletionWaiter, WaiterStats};
use crate::audio::FrameDecoder;
use crate::chat::{ChatCompletion, Conversation};
use crate::config::{BargeInPolicy, Config};
use crate::speech::{
    CancellationReason, RecognitionEvent, Recognizer, SynthesisTask, Synthesizer,
};
use crate::{Error, Result};

/// Engines a session drives
pub struct SessionEngines {
    pub recognizer: Arc<dyn Recognizer>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub chat: Arc<dyn ChatCompletion>,
}

/// Per-session behavior
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Rate of inbound float32 frames
    pub input_sample_rate: u32,
    /// Rate the recognizer expects
    pub recognizer_sample_rate: u32,
    /// When user speech interrupts assistant speech
    pub barge_in: BargeInPolicy,
    /// First turn of every conversation
    pub system_prompt: String,
}

impl SessionSettings {
    /// Settings from gateway configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            input_sample_rate: config.audio.input_sample_rate,
            recognizer_sample_rate: config.audio.recognizer_sample_rate,
            barge_in: config.pipeline.barge_in,
            system_prompt: config.llm.system_prompt.clone(),
        }
    }
}

/// Messages consumed by the coordinator
#[derive(Debug)]
pub enum SessionEvent {
    /// Event from the recognizer
    Recognition(RecognitionEvent),
    /// A relay finished on its own
    RelayDone { generation: u64 },
    /// The peer went away
    Shutdown,
}

/// What a session leaves behind
#[derive(Debug)]
pub struct SessionSummary {
    pub id: Uuid,
    pub conversation: Conversation,
    pub synthesis: WaiterStats,
}

/// Recognizer with one-shot teardown
struct RecognitionPath {
    recognizer: Arc<dyn Recognizer>,
    input_closed: AtomicBool,
    stopped: AtomicBool,
}

impl RecognitionPath {
    fn new(recognizer: Arc<dyn Recognizer>) -> Self {
        Self {
            recognizer,
            input_closed: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    fn push(&self, pcm16: Vec<u8>) -> Result<()> {
        if self.input_closed.load(Ordering::Acquire) {
            return Err(Error::Session("recognizer input closed".to_string()));
        }
        self.recognizer.push_audio(pcm16)
    }

    fn close_input(&self) {
        if !self.input_closed.swap(true, Ordering::AcqRel) {
            self.recognizer.close_input();
        }
    }

    async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.recognizer.stop_continuous_recognition().await {
            tracing::warn!(error = %e, "failed to stop recognizer");
        }
    }
}

struct ActiveRelay {
    generation: u64,
    handle: JoinHandle<RelayOutcome>,
}

/// Session coordinator state
pub struct Session {
    id: Uuid,
    recognition: Arc<RecognitionPath>,
    synthesizer: Arc<dyn Synthesizer>,
    chat: Arc<dyn ChatCompletion>,
    conversation: Conversation,
    barge_in: BargeIn,
    policy: BargeInPolicy,
    waiter: CompletionWaiter,
    relay: Option<ActiveRelay>,
    outbound: OutboundSender,
    control_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Session {
    /// Start recognition and spawn the coordinator
    ///
    /// # Errors
    ///
    /// Returns error if the frame decoder cannot be built or the recognizer
    /// refuses to start
    pub async fn start(
        engines: SessionEngines,
        settings: SessionSettings,
        outbound: OutboundSender,
    ) -> Result<SessionHandle> {
        let id = Uuid::new_v4();
        let decoder =
            FrameDecoder::new(settings.input_sample_rate, settings.recognizer_sample_rate)?;

        let (recognition_tx, recognition_rx) = mpsc::unbounded_channel();
        engines
            .recognizer
            .start_continuous_recognition(recognition_tx)
            .await?;
        let recognition = Arc::new(RecognitionPath::new(engines.recognizer));

        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let session = Self {
            id,
            recognition: Arc::clone(&recognition),
            synthesizer: engines.synthesizer,
            chat: engines.chat,
            conversation: Conversation::new(&settings.system_prompt),
            barge_in: BargeIn::new(),
            policy: settings.barge_in,
            waiter: CompletionWaiter::spawn(id),
            relay: None,
            outbound,
            control_tx: control_tx.clone(),
        };

        let coordinator = tokio::spawn(session.run(recognition_rx, control_rx));

        tracing::info!(
            session_id = %id,
            barge_in = ?settings.barge_in,
            input_rate = settings.input_sample_rate,
            recognizer_rate = settings.recognizer_sample_rate,
            "session started"
        );

        Ok(SessionHandle {
            id,
            recognition,
            decoder: Mutex::new(decoder),
            control_tx,
            coordinator: tokio::sync::Mutex::new(Some(coordinator)),
        })
    }

    async fn run(
        mut self,
        mut recognition_rx: mpsc::UnboundedReceiver<RecognitionEvent>,
        mut control_rx: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> SessionSummary {
        loop {
            let event = tokio::select! {
                event = recognition_rx.recv() => SessionEvent::Recognition(
                    event.unwrap_or(RecognitionEvent::Canceled(CancellationReason::EndOfStream)),
                ),
                event = control_rx.recv() => event.unwrap_or(SessionEvent::Shutdown),
            };

            if !self.handle(event).await {
                break;
            }
        }

        self.teardown().await
    }

    /// Route one event; returns false when the session should end
    async fn handle(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Recognition(RecognitionEvent::Partial(text)) => {
                self.on_partial(text).await;
                true
            }
            SessionEvent::Recognition(RecognitionEvent::Final(text)) => {
                self.on_final(text).await;
                true
            }
            SessionEvent::Recognition(RecognitionEvent::Canceled(reason)) => {
                match reason {
                    CancellationReason::EndOfStream => {
                        tracing::info!(session_id = %self.id, "recognition ended");
                    }
                    CancellationReason::Error(message) => {
                        tracing::error!(session_id = %self.id, error = %message, "recognition canceled");
                        self.outbound
                            .publish(Outbound::error("recognition_failed", message))
                            .await;
                    }
                }
                false
            }
            SessionEvent::RelayDone { generation } => {
                if self
                    .relay
                    .as_ref()
                    .is_some_and(|r| r.generation == generation)
                {
                    self.settle_relay().await;
                } else {
                    tracing::trace!(generation, "ignoring stale relay completion");
                }
                true
            }
            SessionEvent::Shutdown => {
                tracing::debug!(session_id = %self.id, "shutdown requested");
                false
            }
        }
    }

    async fn on_partial(&mut self, text: String) {
        if text.trim().is_empty() {
            return;
        }
        tracing::debug!(session_id = %self.id, partial = %text, "recognizing");

        self.outbound
            .publish(Outbound::Transcript {
                text,
                is_final: false,
            })
            .await;

        if self.policy == BargeInPolicy::Partial && self.interrupt().await {
            tracing::info!(session_id = %self.id, "barge-in on partial result");
        }
    }

    async fn on_final(&mut self, text: String) {
        if text.trim().is_empty() {
            tracing::debug!(session_id = %self.id, "ignoring empty final result");
            return;
        }
        tracing::info!(session_id = %self.id, transcript = %text, "user turn");

        self.outbound
            .publish(Outbound::Transcript {
                text: text.clone(),
                is_final: true,
            })
            .await;

        if self.interrupt().await {
            tracing::info!(session_id = %self.id, "barge-in on final result");
        }
        // The interrupted relay must close its input before a new one opens
        self.settle_relay().await;

        self.conversation.push_user(text);
        self.start_relay().await;
    }

    /// Cancel the live generation and ask the engine to stop
    async fn interrupt(&mut self) -> bool {
        if !self.barge_in.interrupt() {
            return false;
        }
        if let Err(e) = self.synthesizer.stop().await {
            tracing::warn!(session_id = %self.id, error = %e, "failed to stop synthesis");
        }
        // Audio already sent must not keep playing on the peer
        self.outbound.publish(Outbound::Interrupted).await;
        true
    }

    async fn start_relay(&mut self) {
        let (generation, token) = self.barge_in.begin();

        let SynthesisTask { input, completion } = match self.synthesizer.speak().await {
            Ok(task) => task,
            Err(e) => {
                tracing::error!(session_id = %self.id, error = %e, "failed to open synthesis");
                self.barge_in.interrupt();
                self.outbound
                    .publish(Outbound::error("synthesis_failed", e.to_string()))
                    .await;
                return;
            }
        };
        self.waiter.enqueue(completion, token.clone());

        let relay = Relay {
            chat: Arc::clone(&self.chat),
            input,
            turns: self.conversation.turns().to_vec(),
            token,
            outbound: self.outbound.clone(),
        };
        let control_tx = self.control_tx.clone();

        let handle = tokio::spawn(async move {
            let outcome = relay.run().await;
            let _ = control_tx.send(SessionEvent::RelayDone { generation });
            outcome
        });

        tracing::debug!(session_id = %self.id, generation, "relay started");
        self.relay = Some(ActiveRelay { generation, handle });
    }

    /// Wait for the active relay and record its outcome
    async fn settle_relay(&mut self) {
        let Some(active) = self.relay.take() else {
            return;
        };

        let outcome = match active.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "relay task failed");
                return;
            }
        };

        if let Some(text) = outcome.spoken_text() {
            self.conversation.push_assistant(text);
        }
        if let RelayOutcome::Failed(e) = outcome {
            self.outbound
                .publish(Outbound::error("chat_failed", e.to_string()))
                .await;
        }
    }

    async fn teardown(mut self) -> SessionSummary {
        self.interrupt().await;
        self.settle_relay().await;

        self.recognition.close_input();
        self.recognition.stop().await;

        let synthesis = self.waiter.finish().await;

        tracing::info!(
            session_id = %self.id,
            turns = self.conversation.len(),
            completed = synthesis.completed,
            interrupted = synthesis.interrupted + synthesis.stopped,
            failed = synthesis.failed,
            "session ended"
        );

        SessionSummary {
            id: self.id,
            conversation: self.conversation,
            synthesis,
        }
    }
}

/// Transport-side handle to a running session
pub struct SessionHandle {
    id: Uuid,
    recognition: Arc<RecognitionPath>,
    decoder: Mutex<FrameDecoder>,
    control_tx: mpsc::UnboundedSender<SessionEvent>,
    coordinator: tokio::sync::Mutex<Option<JoinHandle<SessionSummary>>>,
}

impl SessionHandle {
    /// Session identifier
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Decode an inbound float32 frame and push it to the recognizer
    ///
    /// Returns the PCM16 byte count pushed, which is zero while the
    /// resampler accumulates.
    ///
    /// # Errors
    ///
    /// Returns error if the frame is malformed (it is dropped) or the
    /// recognizer input is already closed
    pub fn push_frame(&self, frame: &[u8]) -> Result<usize> {
        let decoded = {
            let mut decoder = self
                .decoder
                .lock()
                .map_err(|_| Error::Session("frame decoder poisoned".to_string()))?;
            decoder.decode(frame)
        };

        let pcm16 = match decoded {
            Ok(pcm16) => pcm16,
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "dropping inbound frame");
                return Err(e.into());
            }
        };

        if pcm16.is_empty() {
            return Ok(0);
        }
        let len = pcm16.len();
        self.recognition.push(pcm16)?;
        Ok(len)
    }

    /// Tear the session down
    ///
    /// Safe to call any number of times; only the first call returns the
    /// summary and later calls wait for it to be produced.
    pub async fn close(&self) -> Option<SessionSummary> {
        let mut coordinator = self.coordinator.lock().await;
        let handle = coordinator.take()?;

        let _ = self.control_tx.send(SessionEvent::Shutdown);
        match handle.await {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "session coordinator failed");
                None
            }
        }
    }
}
