//! Shared test utilities
//!
//! Scriptable stand-ins for the recognizer, synthesizer and chat engines
//! that record every call the pipeline makes.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use alma_gateway::chat::{ChatCompletion, DeltaStream, Turn};
use alma_gateway::config::BargeInPolicy;
use alma_gateway::engines::EngineFactory;
use alma_gateway::pipeline::{
    Outbound, OutboundSender, Session, SessionEngines, SessionHandle, SessionSettings,
    outbound_channel,
};
use alma_gateway::speech::{
    RecognitionEvent, RecognitionEvents, Recognizer, SynthesisOutcome, SynthesisTask, Synthesizer,
    TextReceiver,
};
use alma_gateway::{Error, Result};

/// Poll `condition` until it holds, panicking after two seconds
pub async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Recognizer driven by the test
#[derive(Default)]
pub struct FakeRecognizer {
    events: Mutex<Option<RecognitionEvents>>,
    pushed: Mutex<Vec<Vec<u8>>>,
    closed: Mutex<bool>,
    pub stop_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
}

impl FakeRecognizer {
    /// Deliver an event as if the engine produced it
    pub fn emit(&self, event: RecognitionEvent) {
        let events = self.events.lock().unwrap();
        events
            .as_ref()
            .expect("recognition not started")
            .send(event)
            .expect("session stopped listening");
    }

    pub fn partial(&self, text: &str) {
        self.emit(RecognitionEvent::Partial(text.to_string()));
    }

    pub fn final_result(&self, text: &str) {
        self.emit(RecognitionEvent::Final(text.to_string()));
    }

    /// Every PCM16 chunk pushed so far
    pub fn pushed(&self) -> Vec<Vec<u8>> {
        self.pushed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Recognizer for FakeRecognizer {
    async fn start_continuous_recognition(&self, events: RecognitionEvents) -> Result<()> {
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn stop_continuous_recognition(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn push_audio(&self, pcm16: Vec<u8>) -> Result<()> {
        if *self.closed.lock().unwrap() {
            return Err(Error::Stt("closed".to_string()));
        }
        self.pushed.lock().unwrap().push(pcm16);
        Ok(())
    }

    fn close_input(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        *self.closed.lock().unwrap() = true;
    }
}

/// Synthesizer call, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthCall {
    Speak,
    Stop,
}

/// Synthesizer recording text per request and open inputs
#[derive(Default)]
pub struct FakeSynthesizer {
    calls: Mutex<Vec<SynthCall>>,
    texts: Arc<Mutex<Vec<Vec<String>>>>,
    inputs: Mutex<Vec<Arc<Mutex<TextReceiver>>>>,
    current: Mutex<Option<CancellationToken>>,
    failing_speaks: AtomicUsize,
    pub max_open_inputs: AtomicUsize,
}

impl FakeSynthesizer {
    pub fn calls(&self) -> Vec<SynthCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Text written into each synthesis request
    pub fn texts(&self) -> Vec<Vec<String>> {
        self.texts.lock().unwrap().clone()
    }

    /// Requests whose text input has not been closed by the pipeline
    pub fn open_inputs(&self) -> usize {
        self.inputs
            .lock()
            .unwrap()
            .iter()
            .filter(|rx| !rx.lock().unwrap().is_closed())
            .count()
    }

    pub fn speak_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == SynthCall::Speak)
            .count()
    }

    /// Make the next `speak` call fail as an unreachable engine would
    pub fn fail_next_speak(&self) {
        self.failing_speaks.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn speak(&self) -> Result<SynthesisTask> {
        self.calls.lock().unwrap().push(SynthCall::Speak);

        let failing = self
            .failing_speaks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(Error::Tts("engine unavailable".to_string()));
        }

        // Any input the pipeline has not closed yet overlaps this request
        let open = self.open_inputs() + 1;
        self.max_open_inputs.fetch_max(open, Ordering::SeqCst);

        let index = {
            let mut texts = self.texts.lock().unwrap();
            texts.push(Vec::new());
            texts.len() - 1
        };

        let stop = CancellationToken::new();
        *self.current.lock().unwrap() = Some(stop.clone());

        let (task, text_rx, done) = SynthesisTask::channel();
        let text_rx = Arc::new(Mutex::new(text_rx));
        self.inputs.lock().unwrap().push(Arc::clone(&text_rx));
        let texts = Arc::clone(&self.texts);

        tokio::spawn(async move {
            let mut bytes = 0;
            while let Some(text) =
                std::future::poll_fn(|cx| text_rx.lock().unwrap().poll_recv(cx)).await
            {
                bytes += text.len();
                texts.lock().unwrap()[index].push(text);
            }

            if stop.is_cancelled() {
                done.send(Ok(SynthesisOutcome::Stopped));
            } else {
                done.send(Ok(SynthesisOutcome::Completed { audio_bytes: bytes }));
            }
        });

        Ok(task)
    }

    async fn stop(&self) -> Result<()> {
        self.calls.lock().unwrap().push(SynthCall::Stop);
        if let Some(token) = self.current.lock().unwrap().take() {
            token.cancel();
        }
        Ok(())
    }
}

/// One scripted completion
#[derive(Clone, Default)]
pub struct Script {
    steps: Vec<std::result::Result<&'static str, &'static str>>,
    hold: bool,
}

impl Script {
    /// Stream these deltas, then end
    pub fn deltas(deltas: &[&'static str]) -> Self {
        Self {
            steps: deltas.iter().map(|d| Ok(*d)).collect(),
            hold: false,
        }
    }

    /// Stream these deltas, then stay open until dropped
    pub fn held(deltas: &[&'static str]) -> Self {
        Self {
            hold: true,
            ..Self::deltas(deltas)
        }
    }

    /// Fail the stream after the deltas so far
    #[must_use]
    pub fn then_fail(mut self, message: &'static str) -> Self {
        self.steps.push(Err(message));
        self
    }
}

/// Chat engine replaying scripts in order and recording requests
#[derive(Default)]
pub struct FakeChat {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<Vec<Turn>>>,
}

impl FakeChat {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::default(),
        }
    }

    /// Conversation sent with each request
    pub fn requests(&self) -> Vec<Vec<Turn>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatCompletion for FakeChat {
    async fn stream(&self, turns: &[Turn]) -> Result<DeltaStream> {
        self.requests.lock().unwrap().push(turns.to_vec());
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();

        let items = stream::iter(script.steps.into_iter().map(|step| {
            step.map(ToString::to_string)
                .map_err(|e| Error::Chat(e.to_string()))
        }));

        if script.hold {
            Ok(items.chain(stream::pending()).boxed())
        } else {
            Ok(items.boxed())
        }
    }
}

/// A session wired to fakes
pub struct Harness {
    pub recognizer: Arc<FakeRecognizer>,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub chat: Arc<FakeChat>,
    pub session: SessionHandle,
    pub outbound: mpsc::Receiver<Outbound>,
}

impl Harness {
    /// Start a session at matching rates with the given policy
    pub async fn start(policy: BargeInPolicy, scripts: Vec<Script>) -> Self {
        let recognizer = Arc::new(FakeRecognizer::default());
        let synthesizer = Arc::new(FakeSynthesizer::default());
        let chat = Arc::new(FakeChat::new(scripts));
        let (outbound_tx, outbound) = outbound_channel();

        let engines = SessionEngines {
            recognizer: recognizer.clone(),
            synthesizer: synthesizer.clone(),
            chat: chat.clone(),
        };
        let session = Session::start(engines, settings(policy), outbound_tx)
            .await
            .expect("session should start");

        Self {
            recognizer,
            synthesizer,
            chat,
            session,
            outbound,
        }
    }

    /// Drain everything published so far
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }
}

/// Session settings at a single 16kHz rate
pub fn settings(policy: BargeInPolicy) -> SessionSettings {
    SessionSettings {
        input_sample_rate: 16_000,
        recognizer_sample_rate: 16_000,
        barge_in: policy,
        system_prompt: "You are a test assistant.".to_string(),
    }
}

/// Engine factory handing out fresh fakes
#[derive(Default)]
pub struct FakeEngines;

impl EngineFactory for FakeEngines {
    fn engines(&self, _outbound: &OutboundSender) -> Result<SessionEngines> {
        Ok(SessionEngines {
            recognizer: Arc::new(FakeRecognizer::default()),
            synthesizer: Arc::new(FakeSynthesizer::default()),
            chat: Arc::new(FakeChat::default()),
        })
    }
}
