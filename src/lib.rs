//! Alma Gateway - real-time voice gateway for AI assistants
//!
//! A remote peer streams microphone audio in; the gateway recognizes it,
//! streams a chat completion for every finished utterance, speaks the reply
//! token by token, and streams audio and transcripts back. New user speech
//! interrupts assistant speech that is still playing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Transport                        │
//! │        /ws/voice  │  /offer  │  /health              │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                   Pipeline                           │
//! │   Ingest  │  Session  │  Relay  │  Barge-in          │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                   Engines                            │
//! │   Recognizer (STT)  │  Synthesizer (TTS)  │  Chat    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod audio;
pub mod chat;
pub mod config;
pub mod engines;
pub mod error;
pub mod pipeline;
pub mod speech;

pub use config::Config;
pub use engines::{EngineFactory, HttpEngines};
pub use error::{Error, Result};
