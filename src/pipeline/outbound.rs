//! Messages pushed back to the peer
//!
//! Outbound traffic rides its own bounded channel so a slow peer never
//! blocks audio ingest.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::speech::AudioSink;

/// Outbound queue depth per session
pub const OUTBOUND_CAPACITY: usize = 256;

/// Something to deliver to the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Recognized user speech
    Transcript { text: String, is_final: bool },
    /// Assistant text delta, mirrored as it is spoken
    AssistantText(String),
    /// Synthesized PCM16 mono audio at the output rate
    Audio(Vec<u8>),
    /// Barge-in: drop any assistant audio queued or playing
    Interrupted,
    /// Non-fatal failure the peer may want to show
    Error { code: String, message: String },
}

impl Outbound {
    /// Build an error message
    #[must_use]
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Sending half of a session's outbound channel
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<Outbound>,
}

/// Create an outbound channel
#[must_use]
pub fn outbound_channel() -> (OutboundSender, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
    (OutboundSender { tx }, rx)
}

impl OutboundSender {
    /// Queue a message; returns false once the peer is gone
    pub async fn publish(&self, message: Outbound) -> bool {
        self.tx.send(message).await.is_ok()
    }

    /// Whether the peer side has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl AudioSink for OutboundSender {
    async fn send_audio(&self, pcm16: Vec<u8>) -> bool {
        self.publish(Outbound::Audio(pcm16)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn audio_sink_wraps_chunks() {
        let (tx, mut rx) = outbound_channel();
        assert!(tx.send_audio(vec![1, 2]).await);
        assert_eq!(rx.recv().await, Some(Outbound::Audio(vec![1, 2])));
    }

    #[tokio::test]
    async fn publish_fails_after_receiver_drop() {
        let (tx, rx) = outbound_channel();
        drop(rx);
        assert!(tx.is_closed());
        assert!(!tx.publish(Outbound::AssistantText("hi".to_string())).await);
    }
}
