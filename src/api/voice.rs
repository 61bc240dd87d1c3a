//! WebSocket voice transport
//!
//! One socket carries one session. Binary messages from the peer are
//! float32 mono audio frames; binary messages to the peer are PCM16 mono
//! audio. Everything else travels as tagged JSON text messages.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;

use super::ApiState;
use crate::pipeline::{Outbound, Session, SessionHandle, outbound_channel};

/// Outgoing JSON message to the peer
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceOutgoing {
    /// Session is live; audio may be sent
    Connected {
        session_id: String,
        input_sample_rate: u32,
        output_sample_rate: u32,
    },
    /// Recognized user speech
    Transcript { text: String, is_final: bool },
    /// Assistant text as it is spoken
    AssistantText { text: String },
    /// User barged in; flush queued assistant audio
    Interrupted,
    /// Error occurred
    Error { code: String, message: String },
}

impl VoiceOutgoing {
    /// Encode a pipeline message for the socket
    #[must_use]
    pub fn encode(outbound: Outbound) -> Option<Message> {
        let outgoing = match outbound {
            Outbound::Audio(pcm16) => return Some(Message::Binary(pcm16.into())),
            Outbound::Transcript { text, is_final } => Self::Transcript { text, is_final },
            Outbound::AssistantText(text) => Self::AssistantText { text },
            Outbound::Interrupted => Self::Interrupted,
            Outbound::Error { code, message } => Self::Error { code, message },
        };
        outgoing.to_message()
    }

    fn to_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Message::Text(text.into())),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode outgoing message");
                None
            }
        }
    }
}

/// Build voice router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/voice", get(ws_upgrade))
        .with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(State(state): State<Arc<ApiState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let (mut sender, mut receiver) = socket.split();

    let (outbound, mut outbound_rx) = outbound_channel();

    let session = match start_session(&state, outbound).await {
        Ok(session) => Arc::new(session),
        Err(e) => {
            tracing::error!(error = %e, "failed to start voice session");
            let error = VoiceOutgoing::Error {
                code: "session_failed".to_string(),
                message: e.to_string(),
            };
            if let Some(msg) = error.to_message() {
                let _ = sender.send(msg).await;
            }
            return;
        }
    };
    let session_id = session.id();

    // Send connected message
    let connected = VoiceOutgoing::Connected {
        session_id: session_id.to_string(),
        input_sample_rate: state.session.input_sample_rate,
        output_sample_rate: state.output_sample_rate,
    };
    if let Some(msg) = connected.to_message() {
        if sender.send(msg).await.is_err() {
            session.close().await;
            return;
        }
    }

    tracing::info!(session_id = %session_id, "voice WebSocket connected");

    // Forward pipeline output to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            let Some(msg) = VoiceOutgoing::encode(outbound) else {
                continue;
            };
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Feed inbound audio frames to the session
    let session_for_recv = Arc::clone(&session);
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Binary(frame) => {
                    // Malformed frames are logged by the session and dropped
                    if let Err(e) = session_for_recv.push_frame(&frame) {
                        tracing::trace!(error = %e, "frame not pushed");
                    }
                }
                Message::Text(text) => {
                    tracing::trace!(len = text.len(), "ignoring text message");
                }
                Message::Close(_) => {
                    tracing::info!(session_id = %session_id, "WebSocket closed by client");
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if let Some(summary) = session.close().await {
        tracing::info!(
            session_id = %session_id,
            turns = summary.conversation.len(),
            "voice WebSocket disconnected"
        );
    }
}

async fn start_session(
    state: &ApiState,
    outbound: crate::pipeline::OutboundSender,
) -> crate::Result<SessionHandle> {
    let engines = state.engines.engines(&outbound)?;
    Session::start(engines, state.session.clone(), outbound).await
}
