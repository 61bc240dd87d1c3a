//! Peer-connection signaling
//!
//! `POST /offer` exchanges session descriptions with a browser peer. The
//! media stack itself sits behind [`PeerNegotiator`]; without one installed
//! the endpoint answers `501 not_configured` and peers use `/ws/voice`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};

use super::ApiState;

/// SDP session description as exchanged with browsers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl SessionDescription {
    /// Build an answer description
    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: "answer".to_string(),
        }
    }
}

/// Negotiates a peer connection from a remote offer
#[async_trait]
pub trait PeerNegotiator: Send + Sync {
    /// Accept an offer and return the local answer
    ///
    /// # Errors
    ///
    /// Returns error if the offer cannot be applied
    async fn answer(&self, offer: SessionDescription) -> crate::Result<SessionDescription>;
}

/// Build signaling router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/offer", post(offer))
        .with_state(state)
}

/// Answer a peer's offer
async fn offer(
    State(state): State<Arc<ApiState>>,
    Json(offer): Json<SessionDescription>,
) -> Result<Json<SessionDescription>, SignalingError> {
    if offer.kind != "offer" {
        return Err(SignalingError::BadRequest(format!(
            "expected type \"offer\", got \"{}\"",
            offer.kind
        )));
    }

    let negotiator = state
        .negotiator
        .as_ref()
        .ok_or(SignalingError::NotConfigured(
            "no peer-connection stack installed; use /ws/voice",
        ))?;

    let answer = negotiator.answer(offer).await.map_err(|e| {
        tracing::error!(error = %e, "offer negotiation failed");
        SignalingError::NegotiationFailed(e.to_string())
    })?;

    tracing::info!("peer connection negotiated");
    Ok(Json(answer))
}

/// Signaling API errors
#[derive(Debug)]
pub enum SignalingError {
    NotConfigured(&'static str),
    BadRequest(String),
    NegotiationFailed(String),
}

impl IntoResponse for SignalingError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::NotConfigured(msg) => {
                (StatusCode::NOT_IMPLEMENTED, "not_configured", msg.to_string())
            }
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::NegotiationFailed(msg) => (StatusCode::BAD_GATEWAY, "negotiation_failed", msg),
        };

        (
            status,
            Json(ErrorResponse {
                error: ErrorBody { code, message },
            }),
        )
            .into_response()
    }
}
