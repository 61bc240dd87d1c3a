//! HTTP API server for the voice gateway

pub mod health;
pub mod signaling;
pub mod voice;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::engines::EngineFactory;
use crate::pipeline::SessionSettings;

pub use signaling::{PeerNegotiator, SessionDescription};

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Builds engines for each voice session
    pub engines: Arc<dyn EngineFactory>,
    /// Settings every session starts with
    pub session: SessionSettings,
    /// Rate of PCM16 audio sent to peers
    pub output_sample_rate: u32,
    /// Peer-connection negotiation, when a media stack is installed
    pub negotiator: Option<Arc<dyn PeerNegotiator>>,
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    engines: Arc<dyn EngineFactory>,
    session: SessionSettings,
    port: u16,
    output_sample_rate: u32,
    static_dir: Option<PathBuf>,
    negotiator: Option<Arc<dyn PeerNegotiator>>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(engines: Arc<dyn EngineFactory>, session: SessionSettings, port: u16) -> Self {
        Self {
            engines,
            session,
            port,
            output_sample_rate: 24_000,
            static_dir: None,
            negotiator: None,
        }
    }

    /// Set the rate of synthesized audio announced to peers
    #[must_use]
    pub const fn output_sample_rate(mut self, rate: u32) -> Self {
        self.output_sample_rate = rate;
        self
    }

    /// Serve a web client from this directory
    #[must_use]
    pub fn static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }

    /// Install a peer-connection negotiator for `/offer`
    #[must_use]
    pub fn negotiator(mut self, negotiator: Arc<dyn PeerNegotiator>) -> Self {
        self.negotiator = Some(negotiator);
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let state = Arc::new(ApiState {
            engines: self.engines,
            session: self.session,
            output_sample_rate: self.output_sample_rate,
            negotiator: self.negotiator,
        });

        ApiServer {
            state,
            port: self.port,
            static_dir: self.static_dir,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
    static_dir: Option<PathBuf>,
}

impl ApiServer {
    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .nest("/ws", voice::router(self.state.clone()))
            .merge(signaling::router(self.state.clone()))
            .merge(health::router());

        // Serve static files if configured
        if let Some(static_dir) = &self.static_dir {
            let index_file = static_dir.join("index.html");
            let serve_dir =
                ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file));

            router = router.fallback_service(serve_dir);
            tracing::info!(path = %static_dir.display(), "serving static files");
        }

        // Browser clients are served from other origins during development
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}
