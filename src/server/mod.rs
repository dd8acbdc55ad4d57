//! HTTP front-end.
//!
//! Serves the single-page UI and one streaming endpoint:
//! - `POST /generate_exam` takes a PDF upload and an optional instruction and
//!   answers with the model's output as a chunked `text/plain` body
//! - `GET /`, `GET /static/*` serve the front-end
//! - `GET /health` for liveness probes

mod handlers;
mod routes;

pub use handlers::ApiError;
pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::error::Pdf2ExamError;
use crate::pipeline::extract::TextExtractor;
use crate::stream::Relay;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub extractor: Arc<dyn TextExtractor>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig, relay: Relay, extractor: Arc<dyn TextExtractor>) -> Self {
        Self {
            relay: Arc::new(relay),
            extractor,
            config: Arc::new(config),
        }
    }
}

/// Start the web server and run until the listener fails.
pub async fn serve(state: AppState) -> Result<(), Pdf2ExamError> {
    let addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port)
        .parse()
        .map_err(|e| Pdf2ExamError::InvalidConfig(format!("bad listen address: {e}")))?;

    let missing = state.relay.config().missing_settings();
    if !missing.is_empty() {
        tracing::warn!(
            "{} not set; /generate_exam will answer with a configuration error",
            missing.join(", ")
        );
    }

    let app = create_router(state);
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Pdf2ExamError::Internal(format!("cannot bind {addr}: {e}")))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| Pdf2ExamError::Internal(format!("server error: {e}")))?;

    Ok(())
}
