//! HTTP surface for the inpainting service
//!
//! Routes:
//! - `GET /` drawing page
//! - `GET /static/*` assets from the configured static directory
//! - `POST /inpaint` multipart upload, JSON response
//! - `GET /health` model status

pub mod handlers;
pub mod response;

use crate::{config::ServiceConfig, error::Result, processor::InpaintProcessor};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

pub use response::{ApiError, ApiResponse, HealthResponse};

/// Page served at `/` when no static directory overrides it
pub const EMBEDDED_INDEX_HTML: &str = include_str!("../../static/index.html");

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<InpaintProcessor>,
    pub index_html: Arc<String>,
}

impl AppState {
    /// Build state, reading `index.html` from `static_dir` when one is configured
    pub fn new(processor: Arc<InpaintProcessor>) -> Self {
        let index_html = processor
            .config()
            .static_dir
            .as_ref()
            .map(|dir| dir.join("index.html"))
            .and_then(|path| match std::fs::read_to_string(&path) {
                Ok(html) => Some(html),
                Err(e) => {
                    warn!("Falling back to embedded index page: {}: {e}", path.display());
                    None
                },
            })
            .unwrap_or_else(|| EMBEDDED_INDEX_HTML.to_string());

        Self {
            processor,
            index_html: Arc::new(index_html),
        }
    }
}

/// Build the application router
pub fn build_router(state: AppState, config: &ServiceConfig) -> Router {
    let mut router = Router::new()
        .route("/", get(handlers::index))
        .route("/inpaint", post(handlers::inpaint))
        .route("/health", get(handlers::health));

    if let Some(static_dir) = &config.static_dir {
        router = router.nest_service("/static", ServeDir::new(static_dir));
    }

    router
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind, serve until Ctrl-C, then release the models
///
/// # Errors
/// - Address already in use or otherwise unbindable
/// - Server I/O failure
pub async fn serve(processor: Arc<InpaintProcessor>) -> Result<()> {
    let config = processor.config().clone();
    let state = AppState::new(Arc::clone(&processor));
    let app = build_router(state, &config);

    let listener = TcpListener::bind(config.bind_address).await?;
    let local: SocketAddr = listener.local_addr()?;
    info!("Listening on http://{local}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, releasing models");
    tokio::task::spawn_blocking(move || processor.shutdown())
        .await
        .map_err(|e| crate::error::InpaintError::internal(format!("shutdown task failed: {e}")))?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
