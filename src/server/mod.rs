//! HTTP and WebSocket presentation layer.
//!
//! ```text
//! /                 - Dashboard page
//! /health           - Health check
//! /ws               - Live push channel
//! /api
//! ├── /status       - Status snapshot
//! └── /readings     - Recent readings (?count=N)
//! ```

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::error::Result;
use crate::fanout::Fanout;
use crate::store::StateStore;

pub mod api;
pub mod ws;

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: Arc<StateStore>,
    pub fanout: Fanout,
    /// Fires on shutdown; open viewer sessions close when it does.
    pub cancel: CancellationToken,
    /// Open viewer sessions, drained by [`serve`] before it returns.
    pub sessions: TaskTracker,
}

impl AppState {
    pub fn new(store: Arc<StateStore>, fanout: Fanout, cancel: CancellationToken) -> Self {
        Self {
            store,
            fanout,
            cancel,
            sessions: TaskTracker::new(),
        }
    }
}

/// Build the router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(api::dashboard))
        .route("/health", get(api::health))
        .route("/ws", get(ws::upgrade))
        .nest(
            "/api",
            Router::new()
                .route("/status", get(api::status))
                .route("/readings", get(api::readings)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on `listener` until the state's cancellation token fires, then wait
/// for open viewer sessions to close.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Dashboard listening on http://{}", addr);
    }

    let cancel = state.cancel.clone();
    let sessions = state.sessions.clone();
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    sessions.close();
    if !sessions.is_empty() {
        debug!("Waiting for {} viewer sessions", sessions.len());
    }
    sessions.wait().await;

    info!("HTTP server stopped");
    Ok(())
}
