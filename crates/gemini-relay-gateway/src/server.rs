//! Axum-based WebSocket server.

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::connection::handle_ws_connection;
use crate::state::GatewayState;

/// Build the gateway router.
///
/// When `ui_enabled` is true, the embedded browser UI is served at `/`.
pub fn router(state: Arc<GatewayState>, ui_enabled: bool) -> Router {
    // /ws and /health are registered first so they take priority over the UI catch-all
    let mut app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    if ui_enabled {
        app = app.merge(gemini_relay_web::ui_router());
    }

    app.layer(TraceLayer::new_for_http())
}

/// Start the gateway and serve until Ctrl-C, then stop every engine.
pub async fn start_gateway(
    state: Arc<GatewayState>,
    bind: &str,
    port: u16,
    ui_enabled: bool,
) -> anyhow::Result<()> {
    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");
    if ui_enabled {
        info!("Browser UI available at http://{addr}/");
    }

    axum::serve(listener, router(state.clone(), ui_enabled))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let stopped = state.supervisor.stop_all().await;
    info!(stopped, "Gateway stopped");
    Ok(())
}

async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_ws_connection(state, socket))
            .into_response(),
        Err(rejection) => {
            warn!(%rejection, "Rejected non-WebSocket request to /ws");
            (StatusCode::BAD_REQUEST, "Error: Expected a WebSocket request.").into_response()
        }
    }
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let connections = state.connection_count().await;
    let engines = state.supervisor.registry().len().await;
    let uptime_secs = (Utc::now() - state.started_at).num_seconds();

    axum::Json(json!({
        "status": "ok",
        "version": version,
        "connections": connections,
        "engines": engines,
        "uptime_secs": uptime_secs,
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(%e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
