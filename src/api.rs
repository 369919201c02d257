// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HTTP API — the composition root's outer surface.
//!
//! Endpoints:
//!   GET  /healthz      → liveness probe
//!   GET  /api/cameras  → camera registry snapshot (JSON)
//!   GET  /ws           → upgrade to the realtime session protocol

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::hub::HubHandle;
use crate::registry::CameraRegistry;
use crate::session;

/// Shared state passed to all handlers.
pub struct AppState {
    pub registry: Arc<CameraRegistry>,
    pub hub: HubHandle,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(handle_healthz))
        .route("/api/cameras", get(handle_list_cameras))
        .route("/ws", get(handle_ws))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server. Runs until the listener errors; callers race
/// this against their own cancellation.
pub async fn start_server(state: Arc<AppState>, port: u16) {
    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", port);
    info!(port, "HTTP API listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "Failed to bind HTTP server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "HTTP server error");
    }
}

async fn handle_healthz() -> impl IntoResponse {
    "ok"
}

async fn handle_list_cameras(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.snapshot())
}

async fn handle_ws(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| async move {
        session::run(socket, hub).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn state() -> Arc<AppState> {
        let hub = crate::hub::spawn(CancellationToken::new()).0;
        Arc::new(AppState { registry: Arc::new(CameraRegistry::new()), hub })
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let resp = handle_healthz().await.into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn list_cameras_reflects_registry_snapshot() {
        let s = state();
        s.registry.upsert(&crate::config::CameraConfig {
            id: "cam1".into(),
            name: "cam1".into(),
            url: "rtsp://x".into(),
            max_reconnect_attempts: 0,
            enabled: true,
            detection: Default::default(),
        });
        let resp = handle_list_cameras(State(s)).await.into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }
}
