//! Axum status and trigger surface for the sync engine.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use catsync_core::{Dialect, TenantId};
use catsync_sync::SyncEngine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

pub const CRATE_NAME: &str = "catsync-web";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
}

impl AppState {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TriggerQuery {
    tenant_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SourceRow {
    name: String,
    url: String,
    dialect: Dialect,
    priority: u32,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/sync/status", get(status_handler))
        .route("/sync/trigger", post(trigger_handler))
        .route("/sync/sources", get(sources_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "status server listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.engine.status()).into_response()
}

async fn trigger_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TriggerQuery>,
) -> Response {
    let tenant_id = query.tenant_id.map(TenantId);
    match state.engine.trigger(tenant_id) {
        Some(_handle) => {
            info!(tenant = ?query.tenant_id, "manual sync triggered");
            (
                StatusCode::ACCEPTED,
                Json(json!({ "started": true, "tenantId": query.tenant_id })),
            )
                .into_response()
        }
        None => (
            StatusCode::CONFLICT,
            Json(json!({ "started": false, "reason": "sync already running" })),
        )
            .into_response(),
    }
}

async fn sources_handler(State(state): State<Arc<AppState>>) -> Response {
    let rows = state
        .engine
        .sources()
        .iter()
        .map(|s| SourceRow {
            name: s.name.clone(),
            url: s.url.clone(),
            dialect: s.dialect,
            priority: s.priority,
        })
        .collect::<Vec<_>>();
    Json(rows).into_response()
}
