//! Liveness: `/api/health`

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/api/health` route.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/health", get(health))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sections: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, AppError> {
    let sections = state.store.load_all().await?.len();
    Ok(Json(HealthResponse { status: "ok", sections }))
}
