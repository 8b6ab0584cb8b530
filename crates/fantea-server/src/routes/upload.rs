//! Upload routes: `/api/upload/*`

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use tower::limit::GlobalConcurrencyLimitLayer;

use fantea_core::upload::UploadRequest;

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/api/upload` router.
///
/// Paths:
/// - `POST /api/upload/image`: store a base64 data URL, return its public URL
pub fn router(write_limit: &GlobalConcurrencyLimitLayer) -> Router<Arc<AppState>> {
    Router::new().route("/image", post(upload_image).layer(write_limit.clone()))
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub url: String,
}

async fn upload_image(
    State(state): State<Arc<AppState>>,
    body: Result<Json<UploadRequest>, JsonRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let Json(request) = body?;
    let url = state.uploader.store(&request).await?;
    Ok(Json(UploadResponse { success: true, url }))
}
