//! Content routes: `/api/cms/*`

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::limit::GlobalConcurrencyLimitLayer;

use fantea_core::document::ContentDocument;
use fantea_core::store::{SaveRequest, list_backups};

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/api/cms` router.
///
/// Paths:
/// - `GET    /api/cms/load`: whole document
/// - `GET    /api/cms/load/{section}`: one section or `null`
/// - `POST   /api/cms/save`: replace a section
/// - `DELETE /api/cms/section/{section}`: remove a section
/// - `POST   /api/cms/backup`: snapshot the document
/// - `GET    /api/cms/backups`: list snapshots, newest first
pub fn router(write_limit: &GlobalConcurrencyLimitLayer) -> Router<Arc<AppState>> {
    Router::new()
        .route("/load", get(load_all))
        .route("/load/{section}", get(load_section))
        .route("/save", post(save_section).layer(write_limit.clone()))
        .route(
            "/section/{section}",
            delete(delete_section).layer(write_limit.clone()),
        )
        .route("/backup", post(create_backup).layer(write_limit.clone()))
        .route("/backups", get(backups))
}

// ── Request / response types ─────────────────────────────────────────

/// Body of `POST /api/cms/save`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveBody {
    pub section: String,
    pub data: Value,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub expected_revision: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub success: bool,
    pub data: T,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResponse {
    pub success: bool,
    pub message: String,
    pub revision: u64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct BackupResponse {
    pub success: bool,
    pub file: String,
}

fn ok<T>(data: T) -> Json<DataResponse<T>> {
    Json(DataResponse { success: true, data })
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn load_all(State(state): State<Arc<AppState>>) -> Result<Json<DataResponse<ContentDocument>>, AppError> {
    Ok(ok(state.store.load_all().await?))
}

async fn load_section(
    State(state): State<Arc<AppState>>,
    Path(section): Path<String>,
) -> Result<Json<DataResponse<Option<Value>>>, AppError> {
    Ok(ok(state.store.load_section(&section).await?))
}

async fn save_section(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SaveBody>, JsonRejection>,
) -> Result<Json<SaveResponse>, AppError> {
    let Json(body) = body?;
    let saved = state
        .store
        .save_section(SaveRequest {
            section: body.section,
            data: body.data,
            user: body.user.filter(|u| !u.is_empty()).unwrap_or_else(|| "admin".to_owned()),
            expected_revision: body.expected_revision,
        })
        .await?;

    Ok(Json(SaveResponse {
        success: true,
        message: format!("Section '{}' saved successfully", saved.section),
        revision: saved.revision,
        last_modified: saved.last_modified,
    }))
}

async fn delete_section(
    State(state): State<Arc<AppState>>,
    Path(section): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = state.store.delete_section(&section).await?;
    Ok(Json(DeleteResponse { success: true, deleted }))
}

async fn create_backup(State(state): State<Arc<AppState>>) -> Result<Json<BackupResponse>, AppError> {
    let path = state.store.backup(&state.backup_dir, state.backup_retain).await?;
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Json(BackupResponse { success: true, file }))
}

async fn backups(State(state): State<Arc<AppState>>) -> Result<Json<DataResponse<Vec<String>>>, AppError> {
    Ok(ok(list_backups(&state.backup_dir).await?))
}
