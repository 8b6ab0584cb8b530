//! Admin login: `/api/auth/*`
//!
//! Verifies credentials against the configured [`CredentialTable`] and hands
//! back a fresh session object. The server keeps no session state; clients
//! store and expire sessions themselves.
//!
//! [`CredentialTable`]: fantea_core::auth::CredentialTable

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use fantea_core::auth::Session;

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/api/auth` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/login", post(login))
}

#[derive(Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub remember: bool,
}

impl std::fmt::Debug for LoginBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginBody")
            .field("username", &self.username)
            .field("remember", &self.remember)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub session: Session,
}

async fn login(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LoginBody>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let Json(body) = body?;
    let identity = state
        .credentials
        .verify(&body.username, &body.password)
        .inspect_err(|_| warn!(username = %body.username, "admin login rejected"))?;

    let session = Session::start(identity, body.remember, Utc::now());
    info!(username = %session.username, role = ?session.role, "admin login accepted");
    Ok(Json(LoginResponse { success: true, session }))
}
