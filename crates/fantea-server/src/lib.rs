//! Fantea CMS content service.
//!
//! Serves the JSON content API under `/api/*` and uploaded images under
//! `/uploads/*`. Sections are stored one record per section in the data
//! directory; see `fantea_core::store`.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::CorsOrigins;
use crate::state::AppState;

/// Concurrent write requests (save, delete, upload, backup) allowed at once.
/// Reads are not limited.
pub const WRITE_CONCURRENCY: usize = 16;

/// JSON body limit for a given decoded image limit. Base64 inflates by 4/3;
/// the extra 64 KiB covers the data URL prefix and the other fields.
#[must_use]
pub fn body_limit(max_upload_bytes: usize) -> usize {
    max_upload_bytes
        .saturating_mul(4)
        .div_ceil(3)
        .saturating_add(64 * 1024)
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: Arc<AppState>, cors_origins: &CorsOrigins) -> Router {
    build_router_with_write_limit(state, cors_origins, WRITE_CONCURRENCY)
}

/// [`build_router`] with an explicit cap on concurrent write requests.
///
/// One permit pool is shared by every write route.
pub fn build_router_with_write_limit(
    state: Arc<AppState>,
    cors_origins: &CorsOrigins,
    write_limit: usize,
) -> Router {
    let write_limit = GlobalConcurrencyLimitLayer::new(write_limit);
    let api = Router::new()
        .nest("/api/cms", routes::cms::router(&write_limit))
        .nest("/api/upload", routes::upload::router(&write_limit))
        .nest("/api/auth", routes::auth::router())
        .merge(routes::health::router())
        .layer(DefaultBodyLimit::max(body_limit(state.uploader.max_bytes())))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ));

    let uploads = ServeDir::new(state.uploader.root());

    Router::new()
        .merge(api)
        .nest_service("/uploads", uploads)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state)
}

fn cors_layer(origins: &CorsOrigins) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::CACHE_CONTROL]);

    let origins = match origins {
        CorsOrigins::Any => return layer.allow_origin(Any),
        CorsOrigins::List(origins) => origins,
    };

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}
