pub mod appresult;
pub mod auth;
pub mod chats;
pub mod comments;
pub mod config;
pub mod db;
pub mod follows;
pub mod media;
pub mod models;
pub mod notifications;
pub mod posts;
pub mod realtime;
pub mod users;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, FromRef},
    http::{HeaderValue, Method, header},
    routing::get,
};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

pub use appresult::{AppError, AppResult};

use crate::{auth::TokenKeys, config::Config, media::BlobStore, realtime::Hub};

/// Multipart framing on top of the file itself.
const UPLOAD_OVERHEAD: usize = 64 * 1024;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub keys: TokenKeys,
    pub hub: Hub,
    pub blobs: BlobStore,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, blobs: BlobStore, config: Config) -> Self {
        Self {
            db_pool,
            keys: TokenKeys::new(&config.token_secret, config.token_ttl_secs),
            hub: Hub::new(),
            blobs,
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes + UPLOAD_OVERHEAD;

    Router::new()
        .route("/health", get(health))
        .nest("/users", users::router(state.config.dev_tokens))
        .nest("/follows", follows::router())
        .nest("/posts", posts::router())
        .nest("/bookmarks", posts::bookmarks_router())
        .nest("/comments", comments::router())
        .nest("/media", media::router())
        .nest("/notifications", notifications::router())
        .nest("/api/chat", chats::router())
        .route("/ws", get(chats::chat_ws))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors(&state.config.cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors(origin: &str) -> CorsLayer {
    if origin == "*" {
        return CorsLayer::permissive();
    }

    let allow_origin = match HeaderValue::from_str(origin) {
        Ok(origin) => AllowOrigin::exact(origin),
        Err(e) => {
            warn!(origin, error = %e, "invalid CORS origin, allowing any");
            AllowOrigin::any()
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
