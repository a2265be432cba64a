use axum::{
    Json, debug_handler,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

use crate::{AppResult, auth::TokenKeys, models::UserView, users};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn register(
    State(db_pool): State<SqlitePool>,

    Json(new): Json<users::NewUser>,
) -> AppResult<Response> {
    let user = users::create(&db_pool, new).await?;
    info!(user_id = %user.id, username = %user.username, "registered user");

    Ok((StatusCode::CREATED, Json(UserView::from(user))).into_response())
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenRequest {
    username: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: String,
    token_type: &'static str,
    user: UserView,
}

/// Issues a bearer token for an existing user without any credential check.
/// Only mounted when dev tokens are enabled.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn dev_token(
    State(db_pool): State<SqlitePool>,
    State(keys): State<TokenKeys>,

    Json(TokenRequest { username }): Json<TokenRequest>,
) -> AppResult<Response> {
    let user = users::find_by_username(&db_pool, username.trim()).await?;
    let token = keys.issue(&user.id, &user.username)?;

    Ok(Json(TokenResponse {
        token,
        token_type: "Bearer",
        user: user.into(),
    })
    .into_response())
}
