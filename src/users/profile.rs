use axum::{
    Json, debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::info;

use crate::{
    AppError, AppResult,
    auth::Principal,
    media::{self, BlobStore},
    models::{User, UserView},
    users::{self, UpdateUser},
};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn list(State(db_pool): State<SqlitePool>) -> AppResult<Json<Vec<UserView>>> {
    let users: Vec<User> = sqlx::query_as("SELECT * FROM users ORDER BY username")
        .fetch_all(&db_pool)
        .await?;
    Ok(Json(users.into_iter().map(UserView::from).collect()))
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn search(
    State(db_pool): State<SqlitePool>,
    Query(SearchQuery { q }): Query<SearchQuery>,
) -> AppResult<Json<Vec<UserView>>> {
    let q = q.trim();
    if q.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let pattern = format!("%{}%", escape_like(&q.to_lowercase()));
    let users: Vec<User> = sqlx::query_as(
        "SELECT * FROM users WHERE lower(username) LIKE ? ESCAPE '\\' OR lower(email) LIKE ? ESCAPE '\\' \
         ORDER BY username LIMIT 50",
    )
    .bind(&pattern)
    .bind(&pattern)
    .fetch_all(&db_pool)
    .await?;

    Ok(Json(users.into_iter().map(UserView::from).collect()))
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn by_id(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<UserView>> {
    Ok(Json(users::find(&db_pool, &id).await?.into()))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn by_username(
    Path(username): Path<String>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<UserView>> {
    Ok(Json(users::find_by_username(&db_pool, &username).await?.into()))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn by_email(
    Path(email): Path<String>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<UserView>> {
    let user: User = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(email.trim().to_lowercase())
        .fetch_optional(&db_pool)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    Ok(Json(user.into()))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn update(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,

    Json(patch): Json<UpdateUser>,
) -> AppResult<Json<UserView>> {
    principal.ensure_is(&id)?;
    let user = users::update(&db_pool, &id, patch).await?;
    Ok(Json(user.into()))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn delete(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
    State(blobs): State<BlobStore>,
    principal: Principal,
) -> AppResult<StatusCode> {
    principal.ensure_is(&id)?;

    let owned: Vec<(String,)> = sqlx::query_as("SELECT id FROM media WHERE owner_id = ?")
        .bind(&id)
        .fetch_all(&db_pool)
        .await?;

    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&id)
        .execute(&db_pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("user"));
    }

    let owned: Vec<String> = owned.into_iter().map(|(id,)| id).collect();
    media::purge_blobs(&blobs, &owned).await;
    info!(user_id = %id, blobs = owned.len(), "deleted user");

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards_are_literal() {
        assert_eq!(escape_like("a_b%c\\"), "a\\_b\\%c\\\\");
    }
}
