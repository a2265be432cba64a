use axum::{
    Json, debug_handler,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::info;

use crate::{
    AppResult,
    auth::Principal,
    media::{self, BlobStore},
    models::PostView,
    posts,
};

#[derive(Debug, Deserialize)]
pub(crate) struct EditPost {
    content: String,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn update(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,

    Json(EditPost { content }): Json<EditPost>,
) -> AppResult<Json<PostView>> {
    let post = posts::find(&db_pool, &id).await?;
    principal.ensure_is(&post.user_id)?;

    let content = content.trim();
    if content.is_empty() {
        return Err("content is required".into());
    }

    sqlx::query("UPDATE posts SET content = ?, updated_at = ? WHERE id = ?")
        .bind(content)
        .bind(OffsetDateTime::now_utc())
        .bind(&post.id)
        .execute(&db_pool)
        .await?;

    let post = posts::find(&db_pool, &post.id).await?;
    Ok(Json(posts::view(&db_pool, post).await?))
}

/// Comments, reactions and media rows go with the post; blobs are removed
/// afterwards.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn delete(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
    State(blobs): State<BlobStore>,
    principal: Principal,
) -> AppResult<StatusCode> {
    let post = posts::find(&db_pool, &id).await?;
    principal.ensure_is(&post.user_id)?;

    let attached: Vec<(String,)> = sqlx::query_as("SELECT id FROM media WHERE post_id = ?")
        .bind(&post.id)
        .fetch_all(&db_pool)
        .await?;

    sqlx::query("DELETE FROM posts WHERE id = ?")
        .bind(&post.id)
        .execute(&db_pool)
        .await?;

    let attached: Vec<String> = attached.into_iter().map(|(id,)| id).collect();
    media::purge_blobs(&blobs, &attached).await;
    info!(post_id = %post.id, media = attached.len(), "deleted post");

    Ok(StatusCode::NO_CONTENT)
}
