//! Likes, reposts and bookmarks: one row per (user, post), with the post's
//! counter moved in the same transaction as the row.

use axum::{
    Json, debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::debug;

use crate::{
    AppError, AppResult,
    auth::Principal,
    db,
    models::{NotificationKind, Post, PostView, Reaction},
    notifications::{self, Event},
    posts,
    realtime::Hub,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    Like,
    Repost,
    Bookmark,
}

impl ReactionKind {
    fn table(self) -> &'static str {
        match self {
            ReactionKind::Like => "likes",
            ReactionKind::Repost => "reposts",
            ReactionKind::Bookmark => "bookmarks",
        }
    }

    fn counter(self) -> Option<&'static str> {
        match self {
            ReactionKind::Like => Some("likes_count"),
            ReactionKind::Repost => Some("retweets_count"),
            ReactionKind::Bookmark => None,
        }
    }
}

/// Returns the row and whether this call inserted it.
pub async fn react(
    db_pool: &SqlitePool,
    kind: ReactionKind,
    user_id: &str,
    post_id: &str,
) -> AppResult<(Reaction, bool)> {
    posts::find(db_pool, post_id).await?;
    let table = kind.table();

    let mut tx = db_pool.begin().await?;
    let inserted = sqlx::query(&format!(
        "INSERT INTO {table} (id,user_id,post_id,created_at) values (?,?,?,?) \
         ON CONFLICT (user_id, post_id) DO NOTHING"
    ))
    .bind(db::new_id())
    .bind(user_id)
    .bind(post_id)
    .bind(OffsetDateTime::now_utc())
    .execute(&mut *tx)
    .await?
    .rows_affected()
        == 1;

    if let (true, Some(counter)) = (inserted, kind.counter()) {
        sqlx::query(&format!("UPDATE posts SET {counter} = {counter} + 1 WHERE id = ?"))
            .bind(post_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    let row = sqlx::query_as(&format!(
        "SELECT * FROM {table} WHERE user_id = ? AND post_id = ?"
    ))
    .bind(user_id)
    .bind(post_id)
    .fetch_one(db_pool)
    .await?;

    debug!(table, user_id, post_id, inserted, "reacted");
    Ok((row, inserted))
}

/// Fails with 404 when there was nothing to undo.
pub async fn unreact(
    db_pool: &SqlitePool,
    kind: ReactionKind,
    user_id: &str,
    post_id: &str,
) -> AppResult<()> {
    let table = kind.table();

    let mut tx = db_pool.begin().await?;
    let deleted = sqlx::query(&format!(
        "DELETE FROM {table} WHERE user_id = ? AND post_id = ?"
    ))
    .bind(user_id)
    .bind(post_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if deleted == 0 {
        return Err(AppError::NotFound(match kind {
            ReactionKind::Like => "like",
            ReactionKind::Repost => "repost",
            ReactionKind::Bookmark => "bookmark",
        }));
    }

    if let Some(counter) = kind.counter() {
        sqlx::query(&format!(
            "UPDATE posts SET {counter} = MAX({counter} - 1, 0) WHERE id = ?"
        ))
        .bind(post_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    debug!(table, user_id, post_id, "unreacted");
    Ok(())
}

fn created_or_ok((row, inserted): (Reaction, bool)) -> Response {
    let status = if inserted { StatusCode::CREATED } else { StatusCode::OK };
    (status, Json(row)).into_response()
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn like(
    Path(post_id): Path<String>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<Hub>,
    principal: Principal,
) -> AppResult<Response> {
    let (row, inserted) = react(&db_pool, ReactionKind::Like, &principal.user_id, &post_id).await?;

    if inserted {
        let post = posts::find(&db_pool, &post_id).await?;
        notifications::create(
            &db_pool,
            &hub,
            &post.user_id,
            Event::new(NotificationKind::Like, &principal.user_id).post(&post.id),
        )
        .await?;
    }

    Ok(created_or_ok((row, inserted)))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn unlike(
    Path(post_id): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<StatusCode> {
    unreact(&db_pool, ReactionKind::Like, &principal.user_id, &post_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn likes(
    Path(post_id): Path<String>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<Reaction>>> {
    posts::find(&db_pool, &post_id).await?;
    let rows = sqlx::query_as("SELECT * FROM likes WHERE post_id = ? ORDER BY id DESC")
        .bind(&post_id)
        .fetch_all(&db_pool)
        .await?;
    Ok(Json(rows))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn repost(
    Path(post_id): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<Response> {
    let reacted = react(&db_pool, ReactionKind::Repost, &principal.user_id, &post_id).await?;
    Ok(created_or_ok(reacted))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn unrepost(
    Path(post_id): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<StatusCode> {
    unreact(&db_pool, ReactionKind::Repost, &principal.user_id, &post_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn bookmark(
    Path(post_id): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<Response> {
    let reacted = react(&db_pool, ReactionKind::Bookmark, &principal.user_id, &post_id).await?;
    Ok(created_or_ok(reacted))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn unbookmark(
    Path(post_id): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<StatusCode> {
    unreact(&db_pool, ReactionKind::Bookmark, &principal.user_id, &post_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The principal's bookmarked posts, most recently bookmarked first.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn bookmarks(
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<Json<Vec<PostView>>> {
    let saved: Vec<Post> = sqlx::query_as(
        "SELECT p.* FROM posts p JOIN bookmarks b ON b.post_id = p.id \
         WHERE b.user_id = ? ORDER BY b.id DESC",
    )
    .bind(&principal.user_id)
    .fetch_all(&db_pool)
    .await?;
    Ok(Json(posts::views(&db_pool, saved).await?))
}
