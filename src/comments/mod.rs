use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use sqlx::{FromRow, SqlitePool};
use time::OffsetDateTime;
use tracing::info;

use crate::{
    AppError, AppResult, AppState,
    auth::Principal,
    db, follows,
    models::{CommentView, NotificationKind, picture_url},
    notifications::{self, Event},
    posts,
    realtime::Hub,
};

/// `/posts/{id}/comments` is mounted by the posts router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(by_id).patch(update).delete(remove))
        .route("/user/{user_id}", get(by_user))
}

const SELECT: &str = "SELECT c.id, c.post_id, c.user_id, c.content, c.created_at, \
                      u.username, u.profile_picture_id \
                      FROM comments c LEFT JOIN users u ON u.id = c.user_id";

#[derive(Debug, FromRow)]
struct CommentRow {
    id: String,
    post_id: String,
    user_id: String,
    content: String,
    created_at: OffsetDateTime,
    username: Option<String>,
    profile_picture_id: Option<String>,
}

impl From<CommentRow> for CommentView {
    fn from(row: CommentRow) -> Self {
        Self {
            profile_picture_url: picture_url(&row.user_id, row.profile_picture_id.as_deref()),
            username: row.username.unwrap_or_else(|| "Unknown".to_owned()),
            id: row.id,
            post_id: row.post_id,
            user_id: row.user_id,
            content: row.content,
            created_at: row.created_at,
        }
    }
}

pub async fn find(db_pool: &SqlitePool, id: &str) -> AppResult<CommentView> {
    let row: CommentRow = sqlx::query_as(&format!("{SELECT} WHERE c.id = ?"))
        .bind(id)
        .fetch_optional(db_pool)
        .await?
        .ok_or(AppError::NotFound("comment"))?;
    Ok(row.into())
}

fn required(content: &str) -> AppResult<&str> {
    let content = content.trim();
    if content.is_empty() {
        return Err("content is required".into());
    }
    Ok(content)
}

/// Adds the comment, bumps the post's counter and notifies.
///
/// The post author gets `COMMENT`. The commenter's followers get
/// `FRIEND_COMMENT`, except the post author, who already heard.
pub async fn add_comment(
    db_pool: &SqlitePool,
    hub: &Hub,
    author_id: &str,
    post_id: &str,
    content: &str,
) -> AppResult<CommentView> {
    let content = required(content)?;
    let post = posts::find(db_pool, post_id).await?;
    let id = db::new_id();

    let mut tx = db_pool.begin().await?;
    sqlx::query("INSERT INTO comments (id,post_id,user_id,content,created_at) values (?,?,?,?,?)")
        .bind(&id)
        .bind(&post.id)
        .bind(author_id)
        .bind(content)
        .bind(OffsetDateTime::now_utc())
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE posts SET comments_count = comments_count + 1 WHERE id = ?")
        .bind(&post.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    info!(comment_id = %id, post_id = %post.id, author_id, "added comment");

    notifications::create(
        db_pool,
        hub,
        &post.user_id,
        Event::new(NotificationKind::Comment, author_id)
            .post(&post.id)
            .comment(&id)
            .content(content),
    )
    .await?;

    let followers = follows::follower_ids(db_pool, author_id).await?;
    notifications::fan_out(
        db_pool,
        hub,
        followers
            .iter()
            .map(String::as_str)
            .filter(|f| *f != post.user_id),
        Event::new(NotificationKind::FriendComment, author_id)
            .post(&post.id)
            .comment(&id)
            .content(content),
    )
    .await?;

    find(db_pool, &id).await
}

#[debug_handler(state = AppState)]
pub(crate) async fn for_post(
    Path(post_id): Path<String>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<CommentView>>> {
    posts::find(&db_pool, &post_id).await?;
    let rows: Vec<CommentRow> = sqlx::query_as(&format!("{SELECT} WHERE c.post_id = ? ORDER BY c.id"))
        .bind(&post_id)
        .fetch_all(&db_pool)
        .await?;
    Ok(Json(rows.into_iter().map(CommentView::from).collect()))
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentBody {
    content: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn create(
    Path(post_id): Path<String>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<Hub>,
    principal: Principal,

    Json(CommentBody { content }): Json<CommentBody>,
) -> AppResult<Response> {
    let comment = add_comment(&db_pool, &hub, &principal.user_id, &post_id, &content).await?;
    Ok((StatusCode::CREATED, Json(comment)).into_response())
}

#[debug_handler(state = AppState)]
async fn by_id(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<CommentView>> {
    Ok(Json(find(&db_pool, &id).await?))
}

#[debug_handler(state = AppState)]
async fn by_user(
    Path(user_id): Path<String>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<CommentView>>> {
    let rows: Vec<CommentRow> =
        sqlx::query_as(&format!("{SELECT} WHERE c.user_id = ? ORDER BY c.id DESC"))
            .bind(&user_id)
            .fetch_all(&db_pool)
            .await?;
    Ok(Json(rows.into_iter().map(CommentView::from).collect()))
}

#[debug_handler(state = AppState)]
async fn update(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,

    Json(CommentBody { content }): Json<CommentBody>,
) -> AppResult<Json<CommentView>> {
    let comment = find(&db_pool, &id).await?;
    principal.ensure_is(&comment.user_id)?;
    let content = required(&content)?;

    sqlx::query("UPDATE comments SET content = ? WHERE id = ?")
        .bind(content)
        .bind(&comment.id)
        .execute(&db_pool)
        .await?;
    Ok(Json(find(&db_pool, &comment.id).await?))
}

#[debug_handler(state = AppState)]
async fn remove(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<StatusCode> {
    let comment = find(&db_pool, &id).await?;
    principal.ensure_is(&comment.user_id)?;

    let mut tx = db_pool.begin().await?;
    sqlx::query("DELETE FROM comments WHERE id = ?")
        .bind(&comment.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE posts SET comments_count = MAX(comments_count - 1, 0) WHERE id = ?")
        .bind(&comment.post_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}
