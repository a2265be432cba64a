use axum::{
    Json, debug_handler,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::info;

use crate::{
    AppError, AppResult,
    auth::Principal,
    db, follows,
    models::{NotificationKind, Post, PostView},
    notifications::{self, Event},
    posts,
    realtime::Hub,
};

const SNIPPET_CHARS: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub media_ids: Vec<String>,
}

/// Creates the post, claims its media and notifies the author's followers.
///
/// Each media id must belong to the author and not yet hang off a post;
/// otherwise nothing is written.
pub async fn create_post(
    db_pool: &SqlitePool,
    hub: &Hub,
    author_id: &str,
    new: NewPost,
) -> AppResult<PostView> {
    let content = new.content.trim().to_owned();
    if content.is_empty() && new.media_ids.is_empty() {
        return Err("post needs content or media".into());
    }

    let now = OffsetDateTime::now_utc();
    let post = Post {
        id: db::new_id(),
        user_id: author_id.to_owned(),
        content,
        likes_count: 0,
        comments_count: 0,
        retweets_count: 0,
        created_at: now,
        updated_at: now,
    };

    let mut tx = db_pool.begin().await?;
    sqlx::query("INSERT INTO posts (id,user_id,content,created_at,updated_at) values (?,?,?,?,?)")
        .bind(&post.id)
        .bind(&post.user_id)
        .bind(&post.content)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&mut *tx)
        .await?;

    for media_id in &new.media_ids {
        let claimed = sqlx::query(
            "UPDATE media SET post_id = ? WHERE id = ? AND owner_id = ? AND post_id IS NULL",
        )
        .bind(&post.id)
        .bind(media_id)
        .bind(author_id)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            return Err(AppError::BadRequest(format!(
                "media {media_id} is not available"
            )));
        }
    }
    tx.commit().await?;
    info!(post_id = %post.id, author_id, media = new.media_ids.len(), "created post");

    let snippet: String = post.content.chars().take(SNIPPET_CHARS).collect();
    let followers = follows::follower_ids(db_pool, author_id).await?;
    notifications::fan_out(
        db_pool,
        hub,
        followers.iter().map(String::as_str),
        Event::new(NotificationKind::NewPost, author_id)
            .post(&post.id)
            .content(&snippet),
    )
    .await?;

    posts::view(db_pool, post).await
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn create(
    State(db_pool): State<SqlitePool>,
    State(hub): State<Hub>,
    principal: Principal,

    Json(new): Json<NewPost>,
) -> AppResult<Response> {
    let view = create_post(&db_pool, &hub, &principal.user_id, new).await?;
    Ok((StatusCode::CREATED, Json(view)).into_response())
}
