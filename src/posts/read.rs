use axum::{
    Json, debug_handler,
    extract::{Path, Query, State},
};
use sqlx::SqlitePool;

use crate::{
    AppResult,
    auth::Principal,
    models::{Page, PageQuery, Post, PostView},
    posts, users,
};

const FEED_PAGE_SIZE: u32 = 20;

#[debug_handler(state = crate::AppState)]
pub(crate) async fn list(State(db_pool): State<SqlitePool>) -> AppResult<Json<Vec<PostView>>> {
    let all: Vec<Post> = sqlx::query_as("SELECT * FROM posts ORDER BY id DESC")
        .fetch_all(&db_pool)
        .await?;
    Ok(Json(posts::views(&db_pool, all).await?))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn by_id(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<PostView>> {
    let post = posts::find(&db_pool, &id).await?;
    Ok(Json(posts::view(&db_pool, post).await?))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn by_user(
    Path(user_id): Path<String>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<PostView>>> {
    users::find(&db_pool, &user_id).await?;
    let theirs: Vec<Post> = sqlx::query_as("SELECT * FROM posts WHERE user_id = ? ORDER BY id DESC")
        .bind(&user_id)
        .fetch_all(&db_pool)
        .await?;
    Ok(Json(posts::views(&db_pool, theirs).await?))
}

/// Own posts plus posts of everyone followed, newest first.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn feed(
    State(db_pool): State<SqlitePool>,
    principal: Principal,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Page<PostView>>> {
    let (page, size, offset) = query.resolve(FEED_PAGE_SIZE);
    let me = principal.user_id.as_str();

    let (total,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM posts WHERE user_id = ? \
         OR user_id IN (SELECT following_id FROM follows WHERE follower_id = ?)",
    )
    .bind(me)
    .bind(me)
    .fetch_one(&db_pool)
    .await?;

    let page_posts: Vec<Post> = sqlx::query_as(
        "SELECT * FROM posts WHERE user_id = ? \
         OR user_id IN (SELECT following_id FROM follows WHERE follower_id = ?) \
         ORDER BY id DESC LIMIT ? OFFSET ?",
    )
    .bind(me)
    .bind(me)
    .bind(i64::from(size))
    .bind(offset)
    .fetch_all(&db_pool)
    .await?;

    let content = posts::views(&db_pool, page_posts).await?;
    Ok(Json(Page::new(content, page, size, total)))
}
