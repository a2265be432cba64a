mod create;
mod edit;
mod reactions;
mod read;

pub use create::{NewPost, create_post};
pub use reactions::{ReactionKind, react, unreact};

use std::collections::HashMap;

use axum::{
    Router,
    routing::{get, post},
};
use sqlx::SqlitePool;

use crate::{
    AppError, AppResult, AppState, comments, media,
    models::{MediaView, Post, PostView},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(read::list).post(create::create))
        .route("/feed", get(read::feed))
        .route("/user/{user_id}", get(read::by_user))
        .route(
            "/{id}",
            get(read::by_id).patch(edit::update).delete(edit::delete),
        )
        .route("/{id}/like", post(reactions::like).delete(reactions::unlike))
        .route("/{id}/likes", get(reactions::likes))
        .route(
            "/{id}/repost",
            post(reactions::repost).delete(reactions::unrepost),
        )
        .route(
            "/{id}/bookmark",
            post(reactions::bookmark).delete(reactions::unbookmark),
        )
        .route(
            "/{id}/comments",
            get(comments::for_post).post(comments::create),
        )
}

/// `GET /bookmarks`, mounted at the root.
pub fn bookmarks_router() -> Router<AppState> {
    Router::new().route("/", get(reactions::bookmarks))
}

pub async fn find(db_pool: &SqlitePool, id: &str) -> AppResult<Post> {
    sqlx::query_as("SELECT * FROM posts WHERE id = ?")
        .bind(id)
        .fetch_optional(db_pool)
        .await?
        .ok_or(AppError::NotFound("post"))
}

/// Attaches media to each post, keeping the order of `posts`.
pub async fn views(db_pool: &SqlitePool, posts: Vec<Post>) -> AppResult<Vec<PostView>> {
    let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
    let mut by_post: HashMap<String, Vec<MediaView>> = HashMap::new();
    for m in media::for_posts(db_pool, &ids).await? {
        if let Some(post_id) = m.post_id.clone() {
            by_post.entry(post_id).or_default().push(m.into());
        }
    }

    Ok(posts
        .into_iter()
        .map(|post| PostView {
            media: by_post.remove(&post.id).unwrap_or_default(),
            post,
        })
        .collect())
}

pub async fn view(db_pool: &SqlitePool, post: Post) -> AppResult<PostView> {
    let mut views = views(db_pool, vec![post]).await?;
    views.pop().ok_or(AppError::NotFound("post"))
}
