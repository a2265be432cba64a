use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Deserialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::info;

use crate::{
    AppError, AppResult, AppState,
    auth::Principal,
    db,
    models::{Follow, NotificationKind, User, UserView},
    notifications::{self, Event},
    realtime::Hub,
    users,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create))
        .route("/{id}", get(by_id).delete(remove))
        .route("/user/{following_id}", delete(unfollow))
}

/// Returns the edge and whether this call created it.
pub async fn follow(
    db_pool: &SqlitePool,
    hub: &Hub,
    follower_id: &str,
    following_id: &str,
) -> AppResult<(Follow, bool)> {
    if follower_id == following_id {
        return Err("users cannot follow themselves".into());
    }
    users::find(db_pool, following_id).await?;

    let inserted = sqlx::query(
        "INSERT INTO follows (id,follower_id,following_id,created_at) values (?,?,?,?) \
         ON CONFLICT (follower_id, following_id) DO NOTHING",
    )
    .bind(db::new_id())
    .bind(follower_id)
    .bind(following_id)
    .bind(OffsetDateTime::now_utc())
    .execute(db_pool)
    .await?
    .rows_affected()
        == 1;

    let edge: Follow =
        sqlx::query_as("SELECT * FROM follows WHERE follower_id = ? AND following_id = ?")
            .bind(follower_id)
            .bind(following_id)
            .fetch_one(db_pool)
            .await?;

    if inserted {
        info!(follower_id, following_id, "followed");
        notifications::create(
            db_pool,
            hub,
            following_id,
            Event::new(NotificationKind::Follow, follower_id),
        )
        .await?;
    }

    Ok((edge, inserted))
}

/// Ids of everyone following `user_id`.
pub async fn follower_ids(db_pool: &SqlitePool, user_id: &str) -> AppResult<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT follower_id FROM follows WHERE following_id = ?")
        .bind(user_id)
        .fetch_all(db_pool)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FollowRequest {
    following_id: String,
}

#[debug_handler(state = AppState)]
async fn create(
    State(db_pool): State<SqlitePool>,
    State(hub): State<Hub>,
    principal: Principal,

    Json(FollowRequest { following_id }): Json<FollowRequest>,
) -> AppResult<Response> {
    let (edge, created) = follow(&db_pool, &hub, &principal.user_id, &following_id).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(edge)).into_response())
}

async fn find(db_pool: &SqlitePool, id: &str) -> AppResult<Follow> {
    sqlx::query_as("SELECT * FROM follows WHERE id = ?")
        .bind(id)
        .fetch_optional(db_pool)
        .await?
        .ok_or(AppError::NotFound("follow"))
}

#[debug_handler(state = AppState)]
async fn by_id(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Follow>> {
    Ok(Json(find(&db_pool, &id).await?))
}

#[debug_handler(state = AppState)]
async fn remove(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<StatusCode> {
    let edge = find(&db_pool, &id).await?;
    principal.ensure_is(&edge.follower_id)?;

    sqlx::query("DELETE FROM follows WHERE id = ?")
        .bind(&edge.id)
        .execute(&db_pool)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
async fn unfollow(
    Path(following_id): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<StatusCode> {
    let result = sqlx::query("DELETE FROM follows WHERE follower_id = ? AND following_id = ?")
        .bind(&principal.user_id)
        .bind(&following_id)
        .execute(&db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("follow"));
    }
    info!(follower_id = %principal.user_id, %following_id, "unfollowed");
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
pub(crate) async fn followers(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<UserView>>> {
    users::find(&db_pool, &id).await?;
    let users: Vec<User> = sqlx::query_as(
        "SELECT u.* FROM users u JOIN follows f ON f.follower_id = u.id \
         WHERE f.following_id = ? ORDER BY f.id DESC",
    )
    .bind(&id)
    .fetch_all(&db_pool)
    .await?;
    Ok(Json(users.into_iter().map(UserView::from).collect()))
}

#[debug_handler(state = AppState)]
pub(crate) async fn following(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<UserView>>> {
    users::find(&db_pool, &id).await?;
    let users: Vec<User> = sqlx::query_as(
        "SELECT u.* FROM users u JOIN follows f ON f.following_id = u.id \
         WHERE f.follower_id = ? ORDER BY f.id DESC",
    )
    .bind(&id)
    .fetch_all(&db_pool)
    .await?;
    Ok(Json(users.into_iter().map(UserView::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::NewUser;

    async fn user(db_pool: &SqlitePool, name: &str) -> String {
        users::create(
            db_pool,
            NewUser {
                username: name.into(),
                email: format!("{name}@example.org"),
                bio: String::new(),
            },
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn following_twice_keeps_one_edge_and_one_notification() {
        let db_pool = db::memory().await.unwrap();
        let hub = Hub::new();
        let alice = user(&db_pool, "alice").await;
        let bob = user(&db_pool, "bob").await;

        let (first, created) = follow(&db_pool, &hub, &alice, &bob).await.unwrap();
        assert!(created);
        let (second, created) = follow(&db_pool, &hub, &alice, &bob).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        let (notes,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND kind = 'FOLLOW'")
                .bind(&bob)
                .fetch_one(&db_pool)
                .await
                .unwrap();
        assert_eq!(notes, 1);
        assert_eq!(follower_ids(&db_pool, &bob).await.unwrap(), vec![alice]);
    }

    #[tokio::test]
    async fn self_and_unknown_targets_are_rejected() {
        let db_pool = db::memory().await.unwrap();
        let hub = Hub::new();
        let alice = user(&db_pool, "alice").await;

        assert!(matches!(
            follow(&db_pool, &hub, &alice, &alice).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            follow(&db_pool, &hub, &alice, "ghost").await,
            Err(AppError::NotFound(_))
        ));
    }
}
