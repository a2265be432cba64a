pub mod notify;

pub use notify::{Event, create, fan_out};

use axum::{
    Json, Router, debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, put},
};
use serde_json::{Value, json};
use sqlx::SqlitePool;

use crate::{
    AppError, AppResult, AppState,
    auth::Principal,
    models::{Notification, Page, PageQuery},
};

const DEFAULT_PAGE_SIZE: u32 = 10;

const SELECT: &str = "SELECT n.*, u.username AS source_username FROM notifications n \
                      LEFT JOIN users u ON u.id = n.source_user_id";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        .route("/paginated", get(paginated))
        .route("/unread/count", get(unread_count))
        .route("/read-all", put(read_all))
        .route("/{id}/read", put(read_one))
        .route("/{id}", delete(remove))
}

#[debug_handler(state = AppState)]
async fn list(
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<Json<Vec<Notification>>> {
    let notifications = sqlx::query_as(&format!("{SELECT} WHERE n.user_id = ? ORDER BY n.id DESC"))
        .bind(&principal.user_id)
        .fetch_all(&db_pool)
        .await?;
    Ok(Json(notifications))
}

#[debug_handler(state = AppState)]
async fn paginated(
    State(db_pool): State<SqlitePool>,
    principal: Principal,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Page<Notification>>> {
    let (page, size, offset) = query.resolve(DEFAULT_PAGE_SIZE);

    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE user_id = ?")
        .bind(&principal.user_id)
        .fetch_one(&db_pool)
        .await?;

    let content = sqlx::query_as(&format!(
        "{SELECT} WHERE n.user_id = ? ORDER BY n.id DESC LIMIT ? OFFSET ?"
    ))
    .bind(&principal.user_id)
    .bind(i64::from(size))
    .bind(offset)
    .fetch_all(&db_pool)
    .await?;

    Ok(Json(Page::new(content, page, size, total)))
}

#[debug_handler(state = AppState)]
async fn unread_count(
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<Json<i64>> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND read = 0")
            .bind(&principal.user_id)
            .fetch_one(&db_pool)
            .await?;
    Ok(Json(count))
}

async fn owned(db_pool: &SqlitePool, id: &str, principal: &Principal) -> AppResult<()> {
    let (user_id,): (String,) = sqlx::query_as("SELECT user_id FROM notifications WHERE id = ?")
        .bind(id)
        .fetch_optional(db_pool)
        .await?
        .ok_or(AppError::NotFound("notification"))?;
    principal.ensure_is(&user_id)
}

#[debug_handler(state = AppState)]
async fn read_one(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<Json<Notification>> {
    owned(&db_pool, &id, &principal).await?;

    sqlx::query("UPDATE notifications SET read = 1 WHERE id = ?")
        .bind(&id)
        .execute(&db_pool)
        .await?;

    let notification = sqlx::query_as(&format!("{SELECT} WHERE n.id = ?"))
        .bind(&id)
        .fetch_one(&db_pool)
        .await?;
    Ok(Json(notification))
}

#[debug_handler(state = AppState)]
async fn read_all(
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<Json<Value>> {
    let result = sqlx::query("UPDATE notifications SET read = 1 WHERE user_id = ? AND read = 0")
        .bind(&principal.user_id)
        .execute(&db_pool)
        .await?;
    Ok(Json(json!({ "updated": result.rows_affected() })))
}

#[debug_handler(state = AppState)]
async fn remove(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<StatusCode> {
    owned(&db_pool, &id, &principal).await?;

    sqlx::query("DELETE FROM notifications WHERE id = ?")
        .bind(&id)
        .execute(&db_pool)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
