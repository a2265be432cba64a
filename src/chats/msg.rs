use axum::{
    Json, debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::debug;

use crate::{
    AppError, AppResult,
    auth::Principal,
    chats::chat,
    db,
    models::{Message, MessageKind, Page, PageQuery},
    realtime::{Hub, MESSAGES_QUEUE},
};

const DEFAULT_PAGE_SIZE: u32 = 50;

const SELECT: &str = "SELECT m.*, u.username AS sender_username FROM messages m \
                      LEFT JOIN users u ON u.id = m.sender_id";

#[derive(Debug, Deserialize)]
pub(crate) struct SendMessageQuery {
    pub(crate) content: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl SendMessageQuery {
    /// Absent or blank means `TEXT`; anything unknown is a 400.
    pub(crate) fn kind(&self) -> AppResult<MessageKind> {
        match self.kind.as_deref().map(str::trim) {
            None | Some("") => Ok(MessageKind::default()),
            Some(raw) => serde_json::from_value(Value::String(raw.to_uppercase()))
                .map_err(|_| AppError::BadRequest(format!("unknown message type {raw:?}"))),
        }
    }
}

pub async fn find(db_pool: &SqlitePool, id: &str) -> AppResult<Message> {
    sqlx::query_as(&format!("{SELECT} WHERE m.id = ?"))
        .bind(id)
        .fetch_optional(db_pool)
        .await?
        .ok_or(AppError::NotFound("message"))
}

/// Persists the message as unread, moves the chat's last-message pointer and
/// pushes the message to the other participant's live sessions.
pub async fn send_message(
    db_pool: &SqlitePool,
    hub: &Hub,
    chat_id: &str,
    sender_id: &str,
    content: &str,
    kind: MessageKind,
) -> AppResult<Message> {
    let content = content.trim();
    if content.is_empty() {
        return Err("message content is required".into());
    }
    let chat = chat::load_for(db_pool, chat_id, sender_id).await?;

    let id = db::new_id();
    let now = OffsetDateTime::now_utc();

    let mut tx = db_pool.begin().await?;
    sqlx::query(
        "INSERT INTO messages (id,chat_id,sender_id,content,kind,read,edited,sent_at) values (?,?,?,?,?,0,0,?)",
    )
    .bind(&id)
    .bind(&chat.id)
    .bind(sender_id)
    .bind(content)
    .bind(kind)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "UPDATE chats SET last_message_id = ?, last_message_time = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&id)
    .bind(now)
    .bind(now)
    .bind(&chat.id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let message = find(db_pool, &id).await?;
    let recipient = chat.other_participant(sender_id);
    let sessions = hub.publish_json(recipient, MESSAGES_QUEUE, &message);
    debug!(chat_id = %chat.id, message_id = %id, recipient, sessions, "sent message");

    Ok(message)
}

/// Marks everything the other side sent as read. Returns how many changed.
pub async fn mark_read(db_pool: &SqlitePool, chat_id: &str, reader_id: &str) -> AppResult<u64> {
    let chat = chat::load_for(db_pool, chat_id, reader_id).await?;
    let result = sqlx::query(
        "UPDATE messages SET read = 1 WHERE chat_id = ? AND sender_id <> ? AND read = 0",
    )
    .bind(&chat.id)
    .bind(reader_id)
    .execute(db_pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn edit_message(
    db_pool: &SqlitePool,
    message_id: &str,
    editor_id: &str,
    content: &str,
) -> AppResult<Message> {
    let message = find(db_pool, message_id).await?;
    if message.sender_id != editor_id {
        return Err(AppError::Forbidden("only the sender can edit a message".to_owned()));
    }
    let content = content.trim();
    if content.is_empty() {
        return Err("message content is required".into());
    }

    sqlx::query("UPDATE messages SET content = ?, edited = 1, edited_at = ? WHERE id = ?")
        .bind(content)
        .bind(OffsetDateTime::now_utc())
        .bind(&message.id)
        .execute(db_pool)
        .await?;
    find(db_pool, &message.id).await
}

/// Deletes the message and points the chat at the newest one left.
pub async fn delete_message(db_pool: &SqlitePool, message_id: &str, sender_id: &str) -> AppResult<()> {
    let message = find(db_pool, message_id).await?;
    if message.sender_id != sender_id {
        return Err(AppError::Forbidden("only the sender can delete a message".to_owned()));
    }

    let mut tx = db_pool.begin().await?;
    sqlx::query("DELETE FROM messages WHERE id = ?")
        .bind(&message.id)
        .execute(&mut *tx)
        .await?;

    let newest: Option<(String, OffsetDateTime)> = sqlx::query_as(
        "SELECT id, sent_at FROM messages WHERE chat_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(&message.chat_id)
    .fetch_optional(&mut *tx)
    .await?;
    let (last_id, last_time) = newest.unzip();

    sqlx::query(
        "UPDATE chats SET last_message_id = ?, last_message_time = ?, updated_at = ? WHERE id = ?",
    )
    .bind(last_id)
    .bind(last_time)
    .bind(OffsetDateTime::now_utc())
    .bind(&message.chat_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(())
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn messages(
    Path(chat_id): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Page<Message>>> {
    let chat = chat::load_for(&db_pool, &chat_id, &principal.user_id).await?;
    let (page, size, offset) = query.resolve(DEFAULT_PAGE_SIZE);

    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE chat_id = ?")
        .bind(&chat.id)
        .fetch_one(&db_pool)
        .await?;

    let content = sqlx::query_as(&format!(
        "{SELECT} WHERE m.chat_id = ? ORDER BY m.id DESC LIMIT ? OFFSET ?"
    ))
    .bind(&chat.id)
    .bind(i64::from(size))
    .bind(offset)
    .fetch_all(&db_pool)
    .await?;

    Ok(Json(Page::new(content, page, size, total)))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn send(
    Path(chat_id): Path<String>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<Hub>,
    principal: Principal,

    Json(query): Json<SendMessageQuery>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let kind = query.kind()?;
    let message =
        send_message(&db_pool, &hub, &chat_id, &principal.user_id, &query.content, kind).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn read(
    Path(chat_id): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<Json<Value>> {
    let updated = mark_read(&db_pool, &chat_id, &principal.user_id).await?;
    Ok(Json(json!({ "updated": updated })))
}

#[derive(Debug, Deserialize)]
pub(crate) struct EditMessage {
    content: String,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn edit(
    Path(message_id): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,

    Json(EditMessage { content }): Json<EditMessage>,
) -> AppResult<Json<Message>> {
    Ok(Json(
        edit_message(&db_pool, &message_id, &principal.user_id, &content).await?,
    ))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn delete(
    Path(message_id): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<StatusCode> {
    delete_message(&db_pool, &message_id, &principal.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
