use axum::{
    Json, debug_handler,
    extract::{Path, State},
};
use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::info;

use crate::{
    AppError, AppResult,
    auth::Principal,
    chats::msg,
    db,
    models::{Chat, ChatView, Message, User},
    users,
};

/// The other side of a chat as listed to a participant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtherUser {
    pub id: String,
    pub username: String,
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub other_user: OtherUser,
    pub last_message: Option<Message>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_message_time: Option<OffsetDateTime>,
    pub unread_count: i64,
}

/// The one chat between two users, created on first use.
///
/// Participants are stored sorted so both orders hit the same unique row;
/// concurrent callers converge on it.
pub async fn create_or_get(db_pool: &SqlitePool, me: &str, other: &str) -> AppResult<Chat> {
    if me == other {
        return Err("cannot chat with yourself".into());
    }
    let (a, b) = if me < other { (me, other) } else { (other, me) };
    let now = OffsetDateTime::now_utc();

    let created = sqlx::query(
        "INSERT INTO chats (id,participant_a,participant_b,created_at,updated_at) values (?,?,?,?,?) \
         ON CONFLICT (participant_a, participant_b) DO NOTHING",
    )
    .bind(db::new_id())
    .bind(a)
    .bind(b)
    .bind(now)
    .bind(now)
    .execute(db_pool)
    .await?
    .rows_affected();

    let chat: Chat =
        sqlx::query_as("SELECT * FROM chats WHERE participant_a = ? AND participant_b = ?")
            .bind(a)
            .bind(b)
            .fetch_one(db_pool)
            .await?;

    if created == 1 {
        info!(chat_id = %chat.id, a, b, "opened chat");
    }
    Ok(chat)
}

/// Loads a chat for one of its participants: 404 when missing, 403 for
/// anyone else.
pub async fn load_for(db_pool: &SqlitePool, chat_id: &str, user_id: &str) -> AppResult<Chat> {
    let chat: Chat = sqlx::query_as("SELECT * FROM chats WHERE id = ?")
        .bind(chat_id)
        .fetch_optional(db_pool)
        .await?
        .ok_or(AppError::NotFound("chat"))?;

    if !chat.has_participant(user_id) {
        return Err(AppError::Forbidden("not a participant of this chat".to_owned()));
    }
    Ok(chat)
}

/// Most recent activity first. Message and chat ids are UUIDv7, so id order
/// is time order even within one second.
pub async fn summaries(db_pool: &SqlitePool, user_id: &str) -> AppResult<Vec<ChatSummary>> {
    let chats: Vec<Chat> = sqlx::query_as(
        "SELECT * FROM chats WHERE participant_a = ? OR participant_b = ? \
         ORDER BY COALESCE(last_message_id, id) DESC",
    )
    .bind(user_id)
    .bind(user_id)
    .fetch_all(db_pool)
    .await?;

    let mut out = Vec::with_capacity(chats.len());
    for chat in chats {
        let other_id = chat.other_participant(user_id);
        let other: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(other_id)
            .fetch_optional(db_pool)
            .await?;
        let other_user = match other {
            Some(user) => OtherUser {
                profile_picture: user.profile_picture_url(),
                id: user.id,
                username: user.username,
            },
            None => OtherUser {
                id: other_id.to_owned(),
                username: "Unknown User".to_owned(),
                profile_picture: None,
            },
        };

        let last_message = match &chat.last_message_id {
            Some(id) => match msg::find(db_pool, id).await {
                Ok(message) => Some(message),
                Err(AppError::NotFound(_)) => None,
                Err(e) => return Err(e),
            },
            None => None,
        };

        let (unread_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ? AND sender_id <> ? AND read = 0",
        )
        .bind(&chat.id)
        .bind(user_id)
        .fetch_one(db_pool)
        .await?;

        out.push(ChatSummary {
            id: chat.id,
            other_user,
            last_message,
            last_message_time: chat.last_message_time,
            unread_count,
        });
    }
    Ok(out)
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn create(
    Path(other): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<Json<ChatView>> {
    let other = users::resolve(&db_pool, &other).await?;
    let chat = create_or_get(&db_pool, &principal.user_id, &other.id).await?;
    Ok(Json(chat.into()))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn list(
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<Json<Vec<ChatSummary>>> {
    Ok(Json(summaries(&db_pool, &principal.user_id).await?))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn by_id(
    Path(chat_id): Path<String>,
    State(db_pool): State<SqlitePool>,
    principal: Principal,
) -> AppResult<Json<ChatView>> {
    let chat = load_for(&db_pool, &chat_id, &principal.user_id).await?;
    Ok(Json(chat.into()))
}
