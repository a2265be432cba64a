mod chat;
mod msg;
mod ws;

pub use chat::{ChatSummary, OtherUser, create_or_get, load_for, summaries};
pub use msg::{delete_message, edit_message, mark_read, send_message};
pub use ws::chat_ws;

use axum::{
    Router,
    routing::{delete, get, post, put},
};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create/{other}", post(chat::create))
        .route("/list", get(chat::list))
        .route("/{chat_id}", get(chat::by_id))
        .route("/{chat_id}/messages", get(msg::messages))
        .route("/{chat_id}/send", post(msg::send))
        .route("/{chat_id}/read", put(msg::read))
        .route("/message/{message_id}", delete(msg::delete).patch(msg::edit))
}
