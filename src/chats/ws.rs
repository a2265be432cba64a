use std::collections::HashMap;

use axum::{
    debug_handler,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::{
    AppState,
    auth::{Principal, TokenKeys, strip_bearer},
    chats::msg::{self, SendMessageQuery},
    db,
    realtime::{
        Delivery, ERRORS_QUEUE, Hub, TEST_QUEUE, normalize_destination,
        stomp::{self, Command, Frame},
    },
};

const SEND_MESSAGE: &str = "/app/chat.sendMessage";
const TEST: &str = "/app/test";

#[debug_handler(state = AppState)]
pub async fn chat_ws(
    State(db_pool): State<SqlitePool>,
    State(hub): State<Hub>,
    State(keys): State<TokenKeys>,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        Session::new(db_pool, hub, keys).run(socket).await
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsSend {
    chat_id: String,
    #[serde(flatten)]
    message: SendMessageQuery,
}

/// What to write back after one inbound frame.
#[derive(Debug, Default)]
struct Reply {
    frames: Vec<Frame>,
    close: bool,
}

impl Reply {
    fn frame(frame: Frame) -> Self {
        Self {
            frames: vec![frame],
            close: false,
        }
    }

    /// An `ERROR` frame; STOMP closes the connection after one.
    fn fatal(message: &str) -> Self {
        Self {
            frames: vec![error_frame(message)],
            close: true,
        }
    }
}

fn error_frame(message: &str) -> Frame {
    Frame::new(Command::Error)
        .header("message", message)
        .header("content-type", "text/plain")
        .body(message)
}

/// One STOMP connection. Unauthenticated until `CONNECT` succeeds.
struct Session {
    db_pool: SqlitePool,
    hub: Hub,
    keys: TokenKeys,
    principal: Option<Principal>,
    /// subscription id -> normalized destination
    subscriptions: HashMap<String, String>,
}

impl Session {
    fn new(db_pool: SqlitePool, hub: Hub, keys: TokenKeys) -> Self {
        Self {
            db_pool,
            hub,
            keys,
            principal: None,
            subscriptions: HashMap::new(),
        }
    }

    async fn run(mut self, socket: WebSocket) {
        let (mut sender, mut receiver) = socket.split();
        let mut deliveries: Option<broadcast::Receiver<Delivery>> = None;

        'session: loop {
            tokio::select! {
                incoming = receiver.next() => {
                    let Some(Ok(incoming)) = incoming else {
                        break;
                    };
                    let text = match incoming {
                        WsMessage::Text(text) => text.as_str().to_owned(),
                        WsMessage::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => text,
                            Err(_) => {
                                let _ = sender
                                    .send(WsMessage::Text(error_frame("frames must be UTF-8").to_text().into()))
                                    .await;
                                break;
                            }
                        },
                        WsMessage::Close(_) => break,
                        WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                    };

                    let reply = self.handle_text(&text).await;
                    for frame in reply.frames {
                        if sender.send(WsMessage::Text(frame.to_text().into())).await.is_err() {
                            break 'session;
                        }
                    }
                    if reply.close {
                        break;
                    }

                    if deliveries.is_none() {
                        if let Some(principal) = &self.principal {
                            deliveries = Some(self.hub.subscribe(&principal.user_id));
                        }
                    }
                }

                delivery = next_delivery(&mut deliveries) => {
                    match delivery {
                        Ok(delivery) => {
                            let Some(frame) = self.message_frame(&delivery) else {
                                continue;
                            };
                            if sender.send(WsMessage::Text(frame.to_text().into())).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "session fell behind, dropped deliveries");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }

        let _ = sender.close().await;
        drop(deliveries);
        if let Some(principal) = &self.principal {
            self.hub.prune(&principal.user_id);
            info!(user_id = %principal.user_id, "realtime session closed");
        }
    }

    async fn handle_text(&mut self, text: &str) -> Reply {
        if stomp::is_heartbeat(text) {
            return Reply::default();
        }

        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => return Reply::fatal(&e.to_string()),
        };

        let mut reply = match self.principal.clone() {
            None => self.connect(&frame),
            Some(principal) => self.dispatch(&principal, &frame).await,
        };

        if let Some(receipt) = frame.get("receipt") {
            if !reply.frames.iter().any(|f| f.command == Command::Error) {
                reply
                    .frames
                    .push(Frame::new(Command::Receipt).header("receipt-id", receipt));
            }
        }
        reply
    }

    fn connect(&mut self, frame: &Frame) -> Reply {
        if !matches!(frame.command, Command::Connect | Command::Stomp) {
            return Reply::fatal("expected CONNECT");
        }

        let token = frame
            .get("Authorization")
            .and_then(strip_bearer)
            .or_else(|| frame.get("passcode"));
        let Some(token) = token else {
            return Reply::fatal("missing bearer token");
        };

        let principal = match self.keys.verify(token) {
            Ok(claims) => Principal::from(claims),
            Err(e) => return Reply::fatal(&e.to_string()),
        };
        info!(user_id = %principal.user_id, "realtime session connected");

        let connected = Frame::new(Command::Connected)
            .header("version", "1.2")
            .header("heart-beat", "0,0")
            .header("user-name", principal.username.clone());
        self.principal = Some(principal);
        Reply::frame(connected)
    }

    async fn dispatch(&mut self, principal: &Principal, frame: &Frame) -> Reply {
        match frame.command {
            Command::Subscribe => {
                let (id, destination) = match (frame.require("id"), frame.require("destination")) {
                    (Ok(id), Ok(destination)) => (id, destination),
                    (Err(e), _) | (_, Err(e)) => return Reply::fatal(&e.to_string()),
                };
                let Some(normalized) = normalize_destination(destination, &principal.user_id)
                else {
                    return Reply::fatal(&format!("cannot subscribe to {destination}"));
                };
                debug!(user_id = %principal.user_id, id, destination = %normalized, "subscribed");
                self.subscriptions.insert(id.to_owned(), normalized);
                Reply::default()
            }
            Command::Unsubscribe => match frame.require("id") {
                Ok(id) => {
                    self.subscriptions.remove(id);
                    Reply::default()
                }
                Err(e) => Reply::fatal(&e.to_string()),
            },
            Command::Send => match frame.require("destination") {
                Ok(SEND_MESSAGE) => self.send_message(principal, &frame.body).await,
                Ok(TEST) => {
                    self.hub.publish_json(
                        &principal.user_id,
                        TEST_QUEUE,
                        &json!({
                            "type": "test_response",
                            "message": format!("hello {}", principal.username),
                            "timestamp": OffsetDateTime::now_utc()
                                .format(&Rfc3339)
                                .unwrap_or_default(),
                        }),
                    );
                    Reply::default()
                }
                Ok(other) => Reply::fatal(&format!("unknown destination {other}")),
                Err(e) => Reply::fatal(&e.to_string()),
            },
            Command::Disconnect => Reply {
                frames: Vec::new(),
                close: true,
            },
            Command::Connect | Command::Stomp => Reply::fatal("already connected"),
            other => Reply::fatal(&format!("unexpected {other} frame")),
        }
    }

    /// Persists and fans out like the REST endpoint. Failures go back on the
    /// errors queue instead of closing the connection.
    async fn send_message(&self, principal: &Principal, body: &str) -> Reply {
        let sent = match serde_json::from_str::<WsSend>(body) {
            Ok(WsSend { chat_id, message }) => match message.kind() {
                Ok(kind) => {
                    msg::send_message(
                        &self.db_pool,
                        &self.hub,
                        &chat_id,
                        &principal.user_id,
                        &message.content,
                        kind,
                    )
                    .await
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e.into()),
        };

        match sent {
            Ok(_) => Reply::default(),
            Err(e) => {
                debug!(user_id = %principal.user_id, error = %e, "realtime send failed");
                let error = Delivery {
                    destination: ERRORS_QUEUE.to_owned(),
                    body: json!({ "error": e.to_string() }).to_string(),
                };
                match self.message_frame(&error) {
                    Some(frame) => Reply::frame(frame),
                    None => Reply::default(),
                }
            }
        }
    }

    /// `None` when no subscription matches the destination.
    fn message_frame(&self, delivery: &Delivery) -> Option<Frame> {
        let (subscription, destination) = self
            .subscriptions
            .iter()
            .find(|(_, destination)| **destination == delivery.destination)?;

        Some(
            Frame::new(Command::Message)
                .header("subscription", subscription.as_str())
                .header("message-id", db::new_id())
                .header("destination", destination.as_str())
                .header("content-type", "application/json")
                .body(delivery.body.as_str()),
        )
    }
}

async fn next_delivery(
    deliveries: &mut Option<broadcast::Receiver<Delivery>>,
) -> Result<Delivery, RecvError> {
    match deliveries {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
