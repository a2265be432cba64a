use std::collections::BTreeSet;

use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::debug;

use crate::{
    AppResult, db,
    models::{Notification, NotificationKind},
    realtime::{Hub, NOTIFICATIONS_QUEUE},
};

/// What happened, and who caused it.
#[derive(Debug, Clone, Copy)]
pub struct Event<'a> {
    pub kind: NotificationKind,
    pub source_user_id: &'a str,
    pub post_id: Option<&'a str>,
    pub comment_id: Option<&'a str>,
    pub content: Option<&'a str>,
}

impl<'a> Event<'a> {
    pub fn new(kind: NotificationKind, source_user_id: &'a str) -> Self {
        Self {
            kind,
            source_user_id,
            post_id: None,
            comment_id: None,
            content: None,
        }
    }

    pub fn post(mut self, post_id: &'a str) -> Self {
        self.post_id = Some(post_id);
        self
    }

    pub fn comment(mut self, comment_id: &'a str) -> Self {
        self.comment_id = Some(comment_id);
        self
    }

    pub fn content(mut self, content: &'a str) -> Self {
        self.content = Some(content);
        self
    }
}

/// Notifies one user. `None` when the recipient caused the event.
pub async fn create(
    db_pool: &SqlitePool,
    hub: &Hub,
    recipient: &str,
    event: Event<'_>,
) -> AppResult<Option<Notification>> {
    let mut sent = fan_out(db_pool, hub, [recipient], event).await?;
    Ok(sent.pop())
}

/// Notifies every distinct recipient except the source user.
///
/// Rows go in under one transaction; live pushes only happen after commit.
pub async fn fan_out<'r>(
    db_pool: &SqlitePool,
    hub: &Hub,
    recipients: impl IntoIterator<Item = &'r str>,
    event: Event<'_>,
) -> AppResult<Vec<Notification>> {
    let recipients: BTreeSet<&str> = recipients
        .into_iter()
        .filter(|r| *r != event.source_user_id)
        .collect();
    if recipients.is_empty() {
        return Ok(Vec::new());
    }

    let source_username: Option<(String,)> =
        sqlx::query_as("SELECT username FROM users WHERE id = ?")
            .bind(event.source_user_id)
            .fetch_optional(db_pool)
            .await?;
    let source_username = source_username.map(|(name,)| name);

    let now = OffsetDateTime::now_utc();
    let mut sent = Vec::with_capacity(recipients.len());

    let mut tx = db_pool.begin().await?;
    for recipient in recipients {
        let notification = Notification {
            id: db::new_id(),
            user_id: recipient.to_owned(),
            kind: event.kind,
            source_user_id: event.source_user_id.to_owned(),
            source_username: source_username.clone(),
            post_id: event.post_id.map(str::to_owned),
            comment_id: event.comment_id.map(str::to_owned),
            content: event.content.map(str::to_owned),
            read: false,
            created_at: now,
        };

        sqlx::query(
            "INSERT INTO notifications (id,user_id,kind,source_user_id,post_id,comment_id,content,read,created_at) \
             values (?,?,?,?,?,?,?,?,?)",
        )
        .bind(&notification.id)
        .bind(&notification.user_id)
        .bind(notification.kind)
        .bind(&notification.source_user_id)
        .bind(&notification.post_id)
        .bind(&notification.comment_id)
        .bind(&notification.content)
        .bind(notification.read)
        .bind(notification.created_at)
        .execute(&mut *tx)
        .await?;

        sent.push(notification);
    }
    tx.commit().await?;

    for notification in &sent {
        hub.publish_json(&notification.user_id, NOTIFICATIONS_QUEUE, notification);
    }
    debug!(kind = ?event.kind, source = event.source_user_id, count = sent.len(), "notified");

    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{self, NewUser};

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
    async fn never_notifies_the_source() {
        let db_pool = db::memory().await.unwrap();
        let hub = Hub::new();
        let alice = user(&db_pool, "alice").await;

        let sent = create(&db_pool, &hub, &alice, Event::new(NotificationKind::Like, &alice))
            .await
            .unwrap();
        assert!(sent.is_none());
    }

    #[tokio::test]
    async fn fan_out_dedupes_and_pushes_after_commit() {
        let db_pool = db::memory().await.unwrap();
        let hub = Hub::new();
        let alice = user(&db_pool, "alice").await;
        let bob = user(&db_pool, "bob").await;
        let carol = user(&db_pool, "carol").await;
        let mut bob_rx = hub.subscribe(&bob);

        let event = Event::new(NotificationKind::NewPost, &alice).post("p1");
        let sent = fan_out(
            &db_pool,
            &hub,
            [bob.as_str(), carol.as_str(), bob.as_str(), alice.as_str()],
            event,
        )
        .await
        .unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|n| n.source_username.as_deref() == Some("alice")));

        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notifications")
            .fetch_one(&db_pool)
            .await
            .unwrap();
        assert_eq!(rows, 2);

        let pushed = bob_rx.recv().await.unwrap();
        assert_eq!(pushed.destination, NOTIFICATIONS_QUEUE);
        let body: serde_json::Value = serde_json::from_str(&pushed.body).unwrap();
        assert_eq!(body["type"], "NEW_POST");
        assert_eq!(body["postId"], "p1");
        assert_eq!(body["read"], false);
    }
}
