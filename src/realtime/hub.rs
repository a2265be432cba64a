use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 64;

/// Something pushed to a user: a destination such as `/user/queue/messages`
/// and a JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub destination: String,
    pub body: String,
}

/// Live sessions, keyed by user id.
///
/// Every session of a user subscribes to that user's channel. Publishing to a
/// user with no session is a no-op: nothing is queued for later.
#[derive(Clone, Default)]
pub struct Hub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Delivery>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, user_id: &str) -> broadcast::Receiver<Delivery> {
        let mut channels = self.lock();
        channels
            .entry(user_id.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Returns how many live sessions received the delivery.
    pub fn publish(&self, user_id: &str, delivery: Delivery) -> usize {
        let mut channels = self.lock();
        let Some(tx) = channels.get(user_id) else {
            return 0;
        };

        match tx.send(delivery) {
            Ok(n) => {
                debug!(user_id, sessions = n, "delivered");
                n
            }
            Err(_) => {
                channels.remove(user_id);
                0
            }
        }
    }

    pub fn publish_json<T: Serialize>(&self, user_id: &str, destination: &str, body: &T) -> usize {
        match serde_json::to_string(body) {
            Ok(body) => self.publish(
                user_id,
                Delivery {
                    destination: destination.to_owned(),
                    body,
                },
            ),
            Err(e) => {
                warn!(error = %e, destination, "could not encode delivery");
                0
            }
        }
    }

    /// Drops the user's channel once the last session has gone.
    pub fn prune(&self, user_id: &str) {
        let mut channels = self.lock();
        if channels.get(user_id).is_some_and(|tx| tx.receiver_count() == 0) {
            channels.remove(user_id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Delivery>>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }
}
