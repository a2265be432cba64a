pub mod hub;
pub mod stomp;

pub use hub::{Delivery, Hub};

pub const MESSAGES_QUEUE: &str = "/user/queue/messages";
pub const NOTIFICATIONS_QUEUE: &str = "/user/queue/notifications";
pub const TEST_QUEUE: &str = "/user/queue/test";
pub const ERRORS_QUEUE: &str = "/user/queue/errors";

/// Maps `/user/{user_id}/queue/x` onto `/user/queue/x`.
///
/// `None` when the destination names a different user or is not a user queue.
pub fn normalize_destination(destination: &str, user_id: &str) -> Option<String> {
    let rest = destination.strip_prefix("/user/")?;
    if rest.starts_with("queue/") {
        return Some(destination.to_owned());
    }

    let (owner, queue) = rest.split_once('/')?;
    if owner == user_id && queue.starts_with("queue/") {
        Some(format!("/user/{queue}"))
    } else {
        None
    }
}
