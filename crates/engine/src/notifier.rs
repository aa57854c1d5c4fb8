//! User notification seam.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifierError {
    #[error("no delivery channel for user {0}")]
    NoSubscription(Uuid),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

/// Outcome of fanning a notification out to every device of a user.
#[derive(Debug, Default)]
pub struct Delivery {
    pub sent: usize,
    pub failures: Vec<NotifierError>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: Uuid, notification: &Notification) -> Delivery;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: Uuid, notification: &Notification) -> Delivery {
        info!(
            user_id = %user_id,
            title = %notification.title,
            body = %notification.body,
            "notification"
        );
        Delivery {
            sent: 1,
            failures: Vec::new(),
        }
    }
}
