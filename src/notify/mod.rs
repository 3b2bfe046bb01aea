//! Out-of-band delivery of codes and account notices.
//!
//! Delivery is detached from the request: [`dispatch`] spawns the send and
//! only logs a failure, so nothing already committed is affected by it.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Otp,
    Welcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub destination: String,
    pub kind: NotificationKind,
    pub payload: Value,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), Error>;
}

/// Hands notifications to an in-process consumer such as a mail worker.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send(&self, notification: Notification) -> Result<(), Error> {
        self.sender
            .send(notification)
            .map_err(|_| Error::Internal("notification queue closed".into()))
    }
}

/// Fire-and-forget delivery.
pub fn dispatch(notifier: Arc<dyn Notifier>, notification: Notification) {
    tokio::spawn(async move {
        let destination = notification.destination.clone();
        let kind = notification.kind;
        match notifier.send(notification).await {
            Ok(()) => debug!("Queued {:?} notification for {}", kind, destination),
            Err(e) => error!("Failed to deliver {:?} notification to {}: {}", kind, destination, e),
        }
    });
}
