// src/realtime.rs

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::notification::Notification;

const CHANNEL_CAPACITY: usize = 32;

/// In-process relay pushing freshly recorded notifications to a user's
/// connected sessions. Pure side channel: delivery is best-effort, nothing
/// is persisted here, and a send with no listeners is dropped.
#[derive(Default)]
pub struct NotificationHub {
    channels: RwLock<HashMap<Uuid, broadcast::Sender<String>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a session to the given user's notifications.
    pub fn subscribe(&self, user_id: Uuid) -> broadcast::Receiver<String> {
        let mut channels = self.channels.write().expect("notification hub lock poisoned");
        channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Relays a notification to the target user's sessions.
    pub fn publish(&self, notification: &Notification) {
        let payload = match serde_json::to_string(notification) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Failed to serialize notification: {}", e);
                return;
            }
        };

        let channels = self.channels.read().expect("notification hub lock poisoned");
        if let Some(sender) = channels.get(&notification.user_id) {
            // Receivers may have lagged or dropped; either way not our problem.
            let _ = sender.send(payload);
        }
    }
}
