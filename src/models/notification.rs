// src/models/notification.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const NOTIFICATION_FOLLOW: &str = "follow";
pub const NOTIFICATION_LIKE: &str = "like";
pub const NOTIFICATION_SHARE: &str = "share";

/// Represents the 'notifications' table in the database.
///
/// Created as a side effect of follow/like/share actions. Only the read
/// flag is ever updated afterwards. `post_id` may dangle once the post it
/// points at is deleted; readers must tolerate that.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,

    /// Target user.
    pub user_id: Uuid,

    pub sender_id: Uuid,

    pub content: String,

    /// 'like', 'share' or 'follow'.
    /// Mapped from the database column 'type' since `type` is a reserved
    /// keyword in Rust.
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub notification_type: String,

    pub is_read: bool,

    pub post_id: Option<Uuid>,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Query parameters for the notification list.
#[derive(Debug, Deserialize)]
pub struct NotificationListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}
