// src/handlers/notification.rs

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
    response::sse::{Event, KeepAlive, Sse},
};
use serde_json::json;
use sqlx::PgPool;
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};

use crate::{
    error::AppError,
    handlers::parse_id,
    models::notification::{Notification, NotificationListParams},
    realtime::NotificationHub,
    utils::{
        jwt::Claims,
        pagination::{next_page, page_window},
    },
};

/// List the caller's notifications, newest first.
pub async fn get_notifications(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<NotificationListParams>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let window = page_window(params.page, params.limit, 10);

    let notifications = sqlx::query_as::<_, Notification>(
        r#"
        SELECT * FROM notifications
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(user_id)
    .bind(window.limit)
    .bind(window.skip)
    .fetch_all(&pool)
    .await?;

    let total_notifications =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notifications WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&pool)
            .await?;

    let next = next_page(total_notifications, window, notifications.len());

    Ok(Json(json!({
        "success": true,
        "notifications": notifications,
        "totalNotifications": total_notifications,
        "nextPage": next,
        "hasNextPage": next.is_some()
    })))
}

/// Mark one notification read. Only its target user may.
pub async fn mark_notification_read(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(notification_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let notification_id = parse_id(&notification_id)?;
    let user_id = claims.user_id()?;

    let notification = sqlx::query_as::<_, Notification>("SELECT * FROM notifications WHERE id = $1")
        .bind(notification_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Notification not found.".to_string()))?;

    if notification.user_id != user_id {
        return Err(AppError::Unauthorized("Unauthorized.".to_string()));
    }

    let updated = sqlx::query_as::<_, Notification>(
        "UPDATE notifications SET is_read = TRUE, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(notification.id)
    .fetch_one(&pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "notification": updated
    })))
}

/// Mark every unread notification of the caller read.
pub async fn mark_all_notifications_read(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    sqlx::query(
        "UPDATE notifications SET is_read = TRUE, updated_at = NOW() WHERE user_id = $1 AND is_read = FALSE",
    )
    .bind(user_id)
    .execute(&pool)
    .await?;

    Ok(Json(json!({ "success": true })))
}

/// SSE stream relaying the caller's notifications as they are recorded.
pub async fn stream_notifications(
    State(hub): State<Arc<NotificationHub>>,
    Extension(claims): Extension<Claims>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let user_id = claims.user_id()?;

    let stream = BroadcastStream::new(hub.subscribe(user_id)).filter_map(|message| {
        // A lagged receiver just skips what it missed.
        message
            .ok()
            .map(|payload| Ok(Event::default().event("notification").data(payload)))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
