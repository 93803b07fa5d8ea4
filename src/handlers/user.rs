// src/handlers/user.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;

use crate::{
    error::AppError,
    handlers::parse_id,
    integrity,
    models::{
        notification::NOTIFICATION_FOLLOW,
        user::{User, UserListParams},
    },
    realtime::NotificationHub,
    utils::{
        jwt::Claims,
        pagination::{ilike_pattern, next_page, page_window},
    },
};

async fn find_user(pool: &PgPool, id: uuid::Uuid) -> Result<User, AppError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("User not found.".to_string()))
}

/// List users, excluding the caller.
/// Supports case-insensitive substring search on name and username,
/// newest/oldest ordering, and page/limit pagination.
pub async fn get_users(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<UserListParams>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let window = page_window(params.page, params.limit, 9);

    let order = match params.sort.as_deref() {
        Some("old_users") => "ASC",
        _ => "DESC",
    };

    let pattern = params.search_term.as_deref().map(ilike_pattern);

    let users = sqlx::query_as::<_, User>(&format!(
        r#"
        SELECT * FROM users
        WHERE id <> $1
          AND ($2::TEXT IS NULL
               OR first_name ILIKE $2 OR last_name ILIKE $2 OR username ILIKE $2)
        ORDER BY created_at {order}
        LIMIT $3 OFFSET $4
        "#
    ))
    .bind(user_id)
    .bind(&pattern)
    .bind(window.limit)
    .bind(window.skip)
    .fetch_all(&pool)
    .await?;

    let total_users = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM users
        WHERE id <> $1
          AND ($2::TEXT IS NULL
               OR first_name ILIKE $2 OR last_name ILIKE $2 OR username ILIKE $2)
        "#,
    )
    .bind(user_id)
    .bind(&pattern)
    .fetch_one(&pool)
    .await?;

    let next = next_page(total_users, window, users.len());

    Ok(Json(json!({
        "success": true,
        "users": users,
        "totalUsers": total_users,
        "nextPage": next,
        "hasNextPage": next.is_some()
    })))
}

/// The eight most prolific authors, excluding the caller.
pub async fn get_users_by_created_posts(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let users = sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users
        WHERE id <> $1
        ORDER BY cardinality(posts) DESC
        LIMIT 8
        "#,
    )
    .bind(user_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "users": users
    })))
}

/// Get a single user by ID.
pub async fn get_user(
    State(pool): State<PgPool>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = parse_id(&user_id)?;
    let user = find_user(&pool, user_id).await?;

    Ok(Json(json!({
        "success": true,
        "user": user
    })))
}

/// Get the authenticated user.
pub async fn get_current_user(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user = find_user(&pool, claims.user_id()?).await?;

    Ok(Json(json!({
        "success": true,
        "user": user
    })))
}

/// Follow another user.
///
/// Both sides of the edge are written in one transaction, together with
/// the follow notification; the notification is relayed once the
/// transaction commits.
pub async fn follow_user(
    State(pool): State<PgPool>,
    State(hub): State<Arc<NotificationHub>>,
    Extension(claims): Extension<Claims>,
    Path(follow_user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let follow_user_id = parse_id(&follow_user_id)?;
    let user_id = claims.user_id()?;

    if follow_user_id == user_id {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    let user_to_follow = find_user(&pool, follow_user_id).await?;
    let user = find_user(&pool, user_id).await?;

    if user.following.contains(&user_to_follow.id) {
        return Err(AppError::Conflict(
            "You already follow this user.".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    integrity::follow_edge(&mut *tx, user.id, user_to_follow.id).await?;

    let notification = integrity::record_notification(
        &mut *tx,
        user_to_follow.id,
        user.id,
        NOTIFICATION_FOLLOW,
        &format!("{} followed you", user.name()),
        None,
    )
    .await?;

    tx.commit().await?;

    hub.publish(&notification);

    Ok(Json(json!({
        "success": true,
        "userId": user.id,
        "followingId": user_to_follow.id
    })))
}

/// Unfollow a user. Symmetric to `follow_user`, without a notification.
pub async fn unfollow_user(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(unfollow_user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let unfollow_user_id = parse_id(&unfollow_user_id)?;
    let user_id = claims.user_id()?;

    if unfollow_user_id == user_id {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    let user_to_unfollow = find_user(&pool, unfollow_user_id).await?;
    let user = find_user(&pool, user_id).await?;

    if !user.following.contains(&user_to_unfollow.id) {
        return Err(AppError::Conflict(
            "You do not follow this user.".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    integrity::unfollow_edge(&mut *tx, user.id, user_to_unfollow.id).await?;
    tx.commit().await?;

    Ok(Json(json!({
        "success": true,
        "userId": user.id,
        "unfollowingId": user_to_unfollow.id
    })))
}
