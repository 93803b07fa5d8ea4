// src/handlers/comment.rs

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    handlers::parse_id,
    integrity,
    models::{
        comment::{Comment, CommentResponse, CreateCommentRequest},
        user::UserSummary,
    },
    utils::{jwt::Claims, sanitize::clean_text},
};

async fn find_comment(pool: &PgPool, id: Uuid) -> Result<Comment, AppError> {
    sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Comment not found.".to_string()))
}

/// List every comment, newest first, with authors populated.
pub async fn get_comments(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let comments = sqlx::query_as::<_, Comment>("SELECT * FROM comments ORDER BY created_at DESC")
        .fetch_all(&pool)
        .await?;

    let mut author_ids: Vec<Uuid> = comments.iter().map(|c| c.author).collect();
    author_ids.sort_unstable();
    author_ids.dedup();

    let authors: HashMap<Uuid, UserSummary> = if author_ids.is_empty() {
        HashMap::new()
    } else {
        sqlx::query_as::<_, UserSummary>(
            "SELECT id, first_name, last_name, username FROM users WHERE id = ANY($1)",
        )
        .bind(&author_ids)
        .fetch_all(&pool)
        .await?
        .into_iter()
        .map(|u| (u.id, u))
        .collect()
    };

    let data: Vec<CommentResponse> = comments
        .into_iter()
        .map(|comment| {
            let author = authors.get(&comment.author).cloned();
            CommentResponse::new(comment, author)
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "data": data
    })))
}

/// Get a single comment by ID.
pub async fn get_comment(
    State(pool): State<PgPool>,
    Path(comment_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let comment_id = parse_id(&comment_id)?;
    let comment = find_comment(&pool, comment_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": comment
    })))
}

/// Create a comment on a post and append it to the post's comments list.
pub async fn create_comment(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<String>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let post_id = parse_id(&post_id)?;
    let user_id = claims.user_id()?;

    if payload.validate().is_err() {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    let post_exists = sqlx::query_scalar::<_, Uuid>("SELECT id FROM posts WHERE id = $1")
        .bind(post_id)
        .fetch_optional(&pool)
        .await?;

    if post_exists.is_none() {
        return Err(AppError::NotFound("Post not found.".to_string()));
    }

    let comment = sqlx::query_as::<_, Comment>(
        "INSERT INTO comments (content, author) VALUES ($1, $2) RETURNING *",
    )
    .bind(clean_text(&payload.content))
    .bind(user_id)
    .fetch_one(&pool)
    .await?;

    // Update Post
    sqlx::query(
        "UPDATE posts SET comments = array_append(comments, $2), updated_at = NOW() WHERE id = $1",
    )
    .bind(post_id)
    .bind(comment.id)
    .execute(&pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Comment created successfully"
    })))
}

/// Create a reply and append it to the parent comment's replies list.
pub async fn create_reply_to_comment(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(comment_id): Path<String>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let comment_id = parse_id(&comment_id)?;
    let user_id = claims.user_id()?;

    if payload.validate().is_err() {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    let parent = find_comment(&pool, comment_id).await?;

    let reply = sqlx::query_as::<_, Comment>(
        "INSERT INTO comments (content, author) VALUES ($1, $2) RETURNING *",
    )
    .bind(clean_text(&payload.content))
    .bind(user_id)
    .fetch_one(&pool)
    .await?;

    // Update parent comment
    sqlx::query(
        "UPDATE comments SET replies = array_append(replies, $2), updated_at = NOW() WHERE id = $1",
    )
    .bind(parent.id)
    .bind(reply.id)
    .execute(&pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Reply created successfully"
    })))
}

/// Delete a top-level comment and its whole reply subtree, then pull the
/// comment out of the post that referenced it.
pub async fn delete_comment_and_replies(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(comment_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let comment_id = parse_id(&comment_id)?;
    let user_id = claims.user_id()?;

    let comment = find_comment(&pool, comment_id).await?;

    if comment.author != user_id {
        return Err(AppError::Unauthorized("Unauthorized.".to_string()));
    }

    // Subtree drains children-first, the root last.
    integrity::delete_comment_subtree(&pool, comment.id).await?;

    // Pull the root from whichever parent list referenced it.
    integrity::pull_comment_from_post(&pool, comment.id).await?;
    integrity::pull_reply_from_parent(&pool, comment.id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Comment and its replies deleted successfully"
    })))
}

/// Delete a reply (a comment not referenced by any post) and its subtree,
/// then pull it out of its parent comment's replies list.
pub async fn delete_reply(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(comment_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let comment_id = parse_id(&comment_id)?;
    let user_id = claims.user_id()?;

    let comment = sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = $1")
        .bind(comment_id)
        .fetch_optional(&pool)
        .await?;

    let is_main_comment =
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM posts WHERE $1 = ANY(comments)")
            .bind(comment_id)
            .fetch_optional(&pool)
            .await?
            .is_some();

    let comment = match comment {
        Some(comment) if !is_main_comment => comment,
        _ => return Err(AppError::NotFound("Comment not found.".to_string())),
    };

    if comment.author != user_id {
        return Err(AppError::Unauthorized("Unauthorized.".to_string()));
    }

    integrity::delete_comment_subtree(&pool, comment.id).await?;

    // Update parent comment
    integrity::pull_reply_from_parent(&pool, comment.id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Reply deleted successfully"
    })))
}
