// src/models/comment.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::models::user::UserSummary;

/// Represents the 'comments' table in the database.
///
/// `replies` is a self-referential adjacency list: each entry is the id of
/// another comment, forming a tree rooted at a post's top-level comments.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub content: String,
    pub author: Uuid,
    pub replies: Vec<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// DTO for creating a comment or a reply.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateCommentRequest {
    #[validate(length(min = 4, message = "Comment must be at least 4 characters."))]
    pub content: String,
}

/// DTO for displaying a comment with author info.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentResponse {
    pub id: Uuid,
    pub content: String,
    /// None when the author no longer resolves.
    pub author: Option<UserSummary>,
    pub replies: Vec<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl CommentResponse {
    pub fn new(comment: Comment, author: Option<UserSummary>) -> Self {
        CommentResponse {
            id: comment.id,
            content: comment.content,
            author,
            replies: comment.replies,
            created_at: comment.created_at,
            updated_at: comment.updated_at,
        }
    }
}
