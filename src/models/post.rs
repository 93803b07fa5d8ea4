// src/models/post.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;
use validator::Validate;

use crate::models::user::UserSummary;

/// Reference to an image held by the external object store.
/// Field names mirror the stored document (`public_id`, `secure_url`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRef {
    pub public_id: String,
    pub secure_url: String,
}

/// A `{user, sharedAt}` record appended to a post's `sharedBy` list when
/// another user shares it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRecord {
    pub user: Uuid,
    pub shared_at: chrono::DateTime<chrono::Utc>,
}

/// Represents the 'posts' table in the database.
///
/// A post is either an original (`original_post` is NULL, caption and
/// location present) or a share (`original_post` set, caption and location
/// absent).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,

    pub caption: Option<String>,
    pub images: Json<Vec<ImageRef>>,
    pub location: Option<String>,
    pub tags: Json<Vec<String>>,

    /// Users who liked this post.
    pub likes: Vec<Uuid>,

    pub author: Uuid,

    pub shared_by: Json<Vec<ShareRecord>>,
    pub original_post: Option<Uuid>,

    pub community: Option<Uuid>,

    /// Ordered list of top-level comment ids.
    pub comments: Vec<Uuid>,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Post {
    pub fn is_share(&self) -> bool {
        self.original_post.is_some()
    }
}

/// Author projection serialized into post responses.
#[derive(Debug, Clone, Serialize)]
pub struct Author {
    pub id: Uuid,
    pub name: String,
    pub username: String,
}

impl From<&UserSummary> for Author {
    fn from(user: &UserSummary) -> Self {
        Author {
            id: user.id,
            name: user.name(),
            username: user.username.clone(),
        }
    }
}

/// A post with its author (and, for shares, the original post) populated.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostResponse {
    pub id: Uuid,
    pub caption: Option<String>,
    pub images: Vec<ImageRef>,
    pub location: Option<String>,
    pub tags: Vec<String>,
    pub likes: Vec<Uuid>,
    /// None when the author no longer resolves.
    pub author: Option<Author>,
    pub shared_by: Vec<ShareRecord>,
    pub original_post: Option<Box<PostResponse>>,
    pub community: Option<Uuid>,
    pub comments: Vec<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl PostResponse {
    pub fn new(post: Post, author: Option<Author>, original_post: Option<PostResponse>) -> Self {
        PostResponse {
            id: post.id,
            caption: post.caption,
            images: post.images.0,
            location: post.location,
            tags: post.tags.0,
            likes: post.likes,
            author,
            shared_by: post.shared_by.0,
            original_post: original_post.map(Box::new),
            community: post.community,
            comments: post.comments,
            created_at: post.created_at,
            updated_at: post.updated_at,
        }
    }
}

/// Text fields of the post create/update multipart form.
#[derive(Debug, Default, Validate)]
pub struct PostInput {
    #[validate(length(min = 3, message = "Caption must be at least 3 characters."))]
    pub caption: String,

    #[validate(length(min = 1, message = "Location is required."))]
    pub location: String,

    /// Comma-separated tag list, split and trimmed before storage.
    pub tags: Option<String>,

    /// Public ids of stored images to detach and delete (update only).
    pub images_to_remove: Vec<String>,
}

impl PostInput {
    pub fn tag_list(&self) -> Vec<String> {
        match &self.tags {
            Some(raw) => raw
                .split(',')
                .map(|tag| tag.trim().to_string())
                .filter(|tag| !tag.is_empty())
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Query parameters for listing posts.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostListParams {
    pub search_query: Option<String>,

    /// 'new_posts' (default) or 'old_posts'.
    pub sort: Option<String>,

    pub page: Option<i64>,
    pub limit: Option<i64>,
}
