// src/handlers/post.rs

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;
use sqlx::types::Json as SqlJson;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    handlers::parse_id,
    integrity,
    models::{
        community::Community,
        notification::{NOTIFICATION_LIKE, NOTIFICATION_SHARE},
        post::{Author, ImageRef, Post, PostInput, PostListParams, PostResponse},
        user::{User, UserSummary},
    },
    realtime::NotificationHub,
    state::AppState,
    storage::{MAX_IMAGE_BYTES, ObjectStorage, is_supported_image},
    utils::{
        jwt::Claims,
        pagination::{has_next_page, ilike_pattern, page_window},
        sanitize::clean_text,
    },
};

pub const MAX_POST_IMAGES: usize = 10;

async fn find_post(pool: &PgPool, id: Uuid) -> Result<Post, AppError> {
    sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Post not found.".to_string()))
}

/// Populates a page of posts with their authors and, for shares, the
/// original post (with its own author). One query per referenced table
/// instead of one per row.
async fn hydrate_posts(pool: &PgPool, posts: Vec<Post>) -> Result<Vec<PostResponse>, AppError> {
    let original_ids: Vec<Uuid> = posts.iter().filter_map(|p| p.original_post).collect();

    let originals: Vec<Post> = if original_ids.is_empty() {
        Vec::new()
    } else {
        sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = ANY($1)")
            .bind(&original_ids)
            .fetch_all(pool)
            .await?
    };

    let mut author_ids: Vec<Uuid> = posts
        .iter()
        .map(|p| p.author)
        .chain(originals.iter().map(|p| p.author))
        .collect();
    author_ids.sort_unstable();
    author_ids.dedup();

    let authors: HashMap<Uuid, UserSummary> = if author_ids.is_empty() {
        HashMap::new()
    } else {
        sqlx::query_as::<_, UserSummary>(
            "SELECT id, first_name, last_name, username FROM users WHERE id = ANY($1)",
        )
        .bind(&author_ids)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|u| (u.id, u))
        .collect()
    };

    let originals: HashMap<Uuid, Post> = originals.into_iter().map(|p| (p.id, p)).collect();

    let responses = posts
        .into_iter()
        .map(|post| {
            let author = authors.get(&post.author).map(Author::from);
            let original = post
                .original_post
                .and_then(|id| originals.get(&id).cloned())
                .map(|original| {
                    let original_author = authors.get(&original.author).map(Author::from);
                    PostResponse::new(original, original_author, None)
                });
            PostResponse::new(post, author, original)
        })
        .collect();

    Ok(responses)
}

fn sort_order(sort: Option<&str>) -> &'static str {
    match sort {
        Some("old_posts") => "ASC",
        _ => "DESC",
    }
}

/// Home feed: posts that do not belong to a community.
pub async fn get_posts(
    State(pool): State<PgPool>,
    Query(params): Query<PostListParams>,
) -> Result<impl IntoResponse, AppError> {
    let window = page_window(params.page, params.limit, 10);
    let order = sort_order(params.sort.as_deref());
    let pattern = params.search_query.as_deref().map(ilike_pattern);

    let posts = sqlx::query_as::<_, Post>(&format!(
        r#"
        SELECT * FROM posts
        WHERE community IS NULL
          AND ($1::TEXT IS NULL OR caption ILIKE $1)
        ORDER BY created_at {order}
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(&pattern)
    .bind(window.limit)
    .bind(window.skip)
    .fetch_all(&pool)
    .await?;

    let total_posts = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM posts WHERE community IS NULL AND ($1::TEXT IS NULL OR caption ILIKE $1)",
    )
    .bind(&pattern)
    .fetch_one(&pool)
    .await?;

    let is_next = has_next_page(total_posts, window.skip, posts.len());
    let data = hydrate_posts(&pool, posts).await?;

    Ok(Json(json!({
        "success": true,
        "data": data,
        "totalPosts": total_posts,
        "isNext": is_next
    })))
}

/// Feed restricted to authors the caller follows.
pub async fn get_posts_by_following(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<PostListParams>,
) -> Result<impl IntoResponse, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(claims.user_id()?)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("User not found.".to_string()))?;

    let window = page_window(params.page, params.limit, 10);
    let order = sort_order(params.sort.as_deref());
    let pattern = params.search_query.as_deref().map(ilike_pattern);

    let posts = sqlx::query_as::<_, Post>(&format!(
        r#"
        SELECT * FROM posts
        WHERE community IS NULL
          AND author = ANY($1)
          AND ($2::TEXT IS NULL OR caption ILIKE $2)
        ORDER BY created_at {order}
        LIMIT $3 OFFSET $4
        "#
    ))
    .bind(&user.following)
    .bind(&pattern)
    .bind(window.limit)
    .bind(window.skip)
    .fetch_all(&pool)
    .await?;

    let total_posts = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM posts
        WHERE community IS NULL
          AND author = ANY($1)
          AND ($2::TEXT IS NULL OR caption ILIKE $2)
        "#,
    )
    .bind(&user.following)
    .bind(&pattern)
    .fetch_one(&pool)
    .await?;

    let is_next = has_next_page(total_posts, window.skip, posts.len());
    let data = hydrate_posts(&pool, posts).await?;

    Ok(Json(json!({
        "success": true,
        "data": data,
        "totalPosts": total_posts,
        "isNext": is_next
    })))
}

/// Community feed. Private communities only open to their members.
pub async fn get_posts_by_community(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(community_id): Path<String>,
    Query(params): Query<PostListParams>,
) -> Result<impl IntoResponse, AppError> {
    let community_id = parse_id(&community_id)?;
    let user_id = claims.user_id()?;

    let community = sqlx::query_as::<_, Community>("SELECT * FROM communities WHERE id = $1")
        .bind(community_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Community not found.".to_string()))?;

    if community.is_private() && !community.is_member(user_id) {
        return Err(AppError::Unauthorized(
            "You do not belong to this community.".to_string(),
        ));
    }

    let window = page_window(params.page, params.limit, 10);
    let order = sort_order(params.sort.as_deref());
    let pattern = params.search_query.as_deref().map(ilike_pattern);

    let posts = sqlx::query_as::<_, Post>(&format!(
        r#"
        SELECT * FROM posts
        WHERE community = $1
          AND ($2::TEXT IS NULL OR caption ILIKE $2)
        ORDER BY created_at {order}
        LIMIT $3 OFFSET $4
        "#
    ))
    .bind(community_id)
    .bind(&pattern)
    .bind(window.limit)
    .bind(window.skip)
    .fetch_all(&pool)
    .await?;

    let total_posts = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM posts WHERE community = $1 AND ($2::TEXT IS NULL OR caption ILIKE $2)",
    )
    .bind(community_id)
    .bind(&pattern)
    .fetch_one(&pool)
    .await?;

    let is_next = has_next_page(total_posts, window.skip, posts.len());
    let data = hydrate_posts(&pool, posts).await?;

    Ok(Json(json!({
        "success": true,
        "data": data,
        "totalPosts": total_posts,
        "isNext": is_next
    })))
}

/// Posts authored by a given user.
pub async fn get_posts_by_user(
    State(pool): State<PgPool>,
    Path(user_id): Path<String>,
    Query(params): Query<PostListParams>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = parse_id(&user_id)?;
    let window = page_window(params.page, params.limit, 10);
    let order = sort_order(params.sort.as_deref());
    let pattern = params.search_query.as_deref().map(ilike_pattern);

    let posts = sqlx::query_as::<_, Post>(&format!(
        r#"
        SELECT * FROM posts
        WHERE author = $1
          AND ($2::TEXT IS NULL OR caption ILIKE $2)
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

    let total_posts = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM posts WHERE author = $1 AND ($2::TEXT IS NULL OR caption ILIKE $2)",
    )
    .bind(user_id)
    .bind(&pattern)
    .fetch_one(&pool)
    .await?;

    let is_next = has_next_page(total_posts, window.skip, posts.len());
    let data = hydrate_posts(&pool, posts).await?;

    Ok(Json(json!({
        "success": true,
        "data": data,
        "totalPosts": total_posts,
        "isNext": is_next
    })))
}

/// Get a single post by ID.
pub async fn get_post(
    State(pool): State<PgPool>,
    Path(post_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let post_id = parse_id(&post_id)?;
    let post = find_post(&pool, post_id).await?;

    let data = hydrate_posts(&pool, vec![post])
        .await?
        .pop()
        .ok_or(AppError::NotFound("Post not found.".to_string()))?;

    Ok(Json(json!({
        "success": true,
        "data": data
    })))
}

/// Parses the post create/update multipart form: text fields plus the
/// `images` file parts, each gated on mime type and size before upload.
async fn parse_post_form(
    mut multipart: Multipart,
) -> Result<(PostInput, Vec<(Vec<u8>, String)>), AppError> {
    let mut input = PostInput::default();
    let mut uploads = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::Validation("Something wrong.".to_string()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("caption") => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| AppError::Validation("Something wrong.".to_string()))?;
                input.caption = clean_text(&text);
            }
            Some("location") => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| AppError::Validation("Something wrong.".to_string()))?;
                input.location = text.trim().to_string();
            }
            Some("tags") => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| AppError::Validation("Something wrong.".to_string()))?;
                input.tags = Some(text);
            }
            Some("imagesToRemove") => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| AppError::Validation("Something wrong.".to_string()))?;
                input.images_to_remove.push(text);
            }
            Some("images") => {
                let content_type = field
                    .content_type()
                    .map(str::to_string)
                    .ok_or(AppError::Validation("Unsupported file format.".to_string()))?;

                if !is_supported_image(&content_type) {
                    return Err(AppError::Validation("Unsupported file format.".to_string()));
                }

                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| AppError::Validation("Something wrong.".to_string()))?;

                if bytes.len() > MAX_IMAGE_BYTES {
                    return Err(AppError::Validation(
                        "Image exceeds the maximum size.".to_string(),
                    ));
                }

                uploads.push((bytes.to_vec(), content_type));
            }
            _ => {}
        }
    }

    Ok((input, uploads))
}

/// Create a new post, optionally inside a community.
/// At least one image is required; every image goes to the object store
/// before the post row is written.
pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    community_id: Option<Path<String>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let community_id = match community_id {
        Some(Path(raw)) => Some(parse_id(&raw)?),
        None => None,
    };

    let (input, uploads) = parse_post_form(multipart).await?;

    if uploads.is_empty() {
        return Err(AppError::Validation(
            "You must upload at least one image.".to_string(),
        ));
    }

    if uploads.len() > MAX_POST_IMAGES {
        return Err(AppError::Validation("Too many images.".to_string()));
    }

    if input.validate().is_err() {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    if let Some(community_id) = community_id {
        let community_exists =
            sqlx::query_scalar::<_, Uuid>("SELECT id FROM communities WHERE id = $1")
                .bind(community_id)
                .fetch_optional(&state.pool)
                .await?;

        if community_exists.is_none() {
            return Err(AppError::NotFound("Community not found.".to_string()));
        }
    }

    // Upload images
    let mut images = Vec::with_capacity(uploads.len());
    for (bytes, content_type) in uploads {
        images.push(state.storage.upload(bytes, &content_type).await?);
    }

    // Create Post
    let post = sqlx::query_as::<_, Post>(
        r#"
        INSERT INTO posts (caption, images, location, tags, author, community)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(&input.caption)
    .bind(SqlJson(&images))
    .bind(&input.location)
    .bind(SqlJson(input.tag_list()))
    .bind(user_id)
    .bind(community_id)
    .fetch_one(&state.pool)
    .await?;

    // Update user
    sqlx::query("UPDATE users SET posts = array_append(posts, $2), updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .bind(post.id)
        .execute(&state.pool)
        .await?;

    // Update Community
    if let Some(community_id) = community_id {
        sqlx::query(
            "UPDATE communities SET posts = array_append(posts, $2), updated_at = NOW() WHERE id = $1",
        )
        .bind(community_id)
        .bind(post.id)
        .execute(&state.pool)
        .await?;
    }

    Ok(Json(json!({
        "success": true,
        "data": post
    })))
}

/// Update a post's caption, location, tags and image set.
/// Owner only; shares have nothing to edit; at least one image must remain.
pub async fn update_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<String>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let post_id = parse_id(&post_id)?;
    let user_id = claims.user_id()?;

    let (input, uploads) = parse_post_form(multipart).await?;

    if input.validate().is_err() {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    let post = find_post(&state.pool, post_id).await?;

    if post.author != user_id {
        return Err(AppError::Unauthorized("Unauthorized.".to_string()));
    }

    if post.is_share() {
        return Err(AppError::Validation(
            "A shared post cannot be edited.".to_string(),
        ));
    }

    // Delete images if there are to delete
    let mut images: Vec<ImageRef> = post.images.0.clone();
    if !input.images_to_remove.is_empty() {
        images.retain(|image| !input.images_to_remove.contains(&image.public_id));
        for public_id in &input.images_to_remove {
            state.storage.delete(public_id).await?;
        }
    }

    // Upload new images if necessary
    if images.len() + uploads.len() > MAX_POST_IMAGES {
        return Err(AppError::Validation("Too many images.".to_string()));
    }
    for (bytes, content_type) in uploads {
        images.push(state.storage.upload(bytes, &content_type).await?);
    }

    if images.is_empty() {
        return Err(AppError::Validation(
            "You need at least one image.".to_string(),
        ));
    }

    let updated = sqlx::query_as::<_, Post>(
        r#"
        UPDATE posts
        SET caption = $2, location = $3, tags = $4, images = $5, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(post.id)
    .bind(&input.caption)
    .bind(&input.location)
    .bind(SqlJson(input.tag_list()))
    .bind(SqlJson(&images))
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "data": updated
    })))
}

/// Delete a post.
///
/// Originals take the full cascade (comment subtrees, shares, saved
/// references, community list, images). A share is only detached from the
/// original and its sharer.
pub async fn delete_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let post_id = parse_id(&post_id)?;
    let user_id = claims.user_id()?;

    let post = find_post(&state.pool, post_id).await?;

    if post.author != user_id {
        return Err(AppError::Unauthorized("Unauthorized.".to_string()));
    }

    if post.is_share() {
        integrity::remove_share(&state.pool, &post).await?;
    } else {
        integrity::delete_post_cascade(&state.pool, state.storage.as_ref(), &post).await?;
    }

    Ok(Json(json!({
        "success": true,
        "message": "Post deleted successfully."
    })))
}

/// Like a post. Duplicate likes are rejected; the author gets a
/// notification unless they liked their own post.
pub async fn like_post(
    State(pool): State<PgPool>,
    State(hub): State<Arc<NotificationHub>>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let post_id = parse_id(&post_id)?;
    let user_id = claims.user_id()?;

    let post = find_post(&pool, post_id).await?;

    if post.likes.contains(&user_id) {
        return Err(AppError::Conflict(
            "You already like this post.".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE posts SET likes = array_append(likes, $2), updated_at = NOW() WHERE id = $1")
        .bind(post.id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    let notification = if post.author != user_id {
        Some(
            integrity::record_notification(
                &mut *tx,
                post.author,
                user_id,
                NOTIFICATION_LIKE,
                &format!("{} liked your post", claims.name),
                Some(post.id),
            )
            .await?,
        )
    } else {
        None
    };

    tx.commit().await?;

    if let Some(notification) = notification {
        hub.publish(&notification);
    }

    Ok(Json(json!({ "success": true })))
}

/// Unlike a post. Rejected when the post was never liked.
pub async fn unlike_post(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let post_id = parse_id(&post_id)?;
    let user_id = claims.user_id()?;

    let post = find_post(&pool, post_id).await?;

    if !post.likes.contains(&user_id) {
        return Err(AppError::Conflict(
            "You have not liked this post.".to_string(),
        ));
    }

    sqlx::query("UPDATE posts SET likes = array_remove(likes, $2), updated_at = NOW() WHERE id = $1")
        .bind(post.id)
        .bind(user_id)
        .execute(&pool)
        .await?;

    Ok(Json(json!({ "success": true })))
}

/// Save a post to the caller's saved list.
pub async fn save_post(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let post_id = parse_id(&post_id)?;
    let user_id = claims.user_id()?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("User not found.".to_string()))?;

    find_post(&pool, post_id).await?;

    if user.saved_posts.contains(&post_id) {
        return Err(AppError::Conflict(
            "You already save this post.".to_string(),
        ));
    }

    sqlx::query(
        "UPDATE users SET saved_posts = array_append(saved_posts, $2), updated_at = NOW() WHERE id = $1",
    )
    .bind(user_id)
    .bind(post_id)
    .execute(&pool)
    .await?;

    Ok(Json(json!({ "success": true })))
}

/// Remove a post from the caller's saved list.
pub async fn unsave_post(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let post_id = parse_id(&post_id)?;
    let user_id = claims.user_id()?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("User not found.".to_string()))?;

    if !user.saved_posts.contains(&post_id) {
        return Err(AppError::Conflict(
            "You have not saved this post.".to_string(),
        ));
    }

    sqlx::query(
        "UPDATE users SET saved_posts = array_remove(saved_posts, $2), updated_at = NOW() WHERE id = $1",
    )
    .bind(user_id)
    .bind(post_id)
    .execute(&pool)
    .await?;

    Ok(Json(json!({ "success": true })))
}

/// Share a post: a new post row holding only author + originalPost, a
/// `{user, sharedAt}` record on the original, and a share notification to
/// the original's author.
pub async fn share_post(
    State(pool): State<PgPool>,
    State(hub): State<Arc<NotificationHub>>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let post_id = parse_id(&post_id)?;
    let user_id = claims.user_id()?;

    let original = find_post(&pool, post_id).await?;

    if original.author == user_id {
        return Err(AppError::Validation(
            "You cannot share your own publication".to_string(),
        ));
    }

    if original.shared_by.0.iter().any(|share| share.user == user_id) {
        return Err(AppError::Conflict(
            "You have already shared this post".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let share = sqlx::query_as::<_, Post>(
        "INSERT INTO posts (author, original_post) VALUES ($1, $2) RETURNING *",
    )
    .bind(user_id)
    .bind(original.id)
    .fetch_one(&mut *tx)
    .await?;

    integrity::push_share_record(&mut *tx, original.id, user_id).await?;

    sqlx::query("UPDATE users SET posts = array_append(posts, $2), updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .bind(share.id)
        .execute(&mut *tx)
        .await?;

    let notification = integrity::record_notification(
        &mut *tx,
        original.author,
        user_id,
        NOTIFICATION_SHARE,
        &format!("{} shared your post", claims.name),
        Some(original.id),
    )
    .await?;

    tx.commit().await?;

    hub.publish(&notification);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": share
        })),
    ))
}

/// Unshare: delete the caller's share of a post and pull its sharedBy
/// record from the original.
pub async fn unshare_post(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let post_id = parse_id(&post_id)?;
    let user_id = claims.user_id()?;

    let post = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = $1")
        .bind(post_id)
        .fetch_optional(&pool)
        .await?;

    let post = match post {
        Some(post) if post.is_share() => post,
        _ => {
            return Err(AppError::NotFound(
                "Post not found or is not shared post".to_string(),
            ));
        }
    };

    if post.author != user_id {
        return Err(AppError::Unauthorized("Unauthorized".to_string()));
    }

    integrity::remove_share(&pool, &post).await?;

    Ok((StatusCode::CREATED, Json(json!({ "success": true }))))
}
