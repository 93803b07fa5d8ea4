// src/handlers/community.rs

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
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
        community::{Community, CommunityInput, CommunityListParams, CommunityResponse, CreatorSummary},
        post::ImageRef,
        user::User,
    },
    state::AppState,
    storage::{MAX_IMAGE_BYTES, ObjectStorage, is_supported_image},
    utils::{
        jwt::Claims,
        pagination::{ilike_pattern, next_page, page_window},
        sanitize::clean_text,
    },
};

async fn find_community(pool: &PgPool, id: Uuid) -> Result<Community, AppError> {
    sqlx::query_as::<_, Community>("SELECT * FROM communities WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Community not found.".to_string()))
}

async fn find_user(pool: &PgPool, id: Uuid) -> Result<User, AppError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("User not found.".to_string()))
}

fn member_sort_order(sort: Option<&str>) -> &'static str {
    match sort {
        Some("old_users") => "ASC",
        _ => "DESC",
    }
}

/// List communities with search, sort and pagination; creators populated.
pub async fn get_communities(
    State(pool): State<PgPool>,
    Query(params): Query<CommunityListParams>,
) -> Result<impl IntoResponse, AppError> {
    let window = page_window(params.page, params.limit, 10);

    let order = match params.sort.as_deref() {
        Some("old_communities") => "ASC",
        _ => "DESC",
    };

    let pattern = params.search_query.as_deref().map(ilike_pattern);

    let communities = sqlx::query_as::<_, Community>(&format!(
        r#"
        SELECT * FROM communities
        WHERE ($1::TEXT IS NULL OR name ILIKE $1 OR username ILIKE $1)
        ORDER BY created_at {order}
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(&pattern)
    .bind(window.limit)
    .bind(window.skip)
    .fetch_all(&pool)
    .await?;

    let total_communities = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM communities WHERE ($1::TEXT IS NULL OR name ILIKE $1 OR username ILIKE $1)",
    )
    .bind(&pattern)
    .fetch_one(&pool)
    .await?;

    // Populate creators for the page in one query.
    let mut creator_ids: Vec<Uuid> = communities.iter().map(|c| c.created_by).collect();
    creator_ids.sort_unstable();
    creator_ids.dedup();

    let creators: HashMap<Uuid, CreatorSummary> = if creator_ids.is_empty() {
        HashMap::new()
    } else {
        sqlx::query_as::<_, CreatorSummary>(
            "SELECT id, first_name, last_name, username, bio FROM users WHERE id = ANY($1)",
        )
        .bind(&creator_ids)
        .fetch_all(&pool)
        .await?
        .into_iter()
        .map(|c| (c.id, c))
        .collect()
    };

    let next = next_page(total_communities, window, communities.len());

    let communities: Vec<CommunityResponse> = communities
        .into_iter()
        .map(|community| {
            let creator = creators.get(&community.created_by).cloned();
            CommunityResponse::new(community, creator)
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "communities": communities,
        "totalCommunities": total_communities,
        "nextPage": next,
        "hasNextPage": next.is_some()
    })))
}

/// Paginated member list. Private communities only open to their members.
pub async fn get_members_by_community(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(community_id): Path<String>,
    Query(params): Query<CommunityListParams>,
) -> Result<impl IntoResponse, AppError> {
    let community_id = parse_id(&community_id)?;
    let user_id = claims.user_id()?;

    let community = find_community(&pool, community_id).await?;

    if community.is_private() && !community.is_member(user_id) {
        return Err(AppError::Unauthorized(
            "You do not belong to this community.".to_string(),
        ));
    }

    list_users_in(&pool, &community.members, params).await
}

/// Paginated pending-request list. Gated like the member list.
pub async fn get_requests_by_community(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(community_id): Path<String>,
    Query(params): Query<CommunityListParams>,
) -> Result<impl IntoResponse, AppError> {
    let community_id = parse_id(&community_id)?;
    let user_id = claims.user_id()?;

    let community = find_community(&pool, community_id).await?;

    if community.is_private() && !community.is_member(user_id) {
        return Err(AppError::Unauthorized(
            "You do not belong to this community.".to_string(),
        ));
    }

    list_users_in(&pool, &community.members_requests, params).await
}

/// Shared pagination over a community's user-id array.
async fn list_users_in(
    pool: &PgPool,
    ids: &[Uuid],
    params: CommunityListParams,
) -> Result<Json<serde_json::Value>, AppError> {
    let window = page_window(params.page, params.limit, 10);
    let order = member_sort_order(params.sort.as_deref());

    let users = sqlx::query_as::<_, User>(&format!(
        r#"
        SELECT * FROM users
        WHERE id = ANY($1)
        ORDER BY created_at {order}
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(ids)
    .bind(window.limit)
    .bind(window.skip)
    .fetch_all(pool)
    .await?;

    let total_users = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE id = ANY($1)")
        .bind(ids)
        .fetch_one(pool)
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

/// Get a single community by ID.
pub async fn get_community(
    State(pool): State<PgPool>,
    Path(community_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let community_id = parse_id(&community_id)?;
    let community = find_community(&pool, community_id).await?;

    Ok(Json(json!({
        "success": true,
        "community": community
    })))
}

/// Parses the community create/update multipart form: text fields plus at
/// most one image file.
async fn parse_community_form(
    mut multipart: Multipart,
) -> Result<(CommunityInput, Option<(Vec<u8>, String)>), AppError> {
    let mut input = CommunityInput::default();
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::Validation("Something wrong.".to_string()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("name") => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| AppError::Validation("Something wrong.".to_string()))?;
                input.name = text.trim().to_string();
            }
            Some("username") => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| AppError::Validation("Something wrong.".to_string()))?;
                input.username = text.trim().to_string();
            }
            Some("bio") => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| AppError::Validation("Something wrong.".to_string()))?;
                input.bio = Some(clean_text(&text));
            }
            Some("communityType") => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| AppError::Validation("Something wrong.".to_string()))?;
                input.community_type = text.trim().to_string();
            }
            Some("images") => {
                if upload.is_some() {
                    return Err(AppError::Validation(
                        "Only one image is allowed.".to_string(),
                    ));
                }

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

                upload = Some((bytes.to_vec(), content_type));
            }
            _ => {}
        }
    }

    Ok((input, upload))
}

/// Create a community. Name, then username must be free; the creator is
/// implicitly the first member.
pub async fn create_community(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let (input, upload) = parse_community_form(multipart).await?;

    if input.validate().is_err() {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    let name_in_use = sqlx::query_scalar::<_, Uuid>("SELECT id FROM communities WHERE name = $1")
        .bind(&input.name)
        .fetch_optional(&state.pool)
        .await?;

    if name_in_use.is_some() {
        return Err(AppError::Conflict(
            "This community name is already in use.".to_string(),
        ));
    }

    let username_in_use =
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM communities WHERE username = $1")
            .bind(&input.username)
            .fetch_optional(&state.pool)
            .await?;

    if username_in_use.is_some() {
        return Err(AppError::Conflict(
            "This community username is already in use.".to_string(),
        ));
    }

    let image: Option<ImageRef> = match upload {
        Some((bytes, content_type)) => Some(state.storage.upload(bytes, &content_type).await?),
        None => None,
    };

    // Create Community
    let community = sqlx::query_as::<_, Community>(
        r#"
        INSERT INTO communities (name, username, image, bio, created_by, members, community_type)
        VALUES ($1, $2, $3, $4, $5, ARRAY[$5], $6)
        RETURNING *
        "#,
    )
    .bind(&input.name)
    .bind(&input.username)
    .bind(image.map(SqlJson))
    .bind(&input.bio)
    .bind(user_id)
    .bind(&input.community_type)
    .fetch_one(&state.pool)
    .await?;

    // Update user
    sqlx::query(
        "UPDATE users SET communities = array_append(communities, $2), updated_at = NOW() WHERE id = $1",
    )
    .bind(user_id)
    .bind(community.id)
    .execute(&state.pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "community": community
    })))
}

/// Update a community. Owner only; uniqueness is re-checked for changed
/// name/username; a new image replaces (and deletes) the old one.
pub async fn update_community(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(community_id): Path<String>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let community_id = parse_id(&community_id)?;
    let user_id = claims.user_id()?;

    let (input, upload) = parse_community_form(multipart).await?;

    if input.validate().is_err() {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    let community = find_community(&state.pool, community_id).await?;

    if community.created_by != user_id {
        return Err(AppError::Unauthorized("Unauthorized.".to_string()));
    }

    if input.name != community.name {
        let name_in_use =
            sqlx::query_scalar::<_, Uuid>("SELECT id FROM communities WHERE name = $1")
                .bind(&input.name)
                .fetch_optional(&state.pool)
                .await?;

        if name_in_use.is_some() {
            return Err(AppError::Conflict(
                "This community name is already in use.".to_string(),
            ));
        }
    }

    if input.username != community.username {
        let username_in_use =
            sqlx::query_scalar::<_, Uuid>("SELECT id FROM communities WHERE username = $1")
                .bind(&input.username)
                .fetch_optional(&state.pool)
                .await?;

        if username_in_use.is_some() {
            return Err(AppError::Conflict(
                "This community username is already in use.".to_string(),
            ));
        }
    }

    let image: Option<ImageRef> = match upload {
        Some((bytes, content_type)) => {
            if let Some(old) = &community.image {
                state.storage.delete(&old.0.public_id).await?;
            }
            Some(state.storage.upload(bytes, &content_type).await?)
        }
        None => community.image.clone().map(|image| image.0),
    };

    // Update Community
    let updated = sqlx::query_as::<_, Community>(
        r#"
        UPDATE communities
        SET name = $2, username = $3, bio = COALESCE($4, bio), image = $5,
            community_type = $6, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(community.id)
    .bind(&input.name)
    .bind(&input.username)
    .bind(&input.bio)
    .bind(image.map(SqlJson))
    .bind(&input.community_type)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "community": updated
    })))
}

/// Delete a community and cascade through members, posts and images.
pub async fn delete_community(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(community_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let community_id = parse_id(&community_id)?;
    let user_id = claims.user_id()?;

    let community = find_community(&state.pool, community_id).await?;

    if community.created_by != user_id {
        return Err(AppError::Unauthorized("Unauthorized.".to_string()));
    }

    integrity::delete_community_cascade(&state.pool, state.storage.as_ref(), &community).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Community deleted successfully."
    })))
}

/// Join a Public community directly. The creator is already in.
pub async fn join_community(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(community_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let community_id = parse_id(&community_id)?;
    let user_id = claims.user_id()?;

    let community = find_community(&pool, community_id).await?;

    if community.is_private() {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    if community.created_by == user_id {
        return Err(AppError::Validation(
            "You cannot join your own community.".to_string(),
        ));
    }

    if community.is_member(user_id) {
        return Err(AppError::Conflict(
            "You have already joined this community.".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE communities SET members = array_append(members, $2), updated_at = NOW() WHERE id = $1",
    )
    .bind(community.id)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE users SET communities = array_append(communities, $2), updated_at = NOW() WHERE id = $1",
    )
    .bind(user_id)
    .bind(community.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(json!({
        "success": true,
        "communityId": community.id
    })))
}

/// Leave a community. The owner cannot leave their own.
pub async fn leave_community(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(community_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let community_id = parse_id(&community_id)?;
    let user_id = claims.user_id()?;

    let community = find_community(&pool, community_id).await?;

    if community.created_by == user_id {
        return Err(AppError::Validation(
            "You cannot leave your own community.".to_string(),
        ));
    }

    if !community.is_member(user_id) {
        return Err(AppError::Conflict(
            "You do not belong to this community.".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE communities SET members = array_remove(members, $2), updated_at = NOW() WHERE id = $1",
    )
    .bind(community.id)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE users SET communities = array_remove(communities, $2), updated_at = NOW() WHERE id = $1",
    )
    .bind(user_id)
    .bind(community.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(json!({
        "success": true,
        "communityId": community.id
    })))
}

/// File a membership request with a Private community.
pub async fn request_membership(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(community_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let community_id = parse_id(&community_id)?;
    let user_id = claims.user_id()?;

    let community = find_community(&pool, community_id).await?;

    if community.created_by == user_id {
        return Err(AppError::Validation(
            "You cannot request membership in your own community.".to_string(),
        ));
    }

    if !community.is_private() {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    if community.is_member(user_id) {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    if community.has_request_from(user_id) {
        return Err(AppError::Conflict(
            "You have already sent a request.".to_string(),
        ));
    }

    sqlx::query(
        "UPDATE communities SET members_requests = array_append(members_requests, $2), updated_at = NOW() WHERE id = $1",
    )
    .bind(community.id)
    .bind(user_id)
    .execute(&pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "communityId": community.id
    })))
}

/// Withdraw a pending membership request.
pub async fn delete_request_membership(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(community_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let community_id = parse_id(&community_id)?;
    let user_id = claims.user_id()?;

    let community = find_community(&pool, community_id).await?;

    if community.created_by == user_id {
        return Err(AppError::Validation(
            "You cannot delete request membership in your own community.".to_string(),
        ));
    }

    if !community.is_private() {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    if community.is_member(user_id) {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    if !community.has_request_from(user_id) {
        return Err(AppError::Conflict(
            "You have not sent a request.".to_string(),
        ));
    }

    sqlx::query(
        "UPDATE communities SET members_requests = array_remove(members_requests, $2), updated_at = NOW() WHERE id = $1",
    )
    .bind(community.id)
    .bind(user_id)
    .execute(&pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "communityId": community.id
    })))
}

/// Accept a membership request (owner only): the requester moves from
/// membersRequests to members and the community lands on their list.
pub async fn accept_membership(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path((community_id, requesting_user_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let community_id = parse_id(&community_id)?;
    let requesting_user_id = parse_id(&requesting_user_id)?;
    let user_id = claims.user_id()?;

    let community = find_community(&pool, community_id).await?;
    let requesting_user = find_user(&pool, requesting_user_id).await?;

    if community.created_by != user_id {
        return Err(AppError::Unauthorized("Unauthorized.".to_string()));
    }

    if !community.has_request_from(requesting_user.id) {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE communities
        SET members = array_append(members, $2),
            members_requests = array_remove(members_requests, $2),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(community.id)
    .bind(requesting_user.id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE users SET communities = array_append(communities, $2), updated_at = NOW() WHERE id = $1",
    )
    .bind(requesting_user.id)
    .bind(community.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(json!({
        "success": true,
        "communityId": community.id
    })))
}

/// Deny a membership request (owner only).
pub async fn deny_membership(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path((community_id, requesting_user_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let community_id = parse_id(&community_id)?;
    let requesting_user_id = parse_id(&requesting_user_id)?;
    let user_id = claims.user_id()?;

    let community = find_community(&pool, community_id).await?;
    let requesting_user = find_user(&pool, requesting_user_id).await?;

    if community.created_by != user_id {
        return Err(AppError::Unauthorized("Unauthorized.".to_string()));
    }

    if !community.has_request_from(requesting_user.id) {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    sqlx::query(
        "UPDATE communities SET members_requests = array_remove(members_requests, $2), updated_at = NOW() WHERE id = $1",
    )
    .bind(community.id)
    .bind(requesting_user.id)
    .execute(&pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "communityId": community.id
    })))
}

/// Force-remove a member (owner only); both sides of the relation drop.
pub async fn delete_member(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path((community_id, member_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let community_id = parse_id(&community_id)?;
    let member_id = parse_id(&member_id)?;
    let user_id = claims.user_id()?;

    let community = find_community(&pool, community_id).await?;

    let member = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(member_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Member not found.".to_string()))?;

    if community.created_by != user_id {
        return Err(AppError::Unauthorized("Unauthorized.".to_string()));
    }

    if !community.is_member(member.id) {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE communities SET members = array_remove(members, $2), updated_at = NOW() WHERE id = $1",
    )
    .bind(community.id)
    .bind(member.id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE users SET communities = array_remove(communities, $2), updated_at = NOW() WHERE id = $1",
    )
    .bind(member.id)
    .bind(community.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(json!({
        "success": true,
        "communityId": community.id
    })))
}
