// src/handlers/auth.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use rand::{Rng, distributions::Alphanumeric};
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    config::Config,
    email::Mailer,
    error::AppError,
    handlers::parse_id,
    integrity,
    models::user::{
        ForgetPasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest,
        UpdatePasswordRequest, UpdateUserRequest, User,
    },
    state::AppState,
    utils::{
        hash::{hash_password, verify_password},
        jwt::{sign_jwt, verify_jwt},
        sanitize::clean_text,
    },
};

const REFRESH_COOKIE: &str = "refreshToken";
const RESET_TOKEN_LEN: usize = 40;
const RESET_TOKEN_TTL_SECS: i64 = 60 * 60;

fn refresh_cookie(token: &str, max_age_seconds: u64) -> String {
    format!("{REFRESH_COOKIE}={token}; HttpOnly; Path=/; Max-Age={max_age_seconds}")
}

fn clear_refresh_cookie() -> String {
    format!("{REFRESH_COOKIE}=; HttpOnly; Path=/; Max-Age=0")
}

/// Pulls the refresh token out of the Cookie header, if present.
fn read_refresh_cookie(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == REFRESH_COOKIE && !value.is_empty()).then(|| value.to_string())
    })
}

/// Issues both tokens for a user and persists the refresh token.
async fn issue_tokens(
    pool: &PgPool,
    config: &Config,
    user: &User,
) -> Result<(String, String), AppError> {
    let refresh_token = sign_jwt(
        user.id,
        &user.name(),
        &user.email,
        &user.bio,
        &config.jwt_secret,
        config.refresh_expiration,
    )?;

    sqlx::query("UPDATE users SET refresh_token = $2, updated_at = NOW() WHERE id = $1")
        .bind(user.id)
        .bind(&refresh_token)
        .execute(pool)
        .await?;

    let access_token = sign_jwt(
        user.id,
        &user.name(),
        &user.email,
        &user.bio,
        &config.jwt_secret,
        config.jwt_expiration,
    )?;

    Ok((access_token, refresh_token))
}

/// Registers a new user.
///
/// Email first, then username must be free; the password is hashed with
/// Argon2 before storage. Responds with an access token and sets the
/// refresh-token cookie, exactly like a login.
pub async fn register(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.validate().is_err() {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    let email_in_use = sqlx::query_scalar::<_, uuid::Uuid>("SELECT id FROM users WHERE email = $1")
        .bind(&payload.email)
        .fetch_optional(&pool)
        .await?;

    if email_in_use.is_some() {
        return Err(AppError::Conflict(
            "There is already a registered user with this email address.".to_string(),
        ));
    }

    let username_in_use =
        sqlx::query_scalar::<_, uuid::Uuid>("SELECT id FROM users WHERE username = $1")
            .bind(&payload.username)
            .fetch_optional(&pool)
            .await?;

    if username_in_use.is_some() {
        return Err(AppError::Conflict(
            "This username is already in use.".to_string(),
        ));
    }

    let hashed_password = hash_password(&payload.password)?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (first_name, last_name, username, email, bio, password)
        VALUES ($1, $2, $3, $4, COALESCE($5, 'My bio'), $6)
        RETURNING *
        "#,
    )
    .bind(&payload.first_name)
    .bind(&payload.last_name)
    .bind(&payload.username)
    .bind(&payload.email)
    .bind(payload.bio.as_deref().map(clean_text))
    .bind(&hashed_password)
    .fetch_one(&pool)
    .await?;

    let (access_token, refresh_token) = issue_tokens(&pool, &config, &user).await?;

    Ok((
        [(
            header::SET_COOKIE,
            refresh_cookie(&refresh_token, config.refresh_expiration),
        )],
        Json(json!({
            "success": true,
            "token": access_token
        })),
    ))
}

/// Authenticates a user by email + password.
pub async fn login(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.validate().is_err() {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&payload.email)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound(
            "There is no user registered with this email.".to_string(),
        ))?;

    if !verify_password(&payload.password, &user.password)? {
        return Err(AppError::Validation("Invalid password.".to_string()));
    }

    let (access_token, refresh_token) = issue_tokens(&pool, &config, &user).await?;

    Ok((
        [(
            header::SET_COOKIE,
            refresh_cookie(&refresh_token, config.refresh_expiration),
        )],
        Json(json!({
            "success": true,
            "token": access_token
        })),
    ))
}

/// Rotates the refresh token presented in the cookie.
pub async fn refresh_token(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let presented = read_refresh_cookie(&headers)
        .ok_or(AppError::NotFound("No refresh token.".to_string()))?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE refresh_token = $1")
        .bind(&presented)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Token not found.".to_string()))?;

    let claims = verify_jwt(&presented, &config.jwt_secret)?;
    if claims.user_id()? != user.id {
        return Err(AppError::AuthError("Something wrong.".to_string()));
    }

    let (_, rotated) = issue_tokens(&pool, &config, &user).await?;

    Ok((
        [(
            header::SET_COOKIE,
            refresh_cookie(&rotated, config.refresh_expiration),
        )],
        Json(json!({
            "success": true,
            "token": rotated
        })),
    ))
}

/// Clears the stored refresh token and the cookie.
pub async fn logout(
    State(pool): State<PgPool>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let presented = read_refresh_cookie(&headers)
        .ok_or(AppError::NotFound("No refresh token.".to_string()))?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE refresh_token = $1")
        .bind(&presented)
        .fetch_optional(&pool)
        .await?;

    if let Some(user) = user {
        sqlx::query("UPDATE users SET refresh_token = NULL, updated_at = NOW() WHERE id = $1")
            .bind(user.id)
            .execute(&pool)
            .await?;
    }

    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_refresh_cookie())],
    ))
}

/// Updates the profile of the user in the path (self gate applied in the
/// route layer).
pub async fn update_user(
    State(pool): State<PgPool>,
    Path(user_id): Path<String>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = parse_id(&user_id)?;

    if payload.validate().is_err() {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("User not found.".to_string()))?;

    if payload.email != user.email {
        let email_in_use =
            sqlx::query_scalar::<_, uuid::Uuid>("SELECT id FROM users WHERE email = $1")
                .bind(&payload.email)
                .fetch_optional(&pool)
                .await?;

        if email_in_use.is_some() {
            return Err(AppError::Conflict(
                "There is already a registered user with this email address.".to_string(),
            ));
        }
    }

    if payload.username != user.username {
        let username_in_use =
            sqlx::query_scalar::<_, uuid::Uuid>("SELECT id FROM users WHERE username = $1")
                .bind(&payload.username)
                .fetch_optional(&pool)
                .await?;

        if username_in_use.is_some() {
            return Err(AppError::Conflict(
                "This username is already in use.".to_string(),
            ));
        }
    }

    let updated = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET first_name = $2, last_name = $3, username = $4,
            bio = COALESCE($5, bio), email = $6, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(&payload.first_name)
    .bind(&payload.last_name)
    .bind(&payload.username)
    .bind(payload.bio.as_deref().map(clean_text))
    .bind(&payload.email)
    .fetch_one(&pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "user": updated
    })))
}

/// Changes the password of the user in the path (self gate applied in the
/// route layer). The old password must verify.
pub async fn update_password(
    State(pool): State<PgPool>,
    Path(user_id): Path<String>,
    Json(payload): Json<UpdatePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = parse_id(&user_id)?;

    if payload.validate().is_err() {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("User not found.".to_string()))?;

    if !verify_password(&payload.old_password, &user.password)? {
        return Err(AppError::Validation("Invalid password.".to_string()));
    }

    let hashed_password = hash_password(&payload.password)?;

    sqlx::query("UPDATE users SET password = $2, updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .bind(&hashed_password)
        .execute(&pool)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Password updated successfully."
    })))
}

/// Deletes the account in the path (self gate applied in the route layer)
/// and cascades through everything it owns or is referenced by.
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = parse_id(&user_id)?;

    let user_exists = sqlx::query_scalar::<_, uuid::Uuid>("SELECT id FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?;

    if user_exists.is_none() {
        return Err(AppError::NotFound("User not found.".to_string()));
    }

    integrity::delete_user_cascade(&state.pool, state.storage.as_ref(), user_id).await?;

    Ok((
        [(header::SET_COOKIE, clear_refresh_cookie())],
        Json(json!({
            "success": true,
            "message": "User deleted successfully."
        })),
    ))
}

/// Stores a single-use, time-limited reset token and emails the reset
/// link. Answers success even for unknown addresses.
pub async fn create_reset_password_token(
    State(pool): State<PgPool>,
    State(mailer): State<Arc<Mailer>>,
    Json(payload): Json<ForgetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.validate().is_err() {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&payload.email)
        .fetch_optional(&pool)
        .await?;

    if let Some(user) = user {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(RESET_TOKEN_LEN)
            .map(char::from)
            .collect();

        let expires = chrono::Utc::now() + chrono::Duration::seconds(RESET_TOKEN_TTL_SECS);

        sqlx::query(
            r#"
            UPDATE users
            SET reset_password_token = $2, reset_password_expires = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&token)
        .bind(expires)
        .execute(&pool)
        .await?;

        mailer
            .send_password_reset(&user.name(), &user.email, &token)
            .await?;
    }

    Ok(Json(json!({
        "success": true,
        "message": "If the email is registered, a reset link has been sent."
    })))
}

/// Sets a new password through a reset token.
pub async fn reset_user_password(
    State(pool): State<PgPool>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.validate().is_err() {
        return Err(AppError::Validation("Something wrong.".to_string()));
    }

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE reset_password_token = $1")
        .bind(&token)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Invalid or expired token.".to_string()))?;

    let still_valid = user
        .reset_password_expires
        .map(|expires| expires > chrono::Utc::now())
        .unwrap_or(false);

    if !still_valid {
        return Err(AppError::NotFound("Invalid or expired token.".to_string()));
    }

    let hashed_password = hash_password(&payload.password)?;

    sqlx::query(
        r#"
        UPDATE users
        SET password = $2, reset_password_token = NULL, reset_password_expires = NULL,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(user.id)
    .bind(&hashed_password)
    .execute(&pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Password updated successfully."
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_cookie_is_http_only() {
        let cookie = refresh_cookie("abc", 3600);
        assert!(cookie.starts_with("refreshToken=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=3600"));
    }

    #[test]
    fn read_refresh_cookie_finds_token_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "theme=dark; refreshToken=tok123; lang=en".parse().unwrap(),
        );
        assert_eq!(read_refresh_cookie(&headers), Some("tok123".to_string()));
    }

    #[test]
    fn read_refresh_cookie_ignores_empty_and_missing() {
        let mut headers = HeaderMap::new();
        assert_eq!(read_refresh_cookie(&headers), None);

        headers.insert(header::COOKIE, "refreshToken=".parse().unwrap());
        assert_eq!(read_refresh_cookie(&headers), None);
    }
}
