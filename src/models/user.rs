// src/models/user.rs

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Usernames: letters, digits, dots and underscores.
static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._]+$").unwrap());

/// Represents the 'users' table in the database.
///
/// The relationship arrays (`followers`, `following`, `posts`,
/// `saved_posts`, `communities`) are denormalized back-references kept
/// consistent by `crate::integrity`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,

    pub first_name: String,
    pub last_name: String,

    /// Unique username.
    pub username: String,

    /// Unique email address.
    pub email: String,

    pub bio: String,

    /// Argon2 password hash.
    /// Skipped during serialization to prevent leaking sensitive data.
    #[serde(skip)]
    pub password: String,

    /// Long-lived token persisted alongside the user. Never serialized.
    #[serde(skip)]
    pub refresh_token: Option<String>,

    #[serde(skip)]
    pub reset_password_token: Option<String>,
    #[serde(skip)]
    pub reset_password_expires: Option<chrono::DateTime<chrono::Utc>>,

    pub followers: Vec<Uuid>,
    pub following: Vec<Uuid>,
    pub posts: Vec<Uuid>,
    pub saved_posts: Vec<Uuid>,
    pub communities: Vec<Uuid>,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl User {
    /// Display name used in tokens and notification texts.
    pub fn name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Short author/creator projection embedded in post and comment responses.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
}

impl UserSummary {
    pub fn name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// DTO for registration.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(length(min = 3, message = "First name must be at least 3 characters."))]
    pub first_name: String,

    #[validate(length(min = 3, message = "Last name must be at least 3 characters."))]
    pub last_name: String,

    #[validate(
        length(min = 3, max = 50, message = "Username must be between 3 and 50 characters."),
        regex(path = *USERNAME_RE, message = "Username may only contain letters, digits, dots and underscores.")
    )]
    pub username: String,

    #[validate(length(min = 3))]
    pub bio: Option<String>,

    #[validate(email(message = "Invalid email address."))]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters."))]
    pub password: String,

    #[validate(must_match(other = password, message = "Passwords do not match."))]
    pub confirm_password: String,
}

/// DTO for login.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email address."))]
    pub email: String,

    #[validate(length(min = 1))]
    pub password: String,
}

/// DTO for profile updates.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[validate(length(min = 3, message = "First name must be at least 3 characters."))]
    pub first_name: String,

    #[validate(length(min = 3, message = "Last name must be at least 3 characters."))]
    pub last_name: String,

    #[validate(
        length(min = 3, max = 50, message = "Username must be between 3 and 50 characters."),
        regex(path = *USERNAME_RE, message = "Username may only contain letters, digits, dots and underscores.")
    )]
    pub username: String,

    #[validate(length(min = 3))]
    pub bio: Option<String>,

    #[validate(email(message = "Invalid email address."))]
    pub email: String,
}

/// DTO for password changes (logged-in flow).
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    #[validate(length(min = 1))]
    pub old_password: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters."))]
    pub password: String,

    #[validate(must_match(other = password, message = "Passwords do not match."))]
    pub confirm_password: String,
}

/// DTO to request a password-reset email.
#[derive(Debug, Deserialize, Validate)]
pub struct ForgetPasswordRequest {
    #[validate(email(message = "Invalid email address."))]
    pub email: String,
}

/// DTO to set a new password through a reset token.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[validate(length(min = 8, message = "Password must be at least 8 characters."))]
    pub password: String,

    #[validate(must_match(other = password, message = "Passwords do not match."))]
    pub confirm_password: String,
}

/// Query parameters for listing users.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListParams {
    pub search_term: Option<String>,

    /// 'new_users' (default) or 'old_users'.
    pub sort: Option<String>,

    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_payload() -> RegisterRequest {
        RegisterRequest {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            username: "ada.lovelace".into(),
            bio: None,
            email: "ada@example.com".into(),
            password: "enchantress".into(),
            confirm_password: "enchantress".into(),
        }
    }

    #[test]
    fn register_accepts_valid_payload() {
        assert!(register_payload().validate().is_ok());
    }

    #[test]
    fn register_rejects_password_mismatch() {
        let mut payload = register_payload();
        payload.confirm_password = "different".into();
        assert!(payload.validate().is_err());
    }

    #[test]
    fn register_rejects_bad_username_characters() {
        let mut payload = register_payload();
        payload.username = "ada lovelace!".into();
        assert!(payload.validate().is_err());
    }

    #[test]
    fn register_rejects_bad_email() {
        let mut payload = register_payload();
        payload.email = "not-an-email".into();
        assert!(payload.validate().is_err());
    }
}
