// src/models/community.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;
use validator::Validate;

use crate::models::post::ImageRef;

pub const COMMUNITY_PUBLIC: &str = "Public";
pub const COMMUNITY_PRIVATE: &str = "Private";

/// Represents the 'communities' table in the database.
///
/// The creator is implicitly the first member. Private communities gate
/// membership through `members_requests`; Public ones allow direct join.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Community {
    pub id: Uuid,

    /// Unique display name.
    pub name: String,

    /// Unique handle.
    pub username: String,

    pub image: Option<Json<ImageRef>>,
    pub bio: Option<String>,

    pub created_by: Uuid,

    pub posts: Vec<Uuid>,
    pub members: Vec<Uuid>,
    pub members_requests: Vec<Uuid>,

    pub community_type: String,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Community {
    pub fn is_private(&self) -> bool {
        self.community_type == COMMUNITY_PRIVATE
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.members.contains(&user_id)
    }

    pub fn has_request_from(&self, user_id: Uuid) -> bool {
        self.members_requests.contains(&user_id)
    }
}

/// Creator projection serialized into community listings.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CreatorSummary {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub bio: String,
}

/// A community with its creator populated.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityResponse {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub image: Option<ImageRef>,
    pub bio: Option<String>,
    /// None when the creator no longer resolves.
    pub created_by: Option<CreatorSummary>,
    pub posts: Vec<Uuid>,
    pub members: Vec<Uuid>,
    pub members_requests: Vec<Uuid>,
    pub community_type: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl CommunityResponse {
    pub fn new(community: Community, created_by: Option<CreatorSummary>) -> Self {
        CommunityResponse {
            id: community.id,
            name: community.name,
            username: community.username,
            image: community.image.map(|image| image.0),
            bio: community.bio,
            created_by,
            posts: community.posts,
            members: community.members,
            members_requests: community.members_requests,
            community_type: community.community_type,
            created_at: community.created_at,
            updated_at: community.updated_at,
        }
    }
}

/// Text fields of the community create/update multipart form.
#[derive(Debug, Default, Validate)]
pub struct CommunityInput {
    #[validate(length(min = 4, message = "Name must be at least 4 characters."))]
    pub name: String,

    #[validate(length(min = 4, message = "Username must be at least 4 characters."))]
    pub username: String,

    #[validate(length(min = 4, message = "Bio must be at least 4 characters."))]
    pub bio: Option<String>,

    #[validate(custom(function = validate_community_type))]
    pub community_type: String,
}

fn validate_community_type(community_type: &str) -> Result<(), validator::ValidationError> {
    if community_type != COMMUNITY_PUBLIC && community_type != COMMUNITY_PRIVATE {
        return Err(validator::ValidationError::new("invalid_community_type"));
    }
    Ok(())
}

/// Query parameters for listing communities and their member/request pages.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityListParams {
    pub search_query: Option<String>,

    /// 'new_communities' (default) or 'old_communities'.
    pub sort: Option<String>,

    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> CommunityInput {
        CommunityInput {
            name: "Rustaceans".into(),
            username: "rustaceans".into(),
            bio: None,
            community_type: COMMUNITY_PUBLIC.into(),
        }
    }

    #[test]
    fn accepts_known_community_types() {
        assert!(input().validate().is_ok());

        let mut private = input();
        private.community_type = COMMUNITY_PRIVATE.into();
        assert!(private.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_community_type() {
        let mut bad = input();
        bad.community_type = "Secret".into();
        assert!(bad.validate().is_err());
    }
}
