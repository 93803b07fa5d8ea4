// src/handlers/mod.rs

pub mod auth;
pub mod comment;
pub mod community;
pub mod notification;
pub mod post;
pub mod user;

use uuid::Uuid;

use crate::error::AppError;

/// Parses a path identifier, mapping malformed input to the domain error
/// every resource handler surfaces for it.
pub(crate) fn parse_id(id: &str) -> Result<Uuid, AppError> {
    id.parse()
        .map_err(|_| AppError::Validation("Invalid identifier.".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_accepts_uuids_and_rejects_garbage() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
        assert!(parse_id("615f1e2a9c2b").is_err());
        assert!(parse_id("").is_err());
    }
}
