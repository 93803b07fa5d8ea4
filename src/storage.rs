// src/storage.rs

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::models::post::ImageRef;

/// Upload constraints, matching the upload gate of the HTTP surface.
pub const MAX_IMAGE_BYTES: usize = 1024 * 1024;
pub const ALLOWED_IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];

pub fn is_supported_image(content_type: &str) -> bool {
    ALLOWED_IMAGE_TYPES.contains(&content_type)
}

/// External object store holding post and community images.
///
/// `upload` returns a stable public id (the object key) plus a fetchable
/// URL; `delete` removes a previously uploaded object. Both are attempted
/// once per request, never retried.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<ImageRef, AppError>;
    async fn delete(&self, public_id: &str) -> Result<(), AppError>;
}

/// S3-backed implementation.
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
    /// Public base the bucket is served from, without trailing slash.
    public_base: String,
}

impl S3Storage {
    pub async fn from_config(config: &Config) -> Self {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = aws_sdk_s3::Client::new(&aws_config);

        // Validate the configured base URL once at startup.
        let public_base = Url::parse(&config.s3_public_url)
            .expect("S3_PUBLIC_URL must be a valid URL")
            .to_string()
            .trim_end_matches('/')
            .to_string();

        Self {
            client,
            bucket: config.s3_bucket.clone(),
            public_base,
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<ImageRef, AppError> {
        let key = format!("snapgram/{}", Uuid::new_v4());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| AppError::InternalServerError(format!("Image upload failed: {}", e)))?;

        let secure_url = format!("{}/{}", self.public_base, key);

        Ok(ImageRef {
            public_id: key,
            secure_url,
        })
    }

    async fn delete(&self, public_id: &str) -> Result<(), AppError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(public_id)
            .send()
            .await
            .map_err(|e| AppError::InternalServerError(format!("Image delete failed: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_jpeg_png_webp_are_supported() {
        assert!(is_supported_image("image/jpeg"));
        assert!(is_supported_image("image/png"));
        assert!(is_supported_image("image/webp"));
        assert!(!is_supported_image("image/gif"));
        assert!(!is_supported_image("application/pdf"));
    }
}
