// src/config.rs

use std::env;

use dotenvy::dotenv;

/// Process-wide configuration, read from the environment exactly once at
/// startup and handed to components through `AppState`.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    /// Access-token lifetime in seconds.
    pub jwt_expiration: u64,
    /// Refresh-token lifetime in seconds. Also used for the cookie Max-Age.
    pub refresh_expiration: u64,
    pub rust_log: String,

    // Object storage (images)
    pub s3_bucket: String,
    /// Public base URL the bucket is served from, e.g. a CDN host.
    pub s3_public_url: String,

    // Outbound mail
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub email_from: String,
    /// Base URL embedded in password-reset links.
    pub frontend_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(6 * 60 * 60);

        let refresh_expiration = env::var("REFRESH_EXPIRATION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(72 * 60 * 60);

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let s3_bucket = env::var("S3_BUCKET").expect("S3_BUCKET must be set");
        let s3_public_url = env::var("S3_PUBLIC_URL").expect("S3_PUBLIC_URL must be set");

        let smtp_host = env::var("SMTP_HOST").expect("SMTP_HOST must be set");
        let smtp_port = env::var("SMTP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(587);
        let smtp_user = env::var("SMTP_USER").expect("SMTP_USER must be set");
        let smtp_pass = env::var("SMTP_PASS").expect("SMTP_PASS must be set");
        let email_from = env::var("EMAIL_FROM")
            .unwrap_or_else(|_| "Snapgram <no-reply@snapgram.app>".to_string());
        let frontend_url =
            env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            refresh_expiration,
            rust_log,
            s3_bucket,
            s3_public_url,
            smtp_host,
            smtp_port,
            smtp_user,
            smtp_pass,
            email_from,
            frontend_url,
        }
    }
}
