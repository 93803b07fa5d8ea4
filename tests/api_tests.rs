// tests/api_tests.rs

use std::net::SocketAddr;
use std::sync::Arc;

use snapgram::{
    config::Config, email::Mailer, error::AppError, models::post::ImageRef,
    realtime::NotificationHub, routes, state::AppState, storage::ObjectStorage,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

/// Object store stub: uploads resolve to fake references, deletes succeed.
struct NoopStorage;

#[async_trait::async_trait]
impl ObjectStorage for NoopStorage {
    async fn upload(&self, _bytes: Vec<u8>, _content_type: &str) -> Result<ImageRef, AppError> {
        Ok(ImageRef {
            public_id: format!("test/{}", Uuid::new_v4()),
            secure_url: "https://cdn.invalid/test".to_string(),
        })
    }

    async fn delete(&self, _public_id: &str) -> Result<(), AppError> {
        Ok(())
    }
}

fn test_config(database_url: String) -> Config {
    Config {
        database_url,
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600,
        refresh_expiration: 3600,
        rust_log: "error".to_string(),
        s3_bucket: "test-bucket".to_string(),
        s3_public_url: "https://cdn.invalid".to_string(),
        smtp_host: "localhost".to_string(),
        smtp_port: 2525,
        smtp_user: "test".to_string(),
        smtp_pass: "test".to_string(),
        email_from: "Snapgram <no-reply@snapgram.test>".to_string(),
        frontend_url: "http://localhost:3000".to_string(),
    }
}

/// Helper function to spawn the app on a random port for testing.
/// Returns the base URL and a pool for seeding/assertions.
async fn spawn_app() -> (String, PgPool) {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing. Make sure DATABASE_URL is set.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let config = test_config(database_url);

    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
        storage: Arc::new(NoopStorage),
        mailer: Arc::new(Mailer::from_config(&config).expect("mailer")),
        hub: Arc::new(NotificationHub::new()),
    };

    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");

    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (address, pool)
}

fn unique_handle(prefix: &str) -> String {
    format!("{}_{}", prefix, &Uuid::new_v4().simple().to_string()[..8])
}

/// Registers a user through the API and returns (user id, access token).
async fn register_user(
    client: &reqwest::Client,
    address: &str,
    pool: &PgPool,
    handle: &str,
) -> (Uuid, String) {
    let email = format!("{handle}@example.com");

    let response = client
        .post(format!("{address}/api/auth/register"))
        .json(&serde_json::json!({
            "firstName": "Test",
            "lastName": "User",
            "username": handle,
            "email": email,
            "password": "password123",
            "confirmPassword": "password123"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    let token = body["token"].as_str().unwrap().to_string();

    let user_id: Uuid = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_one(pool)
        .await
        .unwrap();

    (user_id, token)
}

/// Inserts a bare original post for the given author.
async fn seed_post(pool: &PgPool, author: Uuid, caption: &str) -> Uuid {
    sqlx::query_scalar(
        "INSERT INTO posts (caption, location, author) VALUES ($1, 'Nowhere', $2) RETURNING id",
    )
    .bind(caption)
    .bind(author)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn unknown_path_is_404() {
    let (address, _pool) = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{address}/random_path_that_does_not_exist"))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn register_rejects_duplicate_email_and_username() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();

    let handle = unique_handle("u");
    let (_, _) = register_user(&client, &address, &pool, &handle).await;

    // Same email again.
    let response = client
        .post(format!("{address}/api/auth/register"))
        .json(&serde_json::json!({
            "firstName": "Other",
            "lastName": "User",
            "username": unique_handle("u"),
            "email": format!("{handle}@example.com"),
            "password": "password123",
            "confirmPassword": "password123"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(
        body["error"],
        "There is already a registered user with this email address."
    );

    // Same username, fresh email.
    let response = client
        .post(format!("{address}/api/auth/register"))
        .json(&serde_json::json!({
            "firstName": "Other",
            "lastName": "User",
            "username": handle,
            "email": format!("{}@example.com", unique_handle("u")),
            "password": "password123",
            "confirmPassword": "password123"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "This username is already in use.");
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn register_fails_validation() {
    let (address, _pool) = spawn_app().await;
    let client = reqwest::Client::new();

    // Password confirmation mismatch.
    let response = client
        .post(format!("{address}/api/auth/register"))
        .json(&serde_json::json!({
            "firstName": "Test",
            "lastName": "User",
            "username": unique_handle("u"),
            "email": format!("{}@example.com", unique_handle("u")),
            "password": "password123",
            "confirmPassword": "different"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn login_rejects_wrong_password() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();

    let handle = unique_handle("u");
    register_user(&client, &address, &pool, &handle).await;

    let response = client
        .post(format!("{address}/api/auth/login"))
        .json(&serde_json::json!({
            "email": format!("{handle}@example.com"),
            "password": "not-the-password"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Invalid password.");
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn protected_routes_require_a_token() {
    let (address, _pool) = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{address}/api/users"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn follow_then_unfollow_restores_both_sides() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();

    let (u1, token1) = register_user(&client, &address, &pool, &unique_handle("ua")).await;
    let (u2, _) = register_user(&client, &address, &pool, &unique_handle("ub")).await;

    // U1 follows U2.
    let response = client
        .patch(format!("{address}/api/users/follow/{u2}"))
        .bearer_auth(&token1)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let followers: Vec<Uuid> = sqlx::query_scalar("SELECT followers FROM users WHERE id = $1")
        .bind(u2)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(followers, vec![u1]);

    let following: Vec<Uuid> = sqlx::query_scalar("SELECT following FROM users WHERE id = $1")
        .bind(u1)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(following, vec![u2]);

    // The follow left a notification for U2.
    let notifications: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND type = 'follow'")
            .bind(u2)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(notifications, 1);

    // Following again is a conflict.
    let response = client
        .patch(format!("{address}/api/users/follow/{u2}"))
        .bearer_auth(&token1)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "You already follow this user.");

    // Unfollow restores the pre-follow state.
    let response = client
        .patch(format!("{address}/api/users/unfollow/{u2}"))
        .bearer_auth(&token1)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let followers: Vec<Uuid> = sqlx::query_scalar("SELECT followers FROM users WHERE id = $1")
        .bind(u2)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(followers.is_empty());

    let following: Vec<Uuid> = sqlx::query_scalar("SELECT following FROM users WHERE id = $1")
        .bind(u1)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(following.is_empty());

    // Self-follow is rejected outright.
    let response = client
        .patch(format!("{address}/api/users/follow/{u1}"))
        .bearer_auth(&token1)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn like_twice_and_unlike_never_liked_are_rejected() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();

    let (author, _) = register_user(&client, &address, &pool, &unique_handle("ua")).await;
    let (_, token) = register_user(&client, &address, &pool, &unique_handle("ub")).await;

    let post_id = seed_post(&pool, author, "a sunset").await;

    // First like works.
    let response = client
        .patch(format!("{address}/api/posts/like/{post_id}"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // Second like conflicts.
    let response = client
        .patch(format!("{address}/api/posts/like/{post_id}"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "You already like this post.");

    // Unlike, then unlike again.
    let response = client
        .patch(format!("{address}/api/posts/unlike/{post_id}"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = client
        .patch(format!("{address}/api/posts/unlike/{post_id}"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "You have not liked this post.");
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn deleting_an_original_removes_shares_and_saved_references() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();

    let (author, author_token) = register_user(&client, &address, &pool, &unique_handle("ua")).await;
    let (saver, saver_token) = register_user(&client, &address, &pool, &unique_handle("ub")).await;

    let post_id = seed_post(&pool, author, "to be deleted").await;

    // Sharing your own post is rejected.
    let response = client
        .post(format!("{address}/api/posts/share/{post_id}"))
        .bearer_auth(&author_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    // The other user saves and shares it.
    let response = client
        .patch(format!("{address}/api/posts/save/{post_id}"))
        .bearer_auth(&saver_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = client
        .post(format!("{address}/api/posts/share/{post_id}"))
        .bearer_auth(&saver_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    // A second share by the same user is rejected.
    let response = client
        .post(format!("{address}/api/posts/share/{post_id}"))
        .bearer_auth(&saver_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    // The author deletes the original.
    let response = client
        .delete(format!("{address}/api/posts/{post_id}"))
        .bearer_auth(&author_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // Original and its share are both gone.
    let remaining: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM posts WHERE id = $1 OR original_post = $1")
            .bind(post_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(remaining, 0);

    // The saver's savedPosts array no longer references it.
    let saved: Vec<Uuid> = sqlx::query_scalar("SELECT saved_posts FROM users WHERE id = $1")
        .bind(saver)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!saved.contains(&post_id));
}
