// tests/community_tests.rs

use std::net::SocketAddr;
use std::sync::Arc;

use snapgram::{
    config::Config, email::Mailer, error::AppError, models::post::ImageRef,
    realtime::NotificationHub, routes, state::AppState, storage::ObjectStorage,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

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

async fn spawn_app() -> (String, PgPool) {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let config = Config {
        database_url,
        jwt_secret: "community_test_secret".to_string(),
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
    };

    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
        storage: Arc::new(NoopStorage),
        mailer: Arc::new(Mailer::from_config(&config).expect("mailer")),
        hub: Arc::new(NotificationHub::new()),
    };

    let app = routes::create_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
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
    let token = body["token"].as_str().unwrap().to_string();

    let user_id: Uuid = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_one(pool)
        .await
        .unwrap();

    (user_id, token)
}

/// Creates a community through the multipart endpoint (no image).
async fn create_community(
    client: &reqwest::Client,
    address: &str,
    pool: &PgPool,
    token: &str,
    community_type: &str,
) -> Uuid {
    let name = unique_handle("comm");

    let form = reqwest::multipart::Form::new()
        .text("name", name.clone())
        .text("username", unique_handle("comm"))
        .text("communityType", community_type.to_string());

    let response = client
        .post(format!("{address}/api/communities"))
        .bearer_auth(token)
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);

    sqlx::query_scalar("SELECT id FROM communities WHERE name = $1")
        .bind(&name)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn private_membership_request_accept_and_delete_flow() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();

    let (owner, owner_token) = register_user(&client, &address, &pool, &unique_handle("ua")).await;
    let (member, member_token) = register_user(&client, &address, &pool, &unique_handle("ub")).await;

    let community_id = create_community(&client, &address, &pool, &owner_token, "Private").await;

    // The creator is implicitly the first member.
    let members: Vec<Uuid> = sqlx::query_scalar("SELECT members FROM communities WHERE id = $1")
        .bind(community_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(members, vec![owner]);

    // Direct join is refused on a Private community.
    let response = client
        .patch(format!("{address}/api/communities/join/{community_id}"))
        .bearer_auth(&member_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    // The creator cannot request membership on their own community.
    let response = client
        .patch(format!("{address}/api/communities/request/{community_id}"))
        .bearer_auth(&owner_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    // U2 requests membership; a duplicate request is rejected.
    let response = client
        .patch(format!("{address}/api/communities/request/{community_id}"))
        .bearer_auth(&member_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let requests: Vec<Uuid> =
        sqlx::query_scalar("SELECT members_requests FROM communities WHERE id = $1")
            .bind(community_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(requests, vec![member]);

    let response = client
        .patch(format!("{address}/api/communities/request/{community_id}"))
        .bearer_auth(&member_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "You have already sent a request.");

    // The owner accepts: requester moves to members, community lands on
    // their list.
    let response = client
        .patch(format!(
            "{address}/api/communities/accept/{community_id}/{member}"
        ))
        .bearer_auth(&owner_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let members: Vec<Uuid> = sqlx::query_scalar("SELECT members FROM communities WHERE id = $1")
        .bind(community_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(members.contains(&member));

    let requests: Vec<Uuid> =
        sqlx::query_scalar("SELECT members_requests FROM communities WHERE id = $1")
            .bind(community_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(requests.is_empty());

    let communities: Vec<Uuid> = sqlx::query_scalar("SELECT communities FROM users WHERE id = $1")
        .bind(member)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(communities.contains(&community_id));

    // Deleting the community detaches it from every member.
    let response = client
        .delete(format!("{address}/api/communities/{community_id}"))
        .bearer_auth(&owner_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let communities: Vec<Uuid> = sqlx::query_scalar("SELECT communities FROM users WHERE id = $1")
        .bind(member)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!communities.contains(&community_id));
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn public_join_guards_and_owner_restrictions() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();

    let (_, owner_token) = register_user(&client, &address, &pool, &unique_handle("ua")).await;
    let (_, member_token) = register_user(&client, &address, &pool, &unique_handle("ub")).await;

    let community_id = create_community(&client, &address, &pool, &owner_token, "Public").await;

    // The creator cannot join their own community.
    let response = client
        .patch(format!("{address}/api/communities/join/{community_id}"))
        .bearer_auth(&owner_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "You cannot join your own community.");

    // Join works once, conflicts the second time.
    let response = client
        .patch(format!("{address}/api/communities/join/{community_id}"))
        .bearer_auth(&member_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = client
        .patch(format!("{address}/api/communities/join/{community_id}"))
        .bearer_auth(&member_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "You have already joined this community.");

    // The owner cannot leave their own community either.
    let response = client
        .patch(format!("{address}/api/communities/leave/{community_id}"))
        .bearer_auth(&owner_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "You cannot leave your own community.");
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn deleting_a_comment_removes_its_whole_reply_subtree() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();

    let (author, token) = register_user(&client, &address, &pool, &unique_handle("ua")).await;

    let post_id: Uuid = sqlx::query_scalar(
        "INSERT INTO posts (caption, location, author) VALUES ('tree', 'Nowhere', $1) RETURNING id",
    )
    .bind(author)
    .fetch_one(&pool)
    .await
    .unwrap();

    // Top-level comment.
    let response = client
        .post(format!("{address}/api/comments/{post_id}"))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "content": "top level comment" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let comments: Vec<Uuid> = sqlx::query_scalar("SELECT comments FROM posts WHERE id = $1")
        .bind(post_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    let root = *comments.last().unwrap();

    // A chain of replies: root <- r1 <- r2, plus a sibling under root.
    let mut parent = root;
    let mut all_ids = vec![root];
    for depth in 0..2 {
        let response = client
            .post(format!("{address}/api/comments/reply/{parent}"))
            .bearer_auth(&token)
            .json(&serde_json::json!({ "content": format!("reply at depth {depth}") }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);

        let replies: Vec<Uuid> = sqlx::query_scalar("SELECT replies FROM comments WHERE id = $1")
            .bind(parent)
            .fetch_one(&pool)
            .await
            .unwrap();
        parent = *replies.last().unwrap();
        all_ids.push(parent);
    }

    let response = client
        .post(format!("{address}/api/comments/reply/{root}"))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "content": "sibling reply" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let replies: Vec<Uuid> = sqlx::query_scalar("SELECT replies FROM comments WHERE id = $1")
        .bind(root)
        .fetch_one(&pool)
        .await
        .unwrap();
    all_ids.extend(replies);
    all_ids.sort_unstable();
    all_ids.dedup();
    assert_eq!(all_ids.len(), 4);

    // Deleting the root comment drains the whole subtree.
    let response = client
        .delete(format!("{address}/api/comments/{root}"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE id = ANY($1)")
        .bind(&all_ids)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);

    // No dangling id survives on the post.
    let comments: Vec<Uuid> = sqlx::query_scalar("SELECT comments FROM posts WHERE id = $1")
        .bind(post_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!comments.contains(&root));

    // Deleting a reply through the top-level endpoint's counterpart:
    // the reply route refuses a top-level comment id.
    let response = client
        .post(format!("{address}/api/comments/{post_id}"))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "content": "another top level" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let comments: Vec<Uuid> = sqlx::query_scalar("SELECT comments FROM posts WHERE id = $1")
        .bind(post_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    let top = *comments.last().unwrap();

    let response = client
        .delete(format!("{address}/api/comments/reply/{top}"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}
