// src/routes.rs

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::Method,
    middleware,
    routing::{delete, get, patch, post},
};
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{auth, comment, community, notification, post as posts, user},
    state::AppState,
    utils::jwt::{auth_middleware, owner_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, users, posts, comments, communities,
///   notifications).
/// * Applies global middleware (Trace, CORS) and the per-route auth gates.
/// * Injects global state.
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    // Brute-force protection on credential endpoints.
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(10)
        .burst_size(30)
        .finish()
        .unwrap();
    let governor_conf = Arc::new(governor_conf);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/register", post(auth::register))
        .layer(GovernorLayer::new(governor_conf))
        .merge(
            Router::new()
                .route("/refresh", get(auth::refresh_token))
                .route("/logout", get(auth::logout))
                .route("/forget-password", post(auth::create_reset_password_token))
                .route("/forget-password/{token}", patch(auth::reset_user_password)),
        )
        // Self-or-owner routes: auth first, then the subject/path check
        .merge(
            Router::new()
                .route("/update/{userId}", post(auth::update_user))
                .route("/update-password/{userId}", post(auth::update_password))
                .route("/delete/{userId}", delete(auth::delete_user))
                .layer(middleware::from_fn(owner_middleware))
                .layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        );

    let user_routes = Router::new()
        .route("/", get(user::get_users))
        .route("/popular", get(user::get_users_by_created_posts))
        .route("/me", get(user::get_current_user))
        .route("/{userId}", get(user::get_user))
        .route("/follow/{followUserId}", patch(user::follow_user))
        .route("/unfollow/{unfollowUserId}", patch(user::unfollow_user))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let post_routes = Router::new()
        .route("/", get(posts::get_posts))
        .route("/{postId}", get(posts::get_post))
        .merge(
            Router::new()
                .route("/following", get(posts::get_posts_by_following))
                .route(
                    "/community/{communityId}",
                    get(posts::get_posts_by_community).post(posts::create_post),
                )
                .route("/user/{userId}", get(posts::get_posts_by_user))
                .route("/", post(posts::create_post))
                .route(
                    "/{postId}",
                    patch(posts::update_post).delete(posts::delete_post),
                )
                .route("/like/{postId}", patch(posts::like_post))
                .route("/unlike/{postId}", patch(posts::unlike_post))
                .route("/save/{postId}", patch(posts::save_post))
                .route("/unsave/{postId}", patch(posts::unsave_post))
                .route("/share/{postId}", post(posts::share_post))
                .route("/unshare/{postId}", post(posts::unshare_post))
                // Up to 10 images of 1 MiB each, plus the text fields.
                .layer(DefaultBodyLimit::max(12 * 1024 * 1024))
                .layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        );

    let comment_routes = Router::new()
        .route("/", get(comment::get_comments))
        .route("/{id}", get(comment::get_comment))
        .merge(
            Router::new()
                .route(
                    "/{id}",
                    post(comment::create_comment).delete(comment::delete_comment_and_replies),
                )
                .route(
                    "/reply/{id}",
                    post(comment::create_reply_to_comment).delete(comment::delete_reply),
                )
                .layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        );

    let community_routes = Router::new()
        .route("/", get(community::get_communities))
        .route("/{communityId}", get(community::get_community))
        .merge(
            Router::new()
                .route("/", post(community::create_community))
                .route(
                    "/{communityId}",
                    patch(community::update_community).delete(community::delete_community),
                )
                .route("/members/{communityId}", get(community::get_members_by_community))
                .route("/requests/{communityId}", get(community::get_requests_by_community))
                .route("/join/{communityId}", patch(community::join_community))
                .route("/leave/{communityId}", patch(community::leave_community))
                .route("/request/{communityId}", patch(community::request_membership))
                .route("/unrequest/{communityId}", patch(community::delete_request_membership))
                .route(
                    "/accept/{communityId}/{requestingUserId}",
                    patch(community::accept_membership),
                )
                .route(
                    "/deny/{communityId}/{requestingUserId}",
                    patch(community::deny_membership),
                )
                .route(
                    "/member/{communityId}/{memberId}",
                    delete(community::delete_member),
                )
                .layer(DefaultBodyLimit::max(4 * 1024 * 1024))
                .layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        );

    let notification_routes = Router::new()
        .route("/", get(notification::get_notifications))
        .route("/read", patch(notification::mark_all_notifications_read))
        .route("/read/{notificationId}", patch(notification::mark_notification_read))
        .route("/stream", get(notification::stream_notifications))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/users", user_routes)
        .nest("/api/posts", post_routes)
        .nest("/api/comments", comment_routes)
        .nest("/api/communities", community_routes)
        .nest("/api/notifications", notification_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
