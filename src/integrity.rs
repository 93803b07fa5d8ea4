// src/integrity.rs
//
// Referential-integrity maintainer.
//
// Relationships are denormalized id arrays stored on both sides (e.g. a
// follow lives in one user's `following` and the other's `followers`).
// This module owns every multi-document mutation that has to keep those
// arrays consistent: symmetric edge updates, notification recording, and
// the cascading deletes for comments, posts, communities and users.
//
// Symmetric edge updates run on a caller-provided connection so handlers
// can wrap both writes in one transaction. Cascades intentionally run as a
// sequence of independent writes on the pool: a crash mid-cascade leaves a
// partially-updated data model, which is the documented behavior of the
// system.

use std::collections::{HashMap, HashSet};

use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::community::Community;
use crate::models::notification::Notification;
use crate::models::post::{Post, ShareRecord};
use crate::storage::ObjectStorage;

/// Defensive cap on reply-tree traversal depth.
pub const MAX_REPLY_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// Symmetric follow edges
// ---------------------------------------------------------------------------

/// Adds the follower -> followee edge to both users' arrays.
/// Caller is expected to run this inside a transaction.
pub async fn follow_edge(
    conn: &mut PgConnection,
    follower: Uuid,
    followee: Uuid,
) -> Result<(), AppError> {
    sqlx::query("UPDATE users SET following = array_append(following, $2), updated_at = NOW() WHERE id = $1")
        .bind(follower)
        .bind(followee)
        .execute(&mut *conn)
        .await?;

    sqlx::query("UPDATE users SET followers = array_append(followers, $2), updated_at = NOW() WHERE id = $1")
        .bind(followee)
        .bind(follower)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Removes the follower -> followee edge from both users' arrays.
pub async fn unfollow_edge(
    conn: &mut PgConnection,
    follower: Uuid,
    followee: Uuid,
) -> Result<(), AppError> {
    sqlx::query("UPDATE users SET following = array_remove(following, $2), updated_at = NOW() WHERE id = $1")
        .bind(follower)
        .bind(followee)
        .execute(&mut *conn)
        .await?;

    sqlx::query("UPDATE users SET followers = array_remove(followers, $2), updated_at = NOW() WHERE id = $1")
        .bind(followee)
        .bind(follower)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Records a follow/like/share notification for `user_id`.
///
/// Returns the stored row so the caller can relay it to the realtime hub
/// once its surrounding transaction has committed.
pub async fn record_notification(
    conn: &mut PgConnection,
    user_id: Uuid,
    sender_id: Uuid,
    notification_type: &str,
    content: &str,
    post_id: Option<Uuid>,
) -> Result<Notification, AppError> {
    let notification = sqlx::query_as::<_, Notification>(
        r#"
        INSERT INTO notifications (user_id, sender_id, content, type, post_id)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, user_id, sender_id, content, type, is_read, post_id, created_at, updated_at
        "#,
    )
    .bind(user_id)
    .bind(sender_id)
    .bind(content)
    .bind(notification_type)
    .bind(post_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(notification)
}

// ---------------------------------------------------------------------------
// Share records
// ---------------------------------------------------------------------------

/// Appends a `{user, sharedAt}` record to the original post's sharedBy list.
pub async fn push_share_record(
    conn: &mut PgConnection,
    original_post: Uuid,
    user: Uuid,
) -> Result<(), AppError> {
    let record = ShareRecord {
        user,
        shared_at: chrono::Utc::now(),
    };

    sqlx::query("UPDATE posts SET shared_by = shared_by || $2, updated_at = NOW() WHERE id = $1")
        .bind(original_post)
        .bind(Json(record))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Drops the given user's `{user, sharedAt}` record from a post's sharedBy
/// list.
pub async fn pull_share_record(
    conn: &mut PgConnection,
    original_post: Uuid,
    user: Uuid,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE posts
        SET shared_by = COALESCE(
                (SELECT jsonb_agg(elem)
                 FROM jsonb_array_elements(shared_by) AS elem
                 WHERE elem->>'user' <> $2),
                '[]'::jsonb),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(original_post)
    .bind(user.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Deletes a share post and detaches it everywhere: the sharer's posts
/// array and the original's sharedBy list.
pub async fn remove_share(pool: &PgPool, share: &Post) -> Result<(), AppError> {
    sqlx::query("DELETE FROM posts WHERE id = $1")
        .bind(share.id)
        .execute(pool)
        .await?;

    sqlx::query("UPDATE users SET posts = array_remove(posts, $2), updated_at = NOW() WHERE id = $1")
        .bind(share.author)
        .bind(share.id)
        .execute(pool)
        .await?;

    if let Some(original) = share.original_post {
        let mut conn = pool.acquire().await?;
        pull_share_record(&mut *conn, original, share.author).await?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Comment subtree deletion
// ---------------------------------------------------------------------------

/// Computes the deletion order for a comment subtree from its adjacency
/// list: every descendant comes before its ancestor, so the subtree drains
/// bottom-up and the root goes last.
///
/// Walks with an explicit stack (no recursion), skips ids it has already
/// seen (a cycle in the stored data must not hang the walk) and refuses
/// trees deeper than `MAX_REPLY_DEPTH`.
pub fn plan_subtree_deletion(
    root: Uuid,
    replies_of: &HashMap<Uuid, Vec<Uuid>>,
) -> Result<Vec<Uuid>, AppError> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![(root, 0usize)];

    while let Some((id, depth)) = stack.pop() {
        if depth > MAX_REPLY_DEPTH {
            return Err(AppError::Validation("Comment thread too deep.".to_string()));
        }
        if !seen.insert(id) {
            continue;
        }
        order.push(id);
        if let Some(children) = replies_of.get(&id) {
            for child in children {
                stack.push((*child, depth + 1));
            }
        }
    }

    // A node is appended before any of its descendants; reversed, the
    // subtree drains children-first.
    order.reverse();
    Ok(order)
}

/// Deletes a comment and its entire reply subtree, children first.
///
/// Ids that no longer resolve are walked past ("skip if not found"); the
/// root itself is deleted last. Returns the number of rows removed. The
/// caller still has to pull the root id from whichever parent list
/// referenced it.
pub async fn delete_comment_subtree(pool: &PgPool, root: Uuid) -> Result<u64, AppError> {
    // Discovery pass: adjacency of the stored subtree.
    let mut replies_of: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    let mut stack = vec![(root, 0usize)];

    while let Some((id, depth)) = stack.pop() {
        if depth > MAX_REPLY_DEPTH {
            return Err(AppError::Validation("Comment thread too deep.".to_string()));
        }
        if replies_of.contains_key(&id) {
            continue;
        }

        let replies = sqlx::query_scalar::<_, Vec<Uuid>>("SELECT replies FROM comments WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .unwrap_or_default();

        for reply in &replies {
            stack.push((*reply, depth + 1));
        }
        replies_of.insert(id, replies);
    }

    let order = plan_subtree_deletion(root, &replies_of)?;

    let mut deleted = 0;
    for id in order {
        let result = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        deleted += result.rows_affected();
    }

    Ok(deleted)
}

/// Pulls a deleted top-level comment out of the post that referenced it.
pub async fn pull_comment_from_post(pool: &PgPool, comment_id: Uuid) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE posts SET comments = array_remove(comments, $1), updated_at = NOW() WHERE $1 = ANY(comments)",
    )
    .bind(comment_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Pulls a deleted reply out of its parent comment's replies array.
pub async fn pull_reply_from_parent(pool: &PgPool, comment_id: Uuid) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE comments SET replies = array_remove(replies, $1), updated_at = NOW() WHERE $1 = ANY(replies)",
    )
    .bind(comment_id)
    .execute(pool)
    .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Post deletion cascade
// ---------------------------------------------------------------------------

/// Deletes an original post and everything hanging off it:
/// comment subtrees, the author's posts entry, every share of the post
/// (each detached from its sharer's posts array), saved-post references,
/// the owning community's posts entry, the stored images, and finally the
/// post row itself.
pub async fn delete_post_cascade(
    pool: &PgPool,
    storage: &dyn ObjectStorage,
    post: &Post,
) -> Result<(), AppError> {
    // Comment subtrees first.
    for comment_id in &post.comments {
        delete_comment_subtree(pool, *comment_id).await?;
    }

    // Author's posts array.
    sqlx::query("UPDATE users SET posts = array_remove(posts, $2), updated_at = NOW() WHERE id = $1")
        .bind(post.author)
        .bind(post.id)
        .execute(pool)
        .await?;

    // Shares of this post.
    let shares = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE original_post = $1")
        .bind(post.id)
        .fetch_all(pool)
        .await?;

    for share in &shares {
        sqlx::query("UPDATE users SET posts = array_remove(posts, $2), updated_at = NOW() WHERE id = $1")
            .bind(share.author)
            .bind(share.id)
            .execute(pool)
            .await?;

        sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(share.id)
            .execute(pool)
            .await?;
    }

    // Saved-post references.
    sqlx::query(
        "UPDATE users SET saved_posts = array_remove(saved_posts, $1), updated_at = NOW() WHERE $1 = ANY(saved_posts)",
    )
    .bind(post.id)
    .execute(pool)
    .await?;

    // Owning community, if any.
    if let Some(community) = post.community {
        sqlx::query("UPDATE communities SET posts = array_remove(posts, $2), updated_at = NOW() WHERE id = $1")
            .bind(community)
            .bind(post.id)
            .execute(pool)
            .await?;
    }

    // Stored images.
    for image in &post.images.0 {
        storage.delete(&image.public_id).await?;
    }

    sqlx::query("DELETE FROM posts WHERE id = $1")
        .bind(post.id)
        .execute(pool)
        .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Community deletion cascade
// ---------------------------------------------------------------------------

/// Deletes the given posts and their stored images.
///
/// This is the community-deletion variant: it does not cascade into the
/// posts' comment subtrees or saved-post references (known gap, kept from
/// the source system).
pub async fn delete_community_posts(
    pool: &PgPool,
    storage: &dyn ObjectStorage,
    post_ids: &[Uuid],
) -> Result<(), AppError> {
    for post_id in post_ids {
        let post = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = $1")
            .bind(post_id)
            .fetch_optional(pool)
            .await?;

        if let Some(post) = post {
            for image in &post.images.0 {
                storage.delete(&image.public_id).await?;
            }

            sqlx::query("DELETE FROM posts WHERE id = $1")
                .bind(post.id)
                .execute(pool)
                .await?;
        }
    }

    Ok(())
}

/// Deletes a community: member references, its posts (and their images),
/// its own image, then the community row.
pub async fn delete_community_cascade(
    pool: &PgPool,
    storage: &dyn ObjectStorage,
    community: &Community,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE users SET communities = array_remove(communities, $1), updated_at = NOW() WHERE $1 = ANY(communities)",
    )
    .bind(community.id)
    .execute(pool)
    .await?;

    delete_community_posts(pool, storage, &community.posts).await?;

    if let Some(image) = &community.image {
        storage.delete(&image.0.public_id).await?;
    }

    sqlx::query("DELETE FROM communities WHERE id = $1")
        .bind(community.id)
        .execute(pool)
        .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Account deletion cascade
// ---------------------------------------------------------------------------

/// Deletes a user account and every reference to it:
/// authored originals (full post cascade), authored shares, owned
/// communities (full community cascade), follower/following edges, likes,
/// community memberships and requests, the user's notifications, and the
/// user row itself.
pub async fn delete_user_cascade(
    pool: &PgPool,
    storage: &dyn ObjectStorage,
    user_id: Uuid,
) -> Result<(), AppError> {
    // Authored originals, with their full cascade.
    let originals = sqlx::query_as::<_, Post>(
        "SELECT * FROM posts WHERE author = $1 AND original_post IS NULL",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    for post in &originals {
        delete_post_cascade(pool, storage, post).await?;
    }

    // Whatever the user authored that survives now is a share of someone
    // else's post.
    let shares = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE author = $1")
        .bind(user_id)
        .fetch_all(pool)
        .await?;

    for share in &shares {
        remove_share(pool, share).await?;
    }

    // Owned communities.
    let communities =
        sqlx::query_as::<_, Community>("SELECT * FROM communities WHERE created_by = $1")
            .bind(user_id)
            .fetch_all(pool)
            .await?;

    for community in &communities {
        delete_community_cascade(pool, storage, community).await?;
    }

    // Follower/following edges on other users.
    sqlx::query(
        r#"
        UPDATE users
        SET followers = array_remove(followers, $1),
            following = array_remove(following, $1),
            updated_at = NOW()
        WHERE $1 = ANY(followers) OR $1 = ANY(following)
        "#,
    )
    .bind(user_id)
    .execute(pool)
    .await?;

    // Likes left on other users' posts.
    sqlx::query("UPDATE posts SET likes = array_remove(likes, $1), updated_at = NOW() WHERE $1 = ANY(likes)")
        .bind(user_id)
        .execute(pool)
        .await?;

    // Community membership and pending requests.
    sqlx::query(
        r#"
        UPDATE communities
        SET members = array_remove(members, $1),
            members_requests = array_remove(members_requests, $1),
            updated_at = NOW()
        WHERE $1 = ANY(members) OR $1 = ANY(members_requests)
        "#,
    )
    .bind(user_id)
    .execute(pool)
    .await?;

    // Notifications sent to or by the user.
    sqlx::query("DELETE FROM notifications WHERE user_id = $1 OR sender_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;

    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn plan_orders_children_before_parents() {
        // root -> a, b; a -> c
        let ids = uuids(4);
        let (root, a, b, c) = (ids[0], ids[1], ids[2], ids[3]);

        let mut replies_of = HashMap::new();
        replies_of.insert(root, vec![a, b]);
        replies_of.insert(a, vec![c]);
        replies_of.insert(b, vec![]);
        replies_of.insert(c, vec![]);

        let order = plan_subtree_deletion(root, &replies_of).unwrap();

        assert_eq!(order.len(), 4);
        assert_eq!(*order.last().unwrap(), root);
        let position = |id: Uuid| order.iter().position(|x| *x == id).unwrap();
        assert!(position(c) < position(a));
        assert!(position(a) < position(root));
        assert!(position(b) < position(root));
    }

    #[test]
    fn plan_handles_deep_chains_without_recursion() {
        let ids = uuids(MAX_REPLY_DEPTH + 1);
        let mut replies_of = HashMap::new();
        for pair in ids.windows(2) {
            replies_of.insert(pair[0], vec![pair[1]]);
        }
        replies_of.insert(*ids.last().unwrap(), vec![]);

        let order = plan_subtree_deletion(ids[0], &replies_of).unwrap();
        assert_eq!(order.len(), ids.len());
        // Deepest reply drains first, root last.
        assert_eq!(order[0], *ids.last().unwrap());
        assert_eq!(*order.last().unwrap(), ids[0]);
    }

    #[test]
    fn plan_rejects_overly_deep_trees() {
        let ids = uuids(MAX_REPLY_DEPTH + 2);
        let mut replies_of = HashMap::new();
        for pair in ids.windows(2) {
            replies_of.insert(pair[0], vec![pair[1]]);
        }
        replies_of.insert(*ids.last().unwrap(), vec![]);

        assert!(plan_subtree_deletion(ids[0], &replies_of).is_err());
    }

    #[test]
    fn plan_survives_cycles() {
        // a -> b -> a: stored-data corruption must not hang or duplicate.
        let ids = uuids(2);
        let (a, b) = (ids[0], ids[1]);

        let mut replies_of = HashMap::new();
        replies_of.insert(a, vec![b]);
        replies_of.insert(b, vec![a]);

        let order = plan_subtree_deletion(a, &replies_of).unwrap();
        assert_eq!(order.len(), 2);
        assert_eq!(*order.last().unwrap(), a);
    }

    #[test]
    fn plan_includes_dangling_ids() {
        // A reply id whose row is already gone still shows up in the order;
        // deleting it is a no-op.
        let ids = uuids(2);
        let (root, ghost) = (ids[0], ids[1]);

        let mut replies_of = HashMap::new();
        replies_of.insert(root, vec![ghost]);

        let order = plan_subtree_deletion(root, &replies_of).unwrap();
        assert_eq!(order, vec![ghost, root]);
    }
}
