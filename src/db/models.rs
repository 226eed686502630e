//! Database Models - the user table row and the blog aggregate document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// User credential record. Never deleted; `is_admin` is only ever set out of
/// band (operator SQL against the `users` table).
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub user_name: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub profile_picture: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Author identity embedded in a blog document, snapshotted at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub user_id: Uuid,
    pub user_name: String,
    pub profile_picture: Option<String>,
}

/// Reply embedded in a comment. Carries no id of its own; the list is
/// append-only and replies cannot be edited or removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub user_id: Uuid,
    pub text: String,
    pub creation_date: DateTime<Utc>,
}

/// Comment embedded in a blog document. Identity is the immutable `user_id`;
/// display names are joined in at read time. `replies` defaults to empty so
/// documents written before replies existed still decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub text: String,
    pub creation_date: DateTime<Utc>,
    #[serde(default)]
    pub replies: Vec<Reply>,
}

/// The blog aggregate: one row per post, with the author snapshot, the
/// ordered comment list and the like list stored as JSONB. The whole
/// document is read and rewritten as one unit; deleting the row removes the
/// embedded comments and replies with it.
///
/// `likes` is nullable: documents created before the like feature existed
/// have no field, and the list is initialized lazily on first like.
#[derive(Debug, Clone, FromRow)]
pub struct Blog {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub author: Json<Author>,
    pub picture: Option<String>,
    pub creation_date: DateTime<Utc>,
    pub comments: Json<Vec<Comment>>,
    pub likes: Option<Json<Vec<Uuid>>>,
}
