/**
 * Comment Routes
 * Lifecycle of the comment and reply subdocuments embedded in a blog
 */
use axum::{
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::types::Json as Jsonb;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{
    self,
    models::{Blog, Comment, Reply},
};
use crate::routes::auth::{authenticate, caller_id, can_mutate};
use crate::routes::blog::{
    blog_view, build_comment_views, collect_commenter_ids, fetch_blog, parse_entity_id,
    user_names, BlogView, CommentView,
};
use crate::routes::error::ApiError;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct CommentRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedBlogResponse {
    pub message: String,
    pub updated_blog: BlogView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommentListResponse {
    pub comments: Vec<CommentView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommentResponse {
    pub comment: CommentView,
}

// ============================================================================
// Helpers
// ============================================================================

pub(crate) fn find_comment(comments: &[Comment], id: Uuid) -> Option<&Comment> {
    comments.iter().find(|c| c.id == id)
}

/// Drop the comment with the given id, keeping the order of the rest.
pub(crate) fn remove_comment_entry(mut comments: Vec<Comment>, id: Uuid) -> Vec<Comment> {
    comments.retain(|c| c.id != id);
    comments
}

/// Append a reply to the comment with the given id. The reply list needs no
/// explicit initialization: decoding already defaults it to empty.
pub(crate) fn push_reply(comments: &mut [Comment], id: Uuid, reply: Reply) -> bool {
    match comments.iter_mut().find(|c| c.id == id) {
        Some(comment) => {
            comment.replies.push(reply);
            true
        }
        None => false,
    }
}

/// Rewrite the aggregate's comment list. Whole-document read-modify-write;
/// two concurrent writers to the same blog can lose one update.
async fn persist_comments(pool: &PgPool, blog_id: Uuid, comments: &[Comment]) -> Result<(), ApiError> {
    sqlx::query("UPDATE blogs SET comments = $1 WHERE id = $2")
        .bind(Jsonb(comments))
        .bind(blog_id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn updated_blog_response(
    pool: &PgPool,
    message: &str,
    blog: Blog,
) -> Result<(StatusCode, Json<UpdatedBlogResponse>), ApiError> {
    Ok((
        StatusCode::OK,
        Json(UpdatedBlogResponse {
            message: message.to_string(),
            updated_blog: blog_view(pool, blog).await?,
        }),
    ))
}

// ============================================================================
// Handlers
// ============================================================================

/// PATCH /blogs/addComment/:blogId - Append a comment (auth required)
pub async fn add_comment(
    headers: HeaderMap,
    Path(blog_id): Path<String>,
    Json(payload): Json<CommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authenticate(&headers)?;

    let text = payload.text.trim().to_string();
    if text.is_empty() {
        return Err(ApiError::Validation("Comment text is required.".to_string()));
    }

    let id = parse_entity_id(&blog_id, "blog")?;
    let pool = db::get_pool().ok_or(ApiError::Unavailable)?;

    let mut blog = fetch_blog(pool.as_ref(), id).await?;

    let comment = Comment {
        id: Uuid::new_v4(),
        user_id: caller_id(&claims)?,
        text,
        creation_date: Utc::now(),
        replies: Vec::new(),
    };

    blog.comments.0.push(comment);
    persist_comments(pool.as_ref(), id, &blog.comments.0).await?;

    updated_blog_response(pool.as_ref(), "Comment added successfully.", blog).await
}

/// GET /blogs/getComments/:blogId - Comment list in stored order
pub async fn get_comments(Path(blog_id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let id = parse_entity_id(&blog_id, "blog")?;
    let pool = db::get_pool().ok_or(ApiError::Unavailable)?;

    let blog = fetch_blog(pool.as_ref(), id).await?;

    let ids = collect_commenter_ids(&blog.comments.0);
    let names = user_names(pool.as_ref(), &ids).await?;

    Ok((
        StatusCode::OK,
        Json(CommentListResponse {
            comments: build_comment_views(&blog.comments.0, &names),
        }),
    ))
}

/// GET /blogs/:blogId/:commentId - Single comment located by id
pub async fn get_comment(
    Path((blog_id, comment_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_entity_id(&blog_id, "blog")?;
    let comment_id = parse_entity_id(&comment_id, "comment")?;
    let pool = db::get_pool().ok_or(ApiError::Unavailable)?;

    let blog = fetch_blog(pool.as_ref(), id).await?;

    let comment = find_comment(&blog.comments.0, comment_id)
        .ok_or_else(|| ApiError::NotFound("Comment not found.".to_string()))?;

    let ids = collect_commenter_ids(std::slice::from_ref(comment));
    let names = user_names(pool.as_ref(), &ids).await?;
    let mut views = build_comment_views(std::slice::from_ref(comment), &names);

    Ok((
        StatusCode::OK,
        Json(CommentResponse {
            comment: views.remove(0),
        }),
    ))
}

/// POST /blogs/replyComments/:blogId/:commentId - Append a reply
/// (auth required)
pub async fn add_reply(
    headers: HeaderMap,
    Path((blog_id, comment_id)): Path<(String, String)>,
    Json(payload): Json<CommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authenticate(&headers)?;

    let text = payload.text.trim().to_string();
    if text.is_empty() {
        return Err(ApiError::Validation("Reply text is required.".to_string()));
    }

    let id = parse_entity_id(&blog_id, "blog")?;
    let comment_id = parse_entity_id(&comment_id, "comment")?;
    let pool = db::get_pool().ok_or(ApiError::Unavailable)?;

    let mut blog = fetch_blog(pool.as_ref(), id).await?;

    let reply = Reply {
        user_id: caller_id(&claims)?,
        text,
        creation_date: Utc::now(),
    };

    if !push_reply(&mut blog.comments.0, comment_id, reply) {
        return Err(ApiError::NotFound("Comment not found.".to_string()));
    }

    persist_comments(pool.as_ref(), id, &blog.comments.0).await?;

    updated_blog_response(pool.as_ref(), "Reply added successfully.", blog).await
}

/// PATCH /blogs/removeComment/:blogId/:commentId - Remove a comment
/// (auth, comment author or admin)
pub async fn remove_comment(
    headers: HeaderMap,
    Path((blog_id, comment_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authenticate(&headers)?;

    let id = parse_entity_id(&blog_id, "blog")?;
    let comment_id = parse_entity_id(&comment_id, "comment")?;
    let pool = db::get_pool().ok_or(ApiError::Unavailable)?;

    let mut blog = fetch_blog(pool.as_ref(), id).await?;

    let owner = find_comment(&blog.comments.0, comment_id)
        .ok_or_else(|| ApiError::NotFound("Comment not found.".to_string()))?
        .user_id;

    // Admin status comes from the stored record, not the token claims.
    if !can_mutate(pool.as_ref(), &claims, owner).await? {
        return Err(ApiError::Forbidden(
            "You are not authorized to delete this comment.".to_string(),
        ));
    }

    blog.comments.0 = remove_comment_entry(std::mem::take(&mut blog.comments.0), comment_id);
    persist_comments(pool.as_ref(), id, &blog.comments.0).await?;

    updated_blog_response(pool.as_ref(), "Comment removed successfully.", blog).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::User;
    use crate::routes::auth::create_access_token;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::{get, patch, post};
    use axum::Router;
    use tower::ServiceExt;

    fn comment_router() -> Router {
        Router::new()
            .route("/blogs/addComment/{blogId}", patch(add_comment))
            .route("/blogs/getComments/{blogId}", get(get_comments))
            .route("/blogs/{blogId}/{commentId}", get(get_comment))
            .route(
                "/blogs/replyComments/{blogId}/{commentId}",
                post(add_reply),
            )
            .route(
                "/blogs/removeComment/{blogId}/{commentId}",
                patch(remove_comment),
            )
    }

    fn bearer() -> String {
        let user = User {
            id: Uuid::new_v4(),
            email: "commenter@example.com".to_string(),
            user_name: "commenter".to_string(),
            password_hash: "irrelevant".to_string(),
            is_admin: false,
            profile_picture: None,
            created_at: Utc::now(),
        };
        format!("Bearer {}", create_access_token(&user).unwrap())
    }

    fn comment_with_text(text: &str) -> Comment {
        Comment {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            text: text.to_string(),
            creation_date: Utc::now(),
            replies: Vec::new(),
        }
    }

    #[test]
    fn test_find_comment_locates_by_id() {
        let comments = vec![comment_with_text("a"), comment_with_text("b")];
        let target = comments[1].id;
        assert_eq!(find_comment(&comments, target).unwrap().text, "b");
        assert!(find_comment(&comments, Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_remove_comment_entry_keeps_order() {
        let comments = vec![
            comment_with_text("first"),
            comment_with_text("second"),
            comment_with_text("third"),
        ];
        let removed = comments[1].id;
        let remaining = remove_comment_entry(comments, removed);
        let texts: Vec<&str> = remaining.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "third"]);
    }

    #[test]
    fn test_remove_comment_entry_unknown_id_is_noop() {
        let comments = vec![comment_with_text("only")];
        let remaining = remove_comment_entry(comments, Uuid::new_v4());
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn test_push_reply_appends_in_order() {
        let mut comments = vec![comment_with_text("root")];
        let target = comments[0].id;
        let author = Uuid::new_v4();
        for text in ["first", "second"] {
            assert!(push_reply(
                &mut comments,
                target,
                Reply {
                    user_id: author,
                    text: text.to_string(),
                    creation_date: Utc::now(),
                },
            ));
        }
        let texts: Vec<&str> = comments[0].replies.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_push_reply_missing_comment_returns_false() {
        let mut comments = vec![comment_with_text("root")];
        assert!(!push_reply(
            &mut comments,
            Uuid::new_v4(),
            Reply {
                user_id: Uuid::new_v4(),
                text: "orphan".to_string(),
                creation_date: Utc::now(),
            },
        ));
        assert!(comments[0].replies.is_empty());
    }

    #[tokio::test]
    async fn test_add_comment_empty_text_returns_bad_request() {
        let body = serde_json::to_vec(&CommentRequest {
            text: "   ".to_string(),
        })
        .unwrap();
        let req = Request::patch(format!("/blogs/addComment/{}", Uuid::new_v4()))
            .header("authorization", bearer())
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = comment_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_add_comment_without_token_returns_unauthorized() {
        let body = serde_json::to_vec(&CommentRequest {
            text: "nice post".to_string(),
        })
        .unwrap();
        let req = Request::patch(format!("/blogs/addComment/{}", Uuid::new_v4()))
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = comment_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_add_reply_empty_text_returns_bad_request() {
        let body = serde_json::to_vec(&CommentRequest {
            text: String::new(),
        })
        .unwrap();
        let req = Request::post(format!(
            "/blogs/replyComments/{}/{}",
            Uuid::new_v4(),
            Uuid::new_v4()
        ))
        .header("authorization", bearer())
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
        let res = comment_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_remove_comment_invalid_comment_id_returns_bad_request() {
        let req = Request::patch(format!(
            "/blogs/removeComment/{}/not-a-uuid",
            Uuid::new_v4()
        ))
        .header("authorization", bearer())
        .body(Body::empty())
        .unwrap();
        let res = comment_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_comments_invalid_id_returns_bad_request() {
        let req = Request::get("/blogs/getComments/not-a-uuid")
            .body(Body::empty())
            .unwrap();
        let res = comment_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_comment_invalid_ids_return_bad_request() {
        let req = Request::get("/blogs/not-a-uuid/also-not-a-uuid")
            .body(Body::empty())
            .unwrap();
        let res = comment_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
