/**
 * Blog Routes
 * Lifecycle of the blog aggregate: create, list, fetch, edit, delete, like
 */
use axum::{
    extract::{Multipart, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json as Jsonb;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::db::{
    self,
    models::{Author, Blog, Comment},
};
use crate::routes::auth::{authenticate, caller_id, can_mutate, fetch_caller};
use crate::routes::error::ApiError;
use crate::routes::upload;

const BLOG_COLUMNS: &str =
    "id, title, content, author, picture, creation_date, comments, likes";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for PATCH /blogs/editBlog/:blogId
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct UpdateBlogRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub picture: Option<String>,
}

/// Reply as serialized to clients, display name joined in at read time.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyView {
    pub user_id: Uuid,
    pub user_name: String,
    pub text: String,
    pub creation_date: DateTime<Utc>,
}

/// Comment as serialized to clients.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub text: String,
    pub creation_date: DateTime<Utc>,
    pub replies: Vec<ReplyView>,
}

/// Full blog document as serialized to clients.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogView {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub author: Author,
    pub picture: Option<String>,
    pub creation_date: DateTime<Utc>,
    pub comments: Vec<CommentView>,
    pub likes: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlogResponse {
    pub message: String,
    pub blog: BlogView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlogListResponse {
    pub message: String,
    pub blogs: Vec<BlogView>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Parse a path segment as a blog/comment id.
pub(crate) fn parse_entity_id(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::Validation(format!("Invalid {} ID format.", what)))
}

/// Fetch one aggregate or 404.
pub(crate) async fn fetch_blog(pool: &PgPool, id: Uuid) -> Result<Blog, ApiError> {
    let blog = sqlx::query_as::<_, Blog>(&format!(
        "SELECT {} FROM blogs WHERE id = $1",
        BLOG_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    blog.ok_or_else(|| ApiError::NotFound("Blog post not found.".to_string()))
}

/// Every distinct user id appearing in a comment list (commenters and
/// repliers), in first-seen order.
pub(crate) fn collect_commenter_ids(comments: &[Comment]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for comment in comments {
        if seen.insert(comment.user_id) {
            ids.push(comment.user_id);
        }
        for reply in &comment.replies {
            if seen.insert(reply.user_id) {
                ids.push(reply.user_id);
            }
        }
    }
    ids
}

/// Resolve display names for a set of user ids in one query.
pub(crate) async fn user_names(
    pool: &PgPool,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, String>, ApiError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(Uuid, String)> =
        sqlx::query_as("SELECT id, user_name FROM users WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().collect())
}

fn name_for(names: &HashMap<Uuid, String>, id: Uuid) -> String {
    names
        .get(&id)
        .cloned()
        .unwrap_or_else(|| "unknown".to_string())
}

pub(crate) fn build_comment_views(
    comments: &[Comment],
    names: &HashMap<Uuid, String>,
) -> Vec<CommentView> {
    comments
        .iter()
        .map(|c| CommentView {
            id: c.id,
            user_id: c.user_id,
            user_name: name_for(names, c.user_id),
            text: c.text.clone(),
            creation_date: c.creation_date,
            replies: c
                .replies
                .iter()
                .map(|r| ReplyView {
                    user_id: r.user_id,
                    user_name: name_for(names, r.user_id),
                    text: r.text.clone(),
                    creation_date: r.creation_date,
                })
                .collect(),
        })
        .collect()
}

fn build_blog_view(blog: Blog, names: &HashMap<Uuid, String>) -> BlogView {
    let comments = build_comment_views(&blog.comments.0, names);
    BlogView {
        id: blog.id,
        title: blog.title,
        content: blog.content,
        author: blog.author.0,
        picture: blog.picture,
        creation_date: blog.creation_date,
        comments,
        likes: blog.likes.map(|l| l.0).unwrap_or_default(),
    }
}

/// Serialize one aggregate for a response, joining commenter names.
pub(crate) async fn blog_view(pool: &PgPool, blog: Blog) -> Result<BlogView, ApiError> {
    let ids = collect_commenter_ids(&blog.comments.0);
    let names = user_names(pool, &ids).await?;
    Ok(build_blog_view(blog, &names))
}

/// Serialize many aggregates with a single name lookup across all of them.
async fn blog_views(pool: &PgPool, blogs: Vec<Blog>) -> Result<Vec<BlogView>, ApiError> {
    let mut ids = Vec::new();
    let mut seen = HashSet::new();
    for blog in &blogs {
        for id in collect_commenter_ids(&blog.comments.0) {
            if seen.insert(id) {
                ids.push(id);
            }
        }
    }
    let names = user_names(pool, &ids).await?;
    Ok(blogs
        .into_iter()
        .map(|b| build_blog_view(b, &names))
        .collect())
}

/// Partial update: a field is replaced only when a non-empty value arrives.
/// Absent or empty fields stay untouched, so a field cannot be cleared
/// through this operation.
fn apply_edit(blog: &mut Blog, update: &UpdateBlogRequest) {
    if let Some(title) = update
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        blog.title = title.to_string();
    }
    if let Some(content) = update
        .content
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        blog.content = ammonia::clean(content);
    }
    if let Some(picture) = update
        .picture
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
    {
        blog.picture = Some(picture.to_string());
    }
}

/// Append `caller` to the like list, initializing it when the document
/// predates the feature. Returns `None` when the caller already liked.
fn record_like(likes: Option<Vec<Uuid>>, caller: Uuid) -> Option<Vec<Uuid>> {
    let mut likes = likes.unwrap_or_default();
    if likes.contains(&caller) {
        return None;
    }
    likes.push(caller);
    Some(likes)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /blogs/addBlog - Create a blog post (auth required, multipart)
pub async fn add_blog(
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authenticate(&headers)?;

    let mut title = String::new();
    let mut content = String::new();
    let mut picture_upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::Validation("Invalid multipart data.".to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "title" => {
                title = field
                    .text()
                    .await
                    .map_err(|_| ApiError::Validation("Invalid title field.".to_string()))?;
            }
            "content" => {
                content = field
                    .text()
                    .await
                    .map_err(|_| ApiError::Validation("Invalid content field.".to_string()))?;
            }
            "picture" => {
                let file_name = field.file_name().unwrap_or("unknown").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::Validation("Failed to read file data.".to_string()))?;
                if !bytes.is_empty() {
                    picture_upload = Some((file_name, bytes.to_vec()));
                }
            }
            _ => {}
        }
    }

    if title.trim().is_empty() || content.trim().is_empty() {
        return Err(ApiError::Validation(
            "Title and Content are required.".to_string(),
        ));
    }

    let pool = db::get_pool().ok_or(ApiError::Unavailable)?;

    // Author identity comes from the stored record, not the token claims.
    let caller = fetch_caller(pool.as_ref(), &claims).await?;
    let author = Author {
        user_id: caller.id,
        user_name: caller.user_name,
        profile_picture: caller.profile_picture,
    };

    // The image lands in the content store before the insert; a failed
    // insert leaves the file behind.
    let picture = match picture_upload {
        Some((file_name, bytes)) => Some(upload::save_image(&file_name, &bytes).await?),
        None => None,
    };

    let content = ammonia::clean(content.trim());

    let blog = sqlx::query_as::<_, Blog>(&format!(
        "INSERT INTO blogs (title, content, author, picture, comments) \
         VALUES ($1, $2, $3, $4, '[]'::jsonb) \
         RETURNING {}",
        BLOG_COLUMNS
    ))
    .bind(title.trim())
    .bind(&content)
    .bind(Jsonb(&author))
    .bind(&picture)
    .fetch_one(pool.as_ref())
    .await?;

    tracing::info!("Blog created: {} by {}", blog.id, author.user_name);

    Ok((
        StatusCode::CREATED,
        Json(BlogResponse {
            message: "Blog created successfully.".to_string(),
            blog: blog_view(pool.as_ref(), blog).await?,
        }),
    ))
}

/// GET /blogs/getBlogPost - All blog posts, newest first
pub async fn list_blogs() -> Result<impl IntoResponse, ApiError> {
    let pool = db::get_pool().ok_or(ApiError::Unavailable)?;

    let blogs = sqlx::query_as::<_, Blog>(&format!(
        "SELECT {} FROM blogs ORDER BY creation_date DESC",
        BLOG_COLUMNS
    ))
    .fetch_all(pool.as_ref())
    .await?;

    if blogs.is_empty() {
        return Err(ApiError::NotFound("No blog posts found.".to_string()));
    }

    Ok((
        StatusCode::OK,
        Json(BlogListResponse {
            message: "Blog posts fetched successfully.".to_string(),
            blogs: blog_views(pool.as_ref(), blogs).await?,
        }),
    ))
}

/// GET /blogs/getBlog/:blogId - Single blog post
pub async fn get_blog(Path(blog_id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let id = parse_entity_id(&blog_id, "blog post")?;
    let pool = db::get_pool().ok_or(ApiError::Unavailable)?;
    let blog = fetch_blog(pool.as_ref(), id).await?;

    Ok((
        StatusCode::OK,
        Json(BlogResponse {
            message: "Blog post fetched successfully.".to_string(),
            blog: blog_view(pool.as_ref(), blog).await?,
        }),
    ))
}

/// PATCH /blogs/editBlog/:blogId - Partial update (auth, author only)
pub async fn edit_blog(
    headers: HeaderMap,
    Path(blog_id): Path<String>,
    Json(payload): Json<UpdateBlogRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authenticate(&headers)?;
    let id = parse_entity_id(&blog_id, "blog post")?;
    let pool = db::get_pool().ok_or(ApiError::Unavailable)?;

    let mut blog = fetch_blog(pool.as_ref(), id).await?;

    if blog.author.0.user_id != caller_id(&claims)? {
        return Err(ApiError::Forbidden(
            "You are not authorized to edit this blog post.".to_string(),
        ));
    }

    apply_edit(&mut blog, &payload);

    sqlx::query("UPDATE blogs SET title = $1, content = $2, picture = $3 WHERE id = $4")
        .bind(&blog.title)
        .bind(&blog.content)
        .bind(&blog.picture)
        .bind(id)
        .execute(pool.as_ref())
        .await?;

    Ok((
        StatusCode::OK,
        Json(BlogResponse {
            message: "Blog updated successfully.".to_string(),
            blog: blog_view(pool.as_ref(), blog).await?,
        }),
    ))
}

/// DELETE /blogs/deleteBlog/:blogId - Remove the whole aggregate
/// (auth, author or admin)
pub async fn delete_blog(
    headers: HeaderMap,
    Path(blog_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authenticate(&headers)?;
    let id = parse_entity_id(&blog_id, "blog post")?;
    let pool = db::get_pool().ok_or(ApiError::Unavailable)?;

    let blog = fetch_blog(pool.as_ref(), id).await?;

    if !can_mutate(pool.as_ref(), &claims, blog.author.0.user_id).await? {
        return Err(ApiError::Forbidden(
            "Access denied. Author or admin privileges are required.".to_string(),
        ));
    }

    // Single-document delete: the embedded comments and replies go with it.
    sqlx::query("DELETE FROM blogs WHERE id = $1")
        .bind(id)
        .execute(pool.as_ref())
        .await?;

    tracing::info!("Blog deleted: {}", id);

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "message": "Blog deleted successfully." })),
    ))
}

/// PATCH /blogs/likeBlog/:blogId - Like a post once (auth required)
pub async fn like_blog(
    headers: HeaderMap,
    Path(blog_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authenticate(&headers)?;
    let id = parse_entity_id(&blog_id, "blog post")?;
    let pool = db::get_pool().ok_or(ApiError::Unavailable)?;

    let mut blog = fetch_blog(pool.as_ref(), id).await?;

    let caller = caller_id(&claims)?;
    let likes = record_like(blog.likes.take().map(|l| l.0), caller)
        .ok_or_else(|| ApiError::Conflict("Blog already liked.".to_string()))?;

    // Whole-list rewrite; a concurrent like on the same post can be lost.
    sqlx::query("UPDATE blogs SET likes = $1 WHERE id = $2")
        .bind(Jsonb(&likes))
        .bind(id)
        .execute(pool.as_ref())
        .await?;

    blog.likes = Some(Jsonb(likes));

    Ok((
        StatusCode::OK,
        Json(BlogResponse {
            message: "Blog liked successfully.".to_string(),
            blog: blog_view(pool.as_ref(), blog).await?,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Reply, User};
    use crate::routes::auth::create_access_token;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::{delete, get, patch, post};
    use axum::Router;
    use tower::ServiceExt;

    fn blog_router() -> Router {
        Router::new()
            .route("/blogs/addBlog", post(add_blog))
            .route("/blogs/getBlogPost", get(list_blogs))
            .route("/blogs/getBlog/{blogId}", get(get_blog))
            .route("/blogs/editBlog/{blogId}", patch(edit_blog))
            .route("/blogs/deleteBlog/{blogId}", delete(delete_blog))
            .route("/blogs/likeBlog/{blogId}", patch(like_blog))
    }

    fn bearer() -> String {
        let user = User {
            id: Uuid::new_v4(),
            email: "author@example.com".to_string(),
            user_name: "author".to_string(),
            password_hash: "irrelevant".to_string(),
            is_admin: false,
            profile_picture: None,
            created_at: Utc::now(),
        };
        format!("Bearer {}", create_access_token(&user).unwrap())
    }

    fn sample_blog() -> Blog {
        Blog {
            id: Uuid::new_v4(),
            title: "First post".to_string(),
            content: "Hello".to_string(),
            author: Jsonb(Author {
                user_id: Uuid::new_v4(),
                user_name: "author".to_string(),
                profile_picture: None,
            }),
            picture: None,
            creation_date: Utc::now(),
            comments: Jsonb(Vec::new()),
            likes: None,
        }
    }

    #[test]
    fn test_apply_edit_replaces_only_supplied_fields() {
        let mut blog = sample_blog();
        apply_edit(
            &mut blog,
            &UpdateBlogRequest {
                content: Some("Updated body".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(blog.title, "First post");
        assert_eq!(blog.content, "Updated body");
        assert_eq!(blog.picture, None);
    }

    #[test]
    fn test_apply_edit_ignores_empty_values() {
        let mut blog = sample_blog();
        apply_edit(
            &mut blog,
            &UpdateBlogRequest {
                title: Some("   ".to_string()),
                content: Some(String::new()),
                picture: None,
            },
        );
        // Empty input cannot clear a field.
        assert_eq!(blog.title, "First post");
        assert_eq!(blog.content, "Hello");
    }

    #[test]
    fn test_record_like_appends_then_conflicts() {
        let caller = Uuid::new_v4();
        let likes = record_like(None, caller).unwrap();
        assert_eq!(likes, vec![caller]);
        assert!(record_like(Some(likes.clone()), caller).is_none());
        let other = Uuid::new_v4();
        let likes = record_like(Some(likes), other).unwrap();
        assert_eq!(likes.len(), 2);
    }

    #[test]
    fn test_collect_commenter_ids_dedups_across_replies() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let comments = vec![
            Comment {
                id: Uuid::new_v4(),
                user_id: alice,
                text: "first".to_string(),
                creation_date: Utc::now(),
                replies: vec![Reply {
                    user_id: bob,
                    text: "reply".to_string(),
                    creation_date: Utc::now(),
                }],
            },
            Comment {
                id: Uuid::new_v4(),
                user_id: bob,
                text: "second".to_string(),
                creation_date: Utc::now(),
                replies: Vec::new(),
            },
        ];
        assert_eq!(collect_commenter_ids(&comments), vec![alice, bob]);
    }

    #[test]
    fn test_build_comment_views_falls_back_for_unknown_users() {
        let alice = Uuid::new_v4();
        let comments = vec![Comment {
            id: Uuid::new_v4(),
            user_id: alice,
            text: "hi".to_string(),
            creation_date: Utc::now(),
            replies: Vec::new(),
        }];
        let mut names = HashMap::new();
        names.insert(alice, "alice".to_string());
        let views = build_comment_views(&comments, &names);
        assert_eq!(views[0].user_name, "alice");

        let views = build_comment_views(&comments, &HashMap::new());
        assert_eq!(views[0].user_name, "unknown");
    }

    #[tokio::test]
    async fn test_add_blog_without_token_returns_unauthorized() {
        let req = Request::post("/blogs/addBlog")
            .header(
                "content-type",
                "multipart/form-data; boundary=fieldboundary",
            )
            .body(Body::empty())
            .unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_get_blog_invalid_id_returns_bad_request() {
        let req = Request::get("/blogs/getBlog/not-a-uuid")
            .body(Body::empty())
            .unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_edit_blog_invalid_id_returns_bad_request() {
        let body = serde_json::to_vec(&UpdateBlogRequest {
            title: Some("new".to_string()),
            ..Default::default()
        })
        .unwrap();
        let req = Request::patch("/blogs/editBlog/not-a-uuid")
            .header("authorization", bearer())
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_edit_blog_without_token_returns_unauthorized() {
        let body = serde_json::to_vec(&UpdateBlogRequest::default()).unwrap();
        let req = Request::patch(format!("/blogs/editBlog/{}", Uuid::new_v4()))
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_delete_blog_without_token_returns_unauthorized() {
        let req = Request::delete(format!("/blogs/deleteBlog/{}", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_like_blog_invalid_id_returns_bad_request() {
        let req = Request::patch("/blogs/likeBlog/not-a-uuid")
            .header("authorization", bearer())
            .body(Body::empty())
            .unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
