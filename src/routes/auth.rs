/**
 * Authentication Routes
 * Registration, login and profile, plus the JWT helpers and the
 * capability checks the blog/comment handlers share
 */
use axum::{
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{self, models::User};
use crate::routes::error::ApiError;

// ============================================================================
// Configuration
// ============================================================================

lazy_static::lazy_static! {
    /// JWT secret key from environment
    pub static ref JWT_SECRET: String = std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "default-jwt-secret-change-in-production".to_string());

    /// Accepted user name shape: letters, digits, '.', '-' and '_'
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9._-]{1,32}$").unwrap();
}

/// Access token expiry in hours
const ACCESS_TOKEN_EXPIRY_HOURS: i64 = 12;

// ============================================================================
// Types
// ============================================================================

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,      // User ID
    pub username: String, // Display name at issue time
    #[serde(rename = "isAdmin")]
    pub is_admin: bool,   // Admin flag at issue time; re-derived for mutations
    pub exp: i64,         // Expiry timestamp
    pub iat: i64,         // Issued at timestamp
}

/// User record as returned to clients; the password hash never leaves the
/// server.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
    pub user_name: String,
    pub is_admin: bool,
    pub profile_picture: Option<String>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            user_name: user.user_name,
            is_admin: user.is_admin,
            profile_picture: user.profile_picture,
        }
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub user_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub user: UserView,
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Create access token
pub fn create_access_token(user: &User) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let exp = now + Duration::hours(ACCESS_TOKEN_EXPIRY_HOURS);

    let claims = Claims {
        sub: user.id.to_string(),
        username: user.user_name.clone(),
        is_admin: user.is_admin,
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
}

/// Verify and decode access token
pub fn verify_access_token(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(JWT_SECRET.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Extract bearer token from Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Resolve the caller identity for a protected route.
pub fn authenticate(headers: &HeaderMap) -> Result<Claims, ApiError> {
    let token = extract_bearer_token(headers)
        .ok_or_else(|| ApiError::Unauthenticated("Authorization required".to_string()))?;
    verify_access_token(&token)
        .map_err(|_| ApiError::Unauthenticated("Invalid or expired token".to_string()))
}

/// The caller's user id from the token subject.
pub fn caller_id(claims: &Claims) -> Result<Uuid, ApiError> {
    Uuid::parse_str(&claims.sub)
        .map_err(|_| ApiError::Unauthenticated("Invalid token subject".to_string()))
}

/// Re-fetch the caller's record from the credential store. Token claims can
/// go stale between issue and use; mutations must trust the stored row.
pub async fn fetch_caller(pool: &PgPool, claims: &Claims) -> Result<User, ApiError> {
    let id = caller_id(claims)?;
    let user = sqlx::query_as::<_, User>(
        "SELECT id, email, user_name, password_hash, is_admin, profile_picture, created_at \
         FROM users WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    user.ok_or_else(|| ApiError::Forbidden("Invalid signature".to_string()))
}

/// Whether the caller may mutate an entity owned by `owner`. Owners pass
/// directly; anyone else needs the admin flag on their *current* record,
/// not the one baked into the token.
pub async fn can_mutate(pool: &PgPool, claims: &Claims, owner: Uuid) -> Result<bool, ApiError> {
    if caller_id(claims)? == owner {
        return Ok(true);
    }
    let caller = fetch_caller(pool, claims).await?;
    Ok(caller.is_admin)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /users/register
pub async fn register(
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = payload.email.trim().to_string();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::Validation("Invalid email format.".to_string()));
    }

    if payload.password.len() < 8 {
        return Err(ApiError::Validation(
            "Password must be at least 8 characters long.".to_string(),
        ));
    }

    let user_name = payload.user_name.trim().to_string();
    if user_name.is_empty() {
        return Err(ApiError::Validation("User name is required.".to_string()));
    }
    if !USERNAME_REGEX.is_match(&user_name) {
        return Err(ApiError::Validation(
            "User name may only contain letters, numbers, '.', '-' and '_'.".to_string(),
        ));
    }

    let pool = db::get_pool().ok_or(ApiError::Unavailable)?;

    let existing_email: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(&email)
            .fetch_optional(pool.as_ref())
            .await?;
    if existing_email.is_some() {
        return Err(ApiError::Conflict("Email already exists.".to_string()));
    }

    let existing_name: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM users WHERE user_name = $1")
            .bind(&user_name)
            .fetch_optional(pool.as_ref())
            .await?;
    if existing_name.is_some() {
        return Err(ApiError::Conflict("User name already exists.".to_string()));
    }

    // bcrypt is CPU-bound; keep it off the async executor.
    let password = payload.password;
    let password_hash = tokio::task::spawn_blocking(move || hash(&password, DEFAULT_COST))
        .await
        .map_err(|e| {
            tracing::error!("spawn_blocking panic during hash: {}", e);
            ApiError::Internal("Failed to process password".to_string())
        })?
        .map_err(|e| {
            tracing::error!("Failed to hash password: {}", e);
            ApiError::Internal("Failed to process password".to_string())
        })?;

    let insert = sqlx::query(
        "INSERT INTO users (email, user_name, password_hash) VALUES ($1, $2, $3)",
    )
    .bind(&email)
    .bind(&user_name)
    .bind(&password_hash)
    .execute(pool.as_ref())
    .await;

    match insert {
        Ok(_) => {
            tracing::info!("User registered successfully: {}", user_name);
            Ok((
                StatusCode::CREATED,
                Json(MessageResponse {
                    message: "Registered successfully.".to_string(),
                }),
            ))
        }
        // Two registrations can race past the lookups above; the unique
        // indexes on email and user_name settle it.
        Err(e) if e
            .as_database_error()
            .map(|d| d.is_unique_violation())
            .unwrap_or(false) =>
        {
            Err(ApiError::Conflict(
                "Email or user name already exists.".to_string(),
            ))
        }
        Err(e) => Err(ApiError::Database(e)),
    }
}

/// POST /users/login
pub async fn login(Json(payload): Json<LoginRequest>) -> Result<impl IntoResponse, ApiError> {
    if !payload.email.contains('@') {
        return Err(ApiError::Validation("Invalid email format".to_string()));
    }

    let pool = db::get_pool().ok_or(ApiError::Unavailable)?;

    let user = sqlx::query_as::<_, User>(
        "SELECT id, email, user_name, password_hash, is_admin, profile_picture, created_at \
         FROM users WHERE LOWER(email) = LOWER($1)",
    )
    .bind(&payload.email)
    .fetch_optional(pool.as_ref())
    .await?;

    let user = match user {
        Some(u) => u,
        None => return Err(ApiError::NotFound("Email does not exist".to_string())),
    };

    let password = payload.password;
    let stored_hash = user.password_hash.clone();
    let password_ok =
        tokio::task::spawn_blocking(move || verify(&password, &stored_hash).unwrap_or(false))
            .await
            .unwrap_or(false);

    if !password_ok {
        tracing::warn!("Failed login attempt for: {}", user.email);
        return Err(ApiError::Unauthenticated(
            "Incorrect email or password".to_string(),
        ));
    }

    let access = create_access_token(&user).map_err(|e| {
        tracing::error!("Failed to create access token: {}", e);
        ApiError::Internal("Failed to create token".to_string())
    })?;

    tracing::info!("Successful login for user: {}", user.user_name);

    Ok((StatusCode::OK, Json(LoginResponse { access })))
}

/// GET /users/profile
pub async fn profile(headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    let claims = authenticate(&headers)?;
    let pool = db::get_pool().ok_or(ApiError::Unavailable)?;
    let user = fetch_caller(pool.as_ref(), &claims).await?;

    Ok((
        StatusCode::OK,
        Json(ProfileResponse {
            user: UserView::from(user),
        }),
    ))
}
