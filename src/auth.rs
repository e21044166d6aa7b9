// Authentication: password hashing, JWT verification, and API-key gating.
//
// The user authentication and profile service itself is an external
// collaborator (spec.md §1); this module only verifies tokens it issues and
// exposes thin register/login/profile endpoints backed by the durable
// `users` table, matching the client contract in spec.md §6.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::storage::durable::DurableStore;

// ── JWT ──────────────────────────────────────────────────────────────

const AUDIENCE: &str = "authenticated";

fn jwt_secret() -> Vec<u8> {
    std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "realmforge-dev-secret-change-in-production".to_string())
        .into_bytes()
}

/// Claims carried by identity-provider-issued JWTs, verified with `aud=authenticated`
/// per spec.md §6.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // user id (owner of zero or more players)
    pub aud: String,
    pub exp: usize,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

pub fn create_token(user_id: &str, username: &str) -> Result<String, String> {
    let expiration = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::hours(24))
        .expect("valid timestamp")
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        aud: AUDIENCE.to_string(),
        exp: expiration,
        username: Some(username.to_string()),
        role: Some("user".to_string()),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(&jwt_secret()),
    )
    .map_err(|e| format!("Failed to create token: {e}"))
}

pub fn verify_token(token: &str) -> Result<Claims, String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[AUDIENCE]);
    decode::<Claims>(token, &DecodingKey::from_secret(&jwt_secret()), &validation)
        .map(|data| data.claims)
        .map_err(|e| format!("Invalid token: {e}"))
}

// ── Password hashing (register/login endpoints) ─────────────────────

pub fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| format!("Failed to hash password: {e}"))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, String> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| format!("Invalid password hash: {e}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

// ── Axum extractor: AuthUser ─────────────────────────────────────────

/// Extracts the authenticated user from a `Bearer` JWT.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(serde_json::json!({"error": "Missing Authorization header"})),
                )
            })?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "Invalid Authorization header format"})),
            )
        })?;

        verify_token(token)
            .map(AuthUser)
            .map_err(|e| (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": e}))))
    }
}

// ── X-API-Key middleware ─────────────────────────────────────────────

/// Rejects any request that lacks a valid `X-API-Key` header, when an API
/// key is configured. `/health` and `OPTIONS` preflight requests are exempt
/// (spec.md §6).
pub async fn require_api_key(
    State(expected): State<Option<Arc<str>>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = expected else {
        return next.run(req).await;
    };

    if req.method() == axum::http::Method::OPTIONS || req.uri().path() == "/health" {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(key) if key == expected.as_ref() => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "missing or invalid X-API-Key"})),
        )
            .into_response(),
    }
}

// ── Auth API handlers ────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserPublic,
}

#[derive(Serialize)]
pub struct UserPublic {
    pub id: String,
    pub username: String,
    pub email: String,
}

pub async fn register(
    State(db): State<Arc<dyn DurableStore>>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    if req.username.len() < 3 || req.password.len() < 8 {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "username must be >=3 chars, password >=8 chars"})),
        )
            .into_response();
    }

    let password_hash = match hash_password(&req.password) {
        Ok(h) => h,
        Err(e) => {
            tracing::error!("password hash error: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "internal error"})),
            )
                .into_response();
        }
    };

    match db
        .create_user(&req.username, &req.email, &password_hash)
        .await
    {
        Ok(user) => {
            let token = match create_token(&user.id, &user.username) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!("token creation error: {e}");
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(serde_json::json!({"error": "internal error"})),
                    )
                        .into_response();
                }
            };
            (
                StatusCode::CREATED,
                Json(serde_json::json!(AuthResponse {
                    token,
                    user: UserPublic {
                        id: user.id,
                        username: user.username,
                        email: user.email,
                    },
                })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("db error in register: {e}");
            (
                StatusCode::CONFLICT,
                Json(serde_json::json!({"error": "username or email already taken"})),
            )
                .into_response()
        }
    }
}

pub async fn login(
    State(db): State<Arc<dyn DurableStore>>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let user = match db.get_user_by_username(&req.username).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "invalid username or password"})),
            )
                .into_response();
        }
        Err(e) => {
            tracing::error!("db error in login: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "internal error"})),
            )
                .into_response();
        }
    };

    match verify_password(&req.password, &user.password_hash) {
        Ok(true) => {}
        _ => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "invalid username or password"})),
            )
                .into_response();
        }
    }

    let token = match create_token(&user.id, &user.username) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("token creation error: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "internal error"})),
            )
                .into_response();
        }
    };

    (
        StatusCode::OK,
        Json(serde_json::json!(AuthResponse {
            token,
            user: UserPublic {
                id: user.id,
                username: user.username,
                email: user.email,
            },
        })),
    )
        .into_response()
}

#[derive(Deserialize)]
pub struct UpdateUsernameRequest {
    pub username: String,
}

pub async fn update_username(
    AuthUser(claims): AuthUser,
    State(db): State<Arc<dyn DurableStore>>,
    Json(req): Json<UpdateUsernameRequest>,
) -> impl IntoResponse {
    if req.username.len() < 3 {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "username must be >=3 chars"})),
        )
            .into_response();
    }
    match db.update_username(&claims.sub, &req.username).await {
        Ok(Some(user)) => (
            StatusCode::OK,
            Json(serde_json::json!(UserPublic {
                id: user.id,
                username: user.username,
                email: user.email,
            })),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "user not found"})),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("db error: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "internal error"})),
            )
                .into_response()
        }
    }
}

pub async fn profile(
    AuthUser(claims): AuthUser,
    State(db): State<Arc<dyn DurableStore>>,
) -> impl IntoResponse {
    match db.get_user(&claims.sub).await {
        Ok(Some(user)) => (
            StatusCode::OK,
            Json(serde_json::json!(UserPublic {
                id: user.id,
                username: user.username,
                email: user.email,
            })),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "user not found"})),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("db error: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "internal error"})),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_and_verify() {
        let password = "testpassword123";
        let hash = hash_password(password).unwrap();
        assert!(verify_password(password, &hash).unwrap());
        assert!(!verify_password("wrongpassword", &hash).unwrap());
    }

    #[test]
    fn test_jwt_create_and_verify() {
        let token = create_token("user-1", "alice").unwrap();
        let claims = verify_token(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.aud, "authenticated");
    }

    #[test]
    fn test_jwt_invalid_token() {
        assert!(verify_token("invalid.token.here").is_err());
    }

    #[test]
    fn test_jwt_wrong_audience_rejected() {
        let claims = Claims {
            sub: "user-1".to_string(),
            aud: "not-authenticated".to_string(),
            exp: 9999999999,
            username: None,
            role: None,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&jwt_secret()),
        )
        .unwrap();
        assert!(verify_token(&token).is_err());
    }
}
