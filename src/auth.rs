use axum::extract::{FromRef, FromRequestParts};
use axum::http::{request::Parts, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::analytics::path::Visitor;
use crate::response::AppError;
use crate::state::AppState;

const TOKEN_TYPE_USER: &str = "user";
const TOKEN_TYPE_ADMIN: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub jti: String,
    /// Site roles of the visitor; empty for admin tokens.
    #[serde(default)]
    pub roles: Vec<String>,
}

pub fn sign_jwt_for_user(
    user_id: &str,
    roles: &[String],
    secret: &str,
    expires_in_hours: u64,
) -> Result<String, AppError> {
    sign_jwt(user_id, TOKEN_TYPE_USER, roles, secret, expires_in_hours)
}

pub fn sign_jwt_for_admin(
    admin_id: &str,
    secret: &str,
    expires_in_hours: u64,
) -> Result<String, AppError> {
    sign_jwt(admin_id, TOKEN_TYPE_ADMIN, &[], secret, expires_in_hours)
}

fn sign_jwt(
    subject_id: &str,
    token_type: &str,
    roles: &[String],
    secret: &str,
    expires_in_hours: u64,
) -> Result<String, AppError> {
    let now = Utc::now();
    let exp = now + Duration::hours(expires_in_hours as i64);
    let claims = Claims {
        sub: subject_id.to_string(),
        token_type: token_type.to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
        jti: uuid::Uuid::new_v4().to_string(),
        roles: roles.to_vec(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::internal(&format!("jwt sign failed: {e}")))
}

pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.algorithms = vec![Algorithm::HS256];

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::unauthorized("Invalid or expired token"))
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth_header| auth_header.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}

fn extract_cookie_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookie| {
            cookie.split(';').find_map(|part| {
                let p = part.trim();
                p.strip_prefix(&format!("{cookie_name}="))
                    .map(str::to_string)
            })
        })
}

pub fn extract_token_from_headers(headers: &HeaderMap) -> Result<String, AppError> {
    extract_bearer_token(headers)
        .or_else(|| extract_cookie_token(headers, "token"))
        .ok_or_else(|| AppError::unauthorized("Missing bearer token"))
}

/// Identity used by the collection path. Any missing, expired or foreign
/// token means an anonymous visitor; this never rejects a request.
pub fn visitor_from_headers(headers: &HeaderMap, secret: &str) -> Visitor {
    let Ok(token) = extract_token_from_headers(headers) else {
        return Visitor::anonymous();
    };
    match verify_jwt(&token, secret) {
        Ok(claims) if claims.token_type == TOKEN_TYPE_USER => Visitor::authenticated(claims.roles),
        _ => Visitor::anonymous(),
    }
}

#[derive(Debug, Clone)]
pub struct AdminAuthUser {
    pub admin_id: String,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AdminAuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let token = extract_token_from_headers(&parts.headers)?;
        let claims = verify_jwt(&token, &app_state.config().admin_jwt_secret)?;

        if claims.token_type != TOKEN_TYPE_ADMIN {
            return Err(AppError::unauthorized("Invalid token type"));
        }

        Ok(AdminAuthUser {
            admin_id: claims.sub,
        })
    }
}
