//! Session authentication endpoints.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::{ConnectInfo, State};
use axum::http::header::SET_COOKIE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use tracing::info;

use crate::app_state::AppState;
use crate::auth::SESSION_COOKIE;
use crate::error::{ApiResult, AppError};

#[derive(Debug, Deserialize)]
pub struct AuthPayload {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub jwt: String,
}

pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<AuthPayload>,
) -> ApiResult<Response> {
    let decision = state.auth_limiter.check(addr.ip());
    if !decision.allowed {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"message": "too many authentication attempts"})),
        )
            .into_response();
        response.headers_mut().extend(decision.headers());
        return Ok(response);
    }

    if payload.username.is_empty() || payload.password.is_empty() {
        return Err(AppError::bad_request("username and password are required"));
    }

    // The same 401 for unknown users and wrong passwords.
    let invalid = || AppError::unauthorized("invalid credentials");
    let user = state
        .services
        .users
        .by_username(&payload.username)?
        .ok_or_else(invalid)?;
    if !verify_password(&payload.password, &user.password_hash) {
        return Err(invalid());
    }

    let token = state
        .jwt
        .issue_session(user.id, &user.username, user.role)
        .map_err(|err| AppError::internal(&err.to_string()))?;
    info!(user = %user.username, "session opened");

    let cookie = format!("{SESSION_COOKIE}={token}; HttpOnly; Path=/; SameSite=Strict");
    Ok((
        StatusCode::OK,
        [(SET_COOKIE, cookie)],
        Json(AuthResponse { jwt: token }),
    )
        .into_response())
}

pub async fn logout() -> Response {
    let cookie = format!("{SESSION_COOKIE}=; Max-Age=0; HttpOnly; Path=/");
    (StatusCode::NO_CONTENT, [(SET_COOKIE, cookie)]).into_response()
}

/// Argon2id PHC hash for stored user passwords.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow::anyhow!("password hashing failed: {err}"))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hashes_verify_and_reject() {
        let hash = hash_password("hunter2").expect("hash");
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not-a-phc-string"));
    }
}
