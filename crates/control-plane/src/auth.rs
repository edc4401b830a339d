//! Request authentication and the restricted context handed to handlers.
//!
//! A request authenticates through exactly one of, in order: the session
//! cookie (a signed JWT), an `X-API-Key` header, or a `Bearer` token. The
//! result is a [`RestrictedRequestContext`] carrying the caller's identity,
//! role and team memberships; authorisation decisions downstream only ever
//! consult that context.

use axum::extract::State;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use sha2::{Digest, Sha256};

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};
use crate::jwt::JwtService;
use crate::persistence::{DataServices, TeamId, UserId, UserRole};

/// Name of the session cookie set by `POST /auth`.
pub const SESSION_COOKIE: &str = "session_token";
/// Header carrying a machine API key.
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone)]
pub struct RestrictedRequestContext {
    pub user_id: UserId,
    pub username: String,
    pub role: UserRole,
    pub team_ids: Vec<TeamId>,
}

impl RestrictedRequestContext {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Derives restricted contexts from request credentials.
#[derive(Clone)]
pub struct RequestBouncer {
    jwt: JwtService,
    services: DataServices,
}

impl RequestBouncer {
    pub fn new(jwt: JwtService, services: DataServices) -> Self {
        Self { jwt, services }
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> ApiResult<RestrictedRequestContext> {
        if let Some(token) = session_cookie(headers) {
            return self.context_from_jwt(&token);
        }
        if let Some(key) = header_str(headers, API_KEY_HEADER) {
            return self.context_from_api_key(&key);
        }
        if let Some(token) = bearer_token(headers) {
            return self.context_from_jwt(&token);
        }
        Err(AppError::unauthorized("missing credentials"))
    }

    fn context_from_jwt(&self, token: &str) -> ApiResult<RestrictedRequestContext> {
        let claims = self
            .jwt
            .verify_session(token)
            .map_err(|_| AppError::unauthorized("invalid or expired session"))?;

        // The user may have been deleted or demoted since the token was
        // issued; the stored record wins.
        let user = self
            .services
            .users
            .read(claims.sub)
            .map_err(|_| AppError::unauthorized("unknown user"))?;

        self.context_for_user(user.id, user.username, user.role)
    }

    fn context_from_api_key(&self, raw_key: &str) -> ApiResult<RestrictedRequestContext> {
        let digest = api_key_digest(raw_key);
        let key = self
            .services
            .api_keys
            .by_digest(&digest)
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::unauthorized("invalid api key"))?;

        let user = self
            .services
            .users
            .read(key.user_id.0)
            .map_err(|_| AppError::unauthorized("unknown user"))?;

        self.context_for_user(user.id, user.username, user.role)
    }

    fn context_for_user(
        &self,
        user_id: UserId,
        username: String,
        role: UserRole,
    ) -> ApiResult<RestrictedRequestContext> {
        let team_ids = self
            .services
            .team_memberships
            .teams_of_user(user_id)
            .map_err(AppError::from)?;

        Ok(RestrictedRequestContext {
            user_id,
            username,
            role,
            team_ids,
        })
    }
}

/// Hex SHA-256 of a raw API key; only digests are persisted.
pub fn api_key_digest(raw_key: &str) -> String {
    format!("{:x}", Sha256::digest(raw_key.as_bytes()))
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_string)
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|cookie| {
        let (name, value) = cookie.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

/// Middleware: reject unauthenticated requests and stash the restricted
/// context in request extensions.
pub async fn require_authenticated(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> ApiResult<axum::response::Response> {
    let context = state.bouncer.authenticate(req.headers())?;
    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}

/// Middleware: additionally require the admin role.
pub async fn require_admin(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> ApiResult<axum::response::Response> {
    let context = state.bouncer.authenticate(req.headers())?;
    if !context.is_admin() {
        return Err(AppError::forbidden("administrator role required"));
    }
    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}
