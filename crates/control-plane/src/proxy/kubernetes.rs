//! Kubernetes-specific proxy policies.

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderValue, Method};
use axum::response::Response;
use chrono::Duration;

use super::{send_upstream, ProxiedRequest};
use crate::app_state::AppState;
use crate::auth::RestrictedRequestContext;
use crate::error::{ApiResult, AppError};
use crate::persistence::Endpoint;

/// Lifetime of the per-request exec token; long enough for an interactive
/// session, short enough to be worthless once leaked.
const EXEC_TOKEN_LIFETIME_MINUTES: i64 = 60;

pub async fn forward(
    state: &AppState,
    context: &RestrictedRequestContext,
    endpoint: &Endpoint,
    base_url: &str,
    mut request: ProxiedRequest,
) -> ApiResult<Response> {
    if is_pod_exec(&request.method, &request.path) {
        inject_exec_token(state, context, &mut request)?;
    }

    send_upstream(state, endpoint, base_url, request).await
}

fn is_pod_exec(method: &Method, path: &str) -> bool {
    method == Method::POST && path.contains("/pods/") && path.ends_with("/exec")
}

/// Attaches a freshly minted bearer token so the downstream API server can
/// stream stdin/stdout on the caller's behalf. Any client-supplied
/// Authorization header is overwritten.
fn inject_exec_token(
    state: &AppState,
    context: &RestrictedRequestContext,
    request: &mut ProxiedRequest,
) -> ApiResult<()> {
    let token = state
        .jwt
        .issue_kubeconfig(
            context.user_id,
            &context.username,
            context.role,
            Duration::minutes(EXEC_TOKEN_LIFETIME_MINUTES),
        )
        .map_err(|err| AppError::internal(&err.to_string()))?;

    let value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|err| AppError::internal(&err.to_string()))?;
    request.headers.insert(AUTHORIZATION, value);
    Ok(())
}
