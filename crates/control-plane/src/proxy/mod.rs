//! Authorising proxy in front of each environment's native API.
//!
//! The proxy presents the Docker/Kubernetes API surface unchanged but
//! enforces per-resource access control before forwarding, filters
//! collection responses down to what the caller may see, and injects
//! request-scoped credentials where the downstream API needs them. A denial
//! is always an explicit 403 with a stable body; the proxy never silently
//! falls through.

pub mod access;
pub mod docker;
pub mod kubernetes;

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use metrics::counter;
use tracing::warn;

use crate::app_state::AppState;
use crate::auth::RestrictedRequestContext;
use crate::error::{ApiResult, AppError};
use crate::persistence::{Endpoint, EndpointStatus};

/// Headers never copied between the client and the upstream API.
const HOP_BY_HOP: [&str; 6] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "transfer-encoding",
    "upgrade",
];

/// One proxied call, already stripped down to the path below the
/// `/endpoints/{id}/docker` or `/endpoints/{id}/kubernetes` prefix.
pub struct ProxiedRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ProxiedRequest {
    pub fn url(&self, base: &str) -> String {
        match &self.query {
            Some(query) => format!("{base}{}?{query}", self.path),
            None => format!("{base}{}", self.path),
        }
    }
}

/// Resolves the upstream base URL, requiring a reverse tunnel for edge
/// endpoints. A tunnel that is required but not yet established surfaces as
/// 503: the agent picks the request up on its next poll and the client
/// retries.
pub async fn resolve_base_url(state: &AppState, endpoint: &Endpoint) -> ApiResult<String> {
    if !endpoint.kind.is_edge() {
        if endpoint.url.is_empty() {
            return Err(AppError::bad_request("endpoint has no API URL"));
        }
        return Ok(endpoint.url.trim_end_matches('/').to_string());
    }

    let settings = state.services.settings.current()?;
    let interval = crate::edge::effective_checkin_interval(
        endpoint,
        &settings,
        state.config.edge.checkin_interval_secs,
    );
    state
        .tunnels
        .require(endpoint.id, Duration::from_secs(interval))
        .await
        .map_err(|err| AppError::service_unavailable(err.to_string()))?;

    match state.tunnels.api_base_url(endpoint.id).await {
        Ok(base) => Ok(base),
        Err(_) => Err(AppError::service_unavailable(
            "waiting for the edge agent to establish its tunnel",
        )),
    }
}

/// Sends the request upstream and relays the response. Upstream status codes
/// are mirrored as-is; transport failures mark the endpoint down and surface
/// as 502 with the upstream marker.
pub async fn send_upstream(
    state: &AppState,
    endpoint: &Endpoint,
    base_url: &str,
    request: ProxiedRequest,
) -> ApiResult<Response> {
    let response = match dispatch(state, base_url, &request).await {
        Ok(response) => response,
        Err(err) => {
            warn!(endpoint = %endpoint.id, %err, "upstream request failed");
            mark_endpoint_down(state, endpoint);
            if endpoint.kind.is_edge() {
                state.tunnels.touch(endpoint.id).await;
            }
            counter!("proxy_upstream_errors_total").increment(1);
            return Err(AppError::upstream(StatusCode::BAD_GATEWAY, err.to_string()));
        }
    };

    if endpoint.kind.is_edge() {
        state.tunnels.touch(endpoint.id).await;
    }

    let status = response.status();
    let mut builder = Response::builder().status(status.as_u16());
    for (name, value) in response.headers() {
        if !HOP_BY_HOP.contains(&name.as_str()) {
            builder = builder.header(name, value);
        }
    }

    let body = Body::from_stream(futures_util::TryStreamExt::map_err(
        response.bytes_stream(),
        std::io::Error::other,
    ));
    builder
        .body(body)
        .map_err(|err| AppError::internal(&err.to_string()))
}

/// Like [`send_upstream`] but buffers the body so the caller can rewrite it
/// (collection filtering).
pub async fn send_upstream_buffered(
    state: &AppState,
    endpoint: &Endpoint,
    base_url: &str,
    request: &ProxiedRequest,
) -> ApiResult<(StatusCode, Vec<u8>)> {
    let response = match dispatch(state, base_url, request).await {
        Ok(response) => response,
        Err(err) => {
            warn!(endpoint = %endpoint.id, %err, "upstream request failed");
            mark_endpoint_down(state, endpoint);
            return Err(AppError::upstream(StatusCode::BAD_GATEWAY, err.to_string()));
        }
    };

    if endpoint.kind.is_edge() {
        state.tunnels.touch(endpoint.id).await;
    }

    let status = StatusCode::from_u16(response.status().as_u16())
        .map_err(|err| AppError::internal(&err.to_string()))?;
    let body = response
        .bytes()
        .await
        .map_err(|err| AppError::upstream(StatusCode::BAD_GATEWAY, err.to_string()))?;
    Ok((status, body.to_vec()))
}

async fn dispatch(
    state: &AppState,
    base_url: &str,
    request: &ProxiedRequest,
) -> Result<reqwest::Response, reqwest::Error> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
        .expect("http method is valid");
    let mut builder = state.http_client.request(method, request.url(base_url));
    for (name, value) in &request.headers {
        if !HOP_BY_HOP.contains(&name.as_str()) && name != axum::http::header::HOST {
            builder = builder.header(name.as_str(), value.as_bytes());
        }
    }
    if !request.body.is_empty() {
        builder = builder.body(request.body.clone());
    }
    builder.send().await
}

/// The proxy co-owns endpoint status: an I/O failure flips it down eagerly
/// instead of waiting for the next snapshot tick.
fn mark_endpoint_down(state: &AppState, endpoint: &Endpoint) {
    let result = state.services.endpoints.read(endpoint.id.0).and_then(|mut current| {
        if current.status != EndpointStatus::Down {
            current.status = EndpointStatus::Down;
            state.services.endpoints.update(endpoint.id.0, &current)?;
        }
        Ok(())
    });
    if let Err(err) = result {
        warn!(endpoint = %endpoint.id, %err, "failed to mark endpoint down");
    }
}

/// Entry point used by the HTTP handlers.
pub async fn proxy_request(
    state: &AppState,
    context: &RestrictedRequestContext,
    endpoint: &Endpoint,
    request: ProxiedRequest,
) -> ApiResult<Response> {
    let base_url = resolve_base_url(state, endpoint).await?;
    if endpoint.kind.is_kubernetes() {
        kubernetes::forward(state, context, endpoint, &base_url, request).await
    } else {
        docker::forward(state, context, endpoint, &base_url, request).await
    }
}
