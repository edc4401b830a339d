//! Docker-specific proxy policies.
//!
//! Most Docker objects are addressed by ID, several Swarm objects by name or
//! ID interchangeably. Each resource type is described by a capability
//! record; one shared algorithm resolves the path reference to a canonical
//! ID, fetches the attached control record and decides, so no per-type
//! lookup code is sprinkled through the proxy.

use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use serde_json::Value;

use super::access;
use super::{send_upstream, send_upstream_buffered, ProxiedRequest};
use crate::app_state::AppState;
use crate::auth::RestrictedRequestContext;
use crate::error::{ApiResult, AppError};
use crate::persistence::{Endpoint, ResourceControlType};

pub struct ResourceCapability {
    pub kind: ResourceControlType,
    /// First path segment claiming the resource type.
    pub segment: &'static str,
    /// Collection read path below the API root.
    pub list_path: &'static str,
    /// Key wrapping the collection array, when not a bare array.
    pub collection_key: Option<&'static str>,
    /// Candidate identifier keys on inspect/list payloads, tried in order.
    pub id_keys: &'static [&'static str],
    /// Suffix of the inspect endpoint after `/{segment}/{ref}`. `None` marks
    /// the type unresolvable: the reference already is the canonical ID.
    pub inspect_suffix: Option<&'static str>,
}

const CAPABILITIES: [ResourceCapability; 6] = [
    ResourceCapability {
        kind: ResourceControlType::Container,
        segment: "containers",
        list_path: "/containers/json",
        collection_key: None,
        id_keys: &["Id"],
        inspect_suffix: Some("/json"),
    },
    ResourceCapability {
        kind: ResourceControlType::Network,
        segment: "networks",
        list_path: "/networks",
        collection_key: None,
        id_keys: &["Id", "Name"],
        inspect_suffix: Some(""),
    },
    ResourceCapability {
        kind: ResourceControlType::Volume,
        segment: "volumes",
        list_path: "/volumes",
        collection_key: Some("Volumes"),
        id_keys: &["Name"],
        inspect_suffix: None,
    },
    ResourceCapability {
        kind: ResourceControlType::Service,
        segment: "services",
        list_path: "/services",
        collection_key: None,
        id_keys: &["ID"],
        inspect_suffix: Some(""),
    },
    ResourceCapability {
        kind: ResourceControlType::Config,
        segment: "configs",
        list_path: "/configs",
        collection_key: None,
        id_keys: &["ID"],
        inspect_suffix: Some(""),
    },
    ResourceCapability {
        kind: ResourceControlType::Secret,
        segment: "secrets",
        list_path: "/secrets",
        collection_key: None,
        id_keys: &["ID"],
        inspect_suffix: Some(""),
    },
];

pub fn capability_for_segment(segment: &str) -> Option<&'static ResourceCapability> {
    CAPABILITIES.iter().find(|cap| cap.segment == segment)
}

/// Drops a `/v1.xx` API version prefix, which clients may or may not send.
fn strip_version_prefix(path: &str) -> &str {
    let Some(rest) = path.strip_prefix("/v1.") else {
        return path;
    };
    match rest.find('/') {
        Some(slash) => &rest[slash..],
        None => "/",
    }
}

pub async fn forward(
    state: &AppState,
    context: &RestrictedRequestContext,
    endpoint: &Endpoint,
    base_url: &str,
    mut request: ProxiedRequest,
) -> ApiResult<Response> {
    let path = strip_version_prefix(&request.path).to_string();
    let segments: Vec<String> = path
        .trim_start_matches('/')
        .split('/')
        .map(str::to_string)
        .collect();

    // Image builds from a git remote are pinned to a resolved commit for
    // every caller, admins included.
    if request.method == Method::POST && path == "/build" {
        rewrite_build_remote(state, &mut request).await?;
    }

    // Prune deletes by criteria, not by ID; it cannot be partially
    // authorised, so it is reserved for administrators on every shared
    // resource type, images included.
    if request.method == Method::POST && path.ends_with("/prune") {
        if !context.is_admin() {
            counter!("proxy_denials_total", "reason" => "prune").increment(1);
            return Err(AppError::access_denied());
        }
        return send_upstream(state, endpoint, base_url, request).await;
    }

    let capability = segments.first().and_then(|seg| capability_for_segment(seg));

    if let Some(capability) = capability {
        if request.method == Method::GET && path == capability.list_path {
            return forward_collection(state, context, endpoint, base_url, capability, request)
                .await;
        }

        if !context.is_admin() {
            if let Some(reference) = resource_reference(capability, &segments) {
                authorize_resource(state, context, base_url, capability, &reference).await?;
            }
        }
    }

    send_upstream(state, endpoint, base_url, request).await
}

/// The path segment addressing a single resource, when present. `create` and
/// the list suffix are operations, not references.
fn resource_reference(capability: &ResourceCapability, segments: &[String]) -> Option<String> {
    let reference = segments.get(1)?;
    if reference == "create" || reference == "prune" {
        return None;
    }
    if capability.segment == "containers" && reference == "json" {
        return None;
    }
    Some(reference.clone())
}

async fn authorize_resource(
    state: &AppState,
    context: &RestrictedRequestContext,
    base_url: &str,
    capability: &ResourceCapability,
    reference: &str,
) -> ApiResult<()> {
    let canonical = match resolve_canonical_id(state, base_url, capability, reference).await {
        Ok(id) => id,
        // A restricted caller learns nothing about whether the resource
        // exists: resolution failures and denials answer alike.
        Err(_) => {
            counter!("proxy_denials_total", "reason" => "unresolvable").increment(1);
            return Err(AppError::access_denied());
        }
    };

    let control = state
        .services
        .resource_controls
        .by_resource(capability.kind, &canonical)?;
    if !access::can_access_resource(context, control.as_ref()) {
        counter!("proxy_denials_total", "reason" => "resource_control").increment(1);
        return Err(AppError::access_denied());
    }
    Ok(())
}

/// Resolves a name-or-ID path parameter to the canonical downstream ID by
/// inspecting the resource.
pub async fn resolve_canonical_id(
    state: &AppState,
    base_url: &str,
    capability: &ResourceCapability,
    reference: &str,
) -> ApiResult<String> {
    let Some(suffix) = capability.inspect_suffix else {
        return Ok(reference.to_string());
    };

    let url = format!("{base_url}/{}/{reference}{suffix}", capability.segment);
    let response = state
        .http_client
        .get(&url)
        .send()
        .await
        .map_err(|err| AppError::upstream(StatusCode::BAD_GATEWAY, err.to_string()))?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(AppError::not_found("no such resource"));
    }
    if !response.status().is_success() {
        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return Err(AppError::upstream(status, "resource inspect failed"));
    }

    let payload: Value = response
        .json()
        .await
        .map_err(|err| AppError::upstream(StatusCode::BAD_GATEWAY, err.to_string()))?;
    extract_id(&payload, capability.id_keys)
        .ok_or_else(|| AppError::internal("inspect payload carried no identifier"))
}

fn extract_id(entry: &Value, id_keys: &[&str]) -> Option<String> {
    id_keys
        .iter()
        .find_map(|key| entry.get(key).and_then(Value::as_str))
        .map(str::to_string)
}

async fn forward_collection(
    state: &AppState,
    context: &RestrictedRequestContext,
    endpoint: &Endpoint,
    base_url: &str,
    capability: &ResourceCapability,
    request: ProxiedRequest,
) -> ApiResult<Response> {
    let (status, body) = send_upstream_buffered(state, endpoint, base_url, &request).await?;
    if !status.is_success() || context.is_admin() {
        return Ok(raw_json_response(status, body));
    }

    let mut payload: Value = serde_json::from_slice(&body)
        .map_err(|err| AppError::upstream(StatusCode::BAD_GATEWAY, err.to_string()))?;

    let entries = match capability.collection_key {
        Some(key) => payload
            .get_mut(key)
            .and_then(Value::as_array_mut),
        None => payload.as_array_mut(),
    };

    if let Some(entries) = entries {
        let mut kept = Vec::with_capacity(entries.len());
        for entry in entries.drain(..) {
            let visible = match extract_id(&entry, capability.id_keys) {
                Some(id) => {
                    let control = state
                        .services
                        .resource_controls
                        .by_resource(capability.kind, &id)?;
                    access::visible_in_collection(context, control.as_ref())
                }
                None => false,
            };
            if visible {
                kept.push(entry);
            }
        }
        *entries = kept;
    }

    let body = serde_json::to_vec(&payload).map_err(|err| AppError::internal(&err.to_string()))?;
    Ok(raw_json_response(status, body))
}

fn raw_json_response(status: StatusCode, body: Vec<u8>) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

/// Pins `POST /build?remote=<git URL>` to the remote's current HEAD by
/// appending `#<sha>`. Remotes already pointing at a file inside the
/// repository (more than two path segments) are left untouched.
async fn rewrite_build_remote(state: &AppState, request: &mut ProxiedRequest) -> ApiResult<()> {
    let Some(query) = request.query.clone() else {
        return Ok(());
    };

    let mut carrier = reqwest::Url::parse(&format!("http://carrier/?{query}"))
        .map_err(|err| AppError::bad_request(err.to_string()))?;

    let Some(remote) = carrier
        .query_pairs()
        .find(|(key, _)| key == "remote")
        .map(|(_, value)| value.into_owned())
    else {
        return Ok(());
    };

    let Ok(remote_url) = reqwest::Url::parse(&remote) else {
        return Ok(());
    };
    let path_segments: Vec<&str> = remote_url
        .path()
        .trim_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();
    if path_segments.len() > 2 || remote.contains('#') {
        return Ok(());
    }

    let commit = state
        .git
        .latest_commit(&remote)
        .await
        .map_err(|err| AppError::upstream(StatusCode::BAD_GATEWAY, err.to_string()))?;

    let pairs: Vec<(String, String)> = carrier
        .query_pairs()
        .map(|(key, value)| {
            if key == "remote" {
                (key.into_owned(), format!("{remote}#{commit}"))
            } else {
                (key.into_owned(), value.into_owned())
            }
        })
        .collect();
    carrier.query_pairs_mut().clear().extend_pairs(pairs);

    request.query = carrier.query().map(str::to_string);
    Ok(())
}
