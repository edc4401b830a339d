//! Environment management and the authorising proxy entry points.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::RestrictedRequestContext;
use crate::error::{ApiResult, AppError};
use crate::filters::{
    search_order_and_paginate, FilterConfig, ListQueryParams, SortBinding,
};
use crate::http::request_context;
use crate::persistence::{
    EdgeSettings, Endpoint, EndpointGroupId, EndpointId, EndpointStatus, EndpointType, TagId,
    TlsConfig,
};
use crate::proxy::{proxy_request, ProxiedRequest};
use crate::tasks::snapshot;

#[derive(Debug, Default, Deserialize)]
pub struct EndpointsQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub order: crate::filters::SortOrder,
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    /// Comma-separated endpoint types, e.g. `docker,edge_agent_on_docker`.
    #[serde(default)]
    pub types: Option<String>,
    /// Comma-separated tag IDs; an endpoint matches with any of them.
    #[serde(default)]
    pub tag_ids: Option<String>,
    #[serde(default)]
    pub edge_async: Option<bool>,
    /// Comma-separated endpoint IDs to drop from the result.
    #[serde(default)]
    pub exclude_ids: Option<String>,
}

impl EndpointsQuery {
    fn list_params(&self) -> ListQueryParams {
        ListQueryParams {
            search: self.search.clone(),
            sort: self.sort.clone(),
            order: self.order,
            start: self.start,
            limit: self.limit,
        }
    }
}

fn csv_ids(raw: &Option<String>) -> Vec<u32> {
    raw.as_deref()
        .unwrap_or_default()
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

fn csv_kinds(raw: &Option<String>) -> Vec<EndpointType> {
    raw.as_deref()
        .unwrap_or_default()
        .split(',')
        .filter_map(|part| {
            serde_json::from_value(serde_json::Value::String(part.trim().to_string())).ok()
        })
        .collect()
}

fn filter_config() -> FilterConfig<Endpoint> {
    FilterConfig {
        search_accessors: vec![|endpoint| endpoint.name.clone(), |endpoint| endpoint.url.clone()],
        sort_bindings: vec![
            SortBinding {
                key: "name",
                cmp: |a, b| a.name.cmp(&b.name),
            },
            SortBinding {
                key: "group",
                cmp: |a, b| a.group_id.cmp(&b.group_id),
            },
            SortBinding {
                key: "status",
                cmp: |a, b| a.status.as_str().cmp(b.status.as_str()),
            },
        ],
    }
}

pub async fn list(
    State(state): State<AppState>,
    axum::Extension(context): axum::Extension<RestrictedRequestContext>,
    Query(query): Query<EndpointsQuery>,
) -> ApiResult<Response> {
    let mut endpoints = state.services.endpoints.read_all()?;
    let groups = state.services.endpoint_groups.read_all()?;

    if !context.is_admin() {
        endpoints.retain(|endpoint| {
            let group = groups.iter().find(|group| group.id == endpoint.group_id);
            endpoint.grants_access(group, context.user_id, &context.team_ids)
        });
    }

    let kinds = csv_kinds(&query.types);
    if !kinds.is_empty() {
        endpoints.retain(|endpoint| kinds.contains(&endpoint.kind));
    }

    let tags = csv_ids(&query.tag_ids);
    if !tags.is_empty() {
        endpoints.retain(|endpoint| {
            endpoint
                .tag_ids
                .iter()
                .any(|tag| tags.contains(&tag.0))
        });
    }

    if let Some(edge_async) = query.edge_async {
        endpoints.retain(|endpoint| {
            endpoint.kind.is_edge() && endpoint.edge.async_mode == edge_async
        });
    }

    let excluded = csv_ids(&query.exclude_ids);
    if !excluded.is_empty() {
        endpoints.retain(|endpoint| !excluded.contains(&endpoint.id.0));
    }

    let result = search_order_and_paginate(endpoints, &query.list_params(), &filter_config());
    let headers = result.headers();
    Ok((headers, Json(result.items)).into_response())
}

pub async fn inspect(
    State(state): State<AppState>,
    axum::Extension(context): axum::Extension<RestrictedRequestContext>,
    Path(id): Path<u32>,
) -> ApiResult<Json<Endpoint>> {
    let endpoint = state.services.endpoints.read(id)?;
    ensure_endpoint_access(&state, &context, &endpoint)?;
    Ok(Json(endpoint))
}

#[derive(Debug, Deserialize)]
pub struct CreateEndpointPayload {
    pub name: String,
    pub kind: EndpointType,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub group_id: Option<u32>,
    #[serde(default)]
    pub tag_ids: Vec<u32>,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub edge: Option<EdgeSettings>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateEndpointPayload>,
) -> ApiResult<(StatusCode, Json<Endpoint>)> {
    if payload.name.is_empty() {
        return Err(AppError::bad_request("endpoint name is required"));
    }
    if !payload.kind.is_edge() && payload.url.as_deref().unwrap_or_default().is_empty() {
        return Err(AppError::bad_request("a directly reachable endpoint needs a URL"));
    }

    let mut endpoint = Endpoint {
        id: EndpointId(0),
        name: payload.name,
        kind: payload.kind,
        url: payload.url.unwrap_or_default(),
        tls: payload.tls.unwrap_or_default(),
        status: EndpointStatus::Up,
        heartbeat: false,
        container_engine: Default::default(),
        group_id: EndpointGroupId(payload.group_id.unwrap_or(1)),
        tag_ids: payload.tag_ids.into_iter().map(TagId).collect(),
        user_access_policies: Vec::new(),
        team_access_policies: Vec::new(),
        edge: payload.edge.unwrap_or_default(),
        user_trusted: !payload.kind.is_edge(),
        edge_id: if payload.kind.is_edge() {
            Uuid::new_v4().to_string()
        } else {
            String::new()
        },
        docker_snapshot: None,
        kubernetes_snapshot: None,
        snapshot_error: None,
        last_checkin: None,
    };
    state.services.endpoints.create(&mut endpoint)?;
    info!(endpoint = %endpoint.id, name = %endpoint.name, "endpoint created");
    Ok((StatusCode::CREATED, Json(endpoint)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateEndpointPayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub group_id: Option<u32>,
    #[serde(default)]
    pub tag_ids: Option<Vec<u32>>,
    #[serde(default)]
    pub edge: Option<EdgeSettings>,
    #[serde(default)]
    pub user_trusted: Option<bool>,
}

/// Settings changes must reach a polling agent, and trust or tag changes can
/// alter edge-group membership, so the update reconciles every stack and
/// drops the endpoint's cached payload.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(payload): Json<UpdateEndpointPayload>,
) -> ApiResult<Json<Endpoint>> {
    let endpoint_id = EndpointId(id);
    state.services.store().update(|tx| {
        let mut endpoint: Endpoint = state.services.endpoints.tx(tx).read(id)?;
        let membership_inputs_changed =
            payload.tag_ids.is_some() || payload.user_trusted.is_some() || payload.group_id.is_some();

        if let Some(name) = &payload.name {
            endpoint.name = name.clone();
        }
        if let Some(url) = &payload.url {
            endpoint.url = url.clone();
        }
        if let Some(group_id) = payload.group_id {
            endpoint.group_id = EndpointGroupId(group_id);
        }
        if let Some(tag_ids) = &payload.tag_ids {
            endpoint.tag_ids = tag_ids.iter().copied().map(TagId).collect();
        }
        if let Some(edge) = &payload.edge {
            endpoint.edge = edge.clone();
        }
        if let Some(user_trusted) = payload.user_trusted {
            endpoint.user_trusted = user_trusted;
        }
        state.services.endpoints.tx(tx).update(id, &endpoint)?;

        if membership_inputs_changed {
            for stack in crate::persistence::read_all_tx::<crate::persistence::EdgeStack>(tx)? {
                crate::edge::dispatch::reconcile_stack_in(&state.services, tx, &stack)?;
            }
        }
        Ok(())
    })?;

    state.poll_cache.del(endpoint_id);
    Ok(Json(state.services.endpoints.read(id)?))
}

/// Deleting an endpoint cascades: its relation record (which settles the
/// deployment counters), its queued actions, its poll-cache entry and any
/// open tunnel.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> ApiResult<StatusCode> {
    let endpoint_id = EndpointId(id);
    state.services.store().update(|tx| {
        let _ = state.services.relations.delete_in(tx, endpoint_id);
        state
            .services
            .pending_actions
            .delete_for_endpoint_in(tx, endpoint_id)?;
        state.services.endpoints.tx(tx).delete(id)
    })?;

    state.poll_cache.del(endpoint_id);
    state.tunnels.close(endpoint_id, "endpoint_deleted").await;
    info!(endpoint = %endpoint_id, "endpoint deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Immediate snapshot of every endpoint; individual failures do not abort
/// the batch.
pub async fn snapshot_all(State(state): State<AppState>) -> ApiResult<StatusCode> {
    let deadline = Duration::from_secs(state.config.snapshots.on_demand_timeout_secs);
    tokio::time::timeout(deadline, snapshot::snapshot_all(&state))
        .await
        .map_err(|_| AppError::service_unavailable("snapshot timed out"))?
        .map_err(AppError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn snapshot_one(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> ApiResult<StatusCode> {
    let endpoint = state.services.endpoints.read(id)?;
    let base_url = crate::proxy::resolve_base_url(&state, &endpoint).await?;

    match snapshot::snapshot_endpoint(&state.http_client, &endpoint, &base_url).await {
        Ok(data) => {
            let mut updated = state.services.endpoints.read(id)?;
            updated.status = EndpointStatus::Up;
            updated.snapshot_error = None;
            match data {
                snapshot::SnapshotData::Docker(s) => updated.docker_snapshot = Some(s),
                snapshot::SnapshotData::Kubernetes(s) => updated.kubernetes_snapshot = Some(s),
            }
            state.services.endpoints.update(id, &updated)?;
            Ok(StatusCode::NO_CONTENT)
        }
        Err(err) => {
            let mut updated = state.services.endpoints.read(id)?;
            updated.status = EndpointStatus::Down;
            updated.snapshot_error = Some(err.to_string());
            state.services.endpoints.update(id, &updated)?;
            Err(AppError::upstream(StatusCode::BAD_GATEWAY, err.to_string()))
        }
    }
}

pub async fn docker_proxy(
    State(state): State<AppState>,
    Path((id, rest)): Path<(u32, String)>,
    req: Request<Body>,
) -> ApiResult<Response> {
    proxy(state, id, rest, req).await
}

pub async fn kubernetes_proxy(
    State(state): State<AppState>,
    Path((id, rest)): Path<(u32, String)>,
    req: Request<Body>,
) -> ApiResult<Response> {
    proxy(state, id, rest, req).await
}

async fn proxy(
    state: AppState,
    id: u32,
    rest: String,
    req: Request<Body>,
) -> ApiResult<Response> {
    let context = request_context(&req)?.clone();
    let endpoint = state
        .services
        .endpoints
        .read(id)
        .map_err(|_| AppError::not_found("endpoint not found"))?;
    ensure_endpoint_access(&state, &context, &endpoint)?;

    let method = req.method().clone();
    let query = req.uri().query().map(str::to_string);
    let headers = req.headers().clone();
    let body = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
        .to_vec();

    let request = ProxiedRequest {
        method,
        path: format!("/{rest}"),
        query,
        headers,
        body,
    };
    proxy_request(&state, &context, &endpoint, request).await
}

pub fn ensure_endpoint_access(
    state: &AppState,
    context: &RestrictedRequestContext,
    endpoint: &Endpoint,
) -> ApiResult<()> {
    if context.is_admin() {
        return Ok(());
    }
    let group = state
        .services
        .endpoint_groups
        .read(endpoint.group_id.0)
        .ok();
    if endpoint.grants_access(group.as_ref(), context.user_id, &context.team_ids) {
        return Ok(());
    }
    Err(AppError::access_denied())
}
