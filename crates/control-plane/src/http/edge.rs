//! Edge agent poll endpoint.
//!
//! Agents long-poll their status here. The response is served from the
//! per-endpoint cache until a relation, stack, job or settings write
//! invalidates it; a poll is also the heartbeat that drives pending-action
//! execution.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use tracing::error;

use common::api::{
    EdgeJobPayload, EdgeStackPayload, EdgeStatusResponse, TunnelStatus, EDGE_ID_HEADER,
};

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};
use crate::persistence::{read_tx, EdgeJob, EdgeStack, Endpoint};

pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    headers: HeaderMap,
) -> ApiResult<Json<EdgeStatusResponse>> {
    let edge_id = headers
        .get(EDGE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::forbidden("missing edge identifier"))?;

    let endpoint = state
        .services
        .endpoints
        .read(id)
        .map_err(|_| AppError::forbidden("unknown environment"))?;
    if !endpoint.kind.is_edge() || endpoint.edge_id != edge_id {
        // Same answer for a wrong ID and a missing endpoint.
        return Err(AppError::forbidden("unknown environment"));
    }
    if !endpoint.user_trusted {
        return Err(AppError::forbidden("environment is not trusted yet"));
    }

    record_heartbeat(&state, &endpoint)?;
    if let Err(err) = state.executor.execute_for_endpoint(endpoint.id) {
        error!(endpoint = %endpoint.id, %err, "pending action execution failed");
    }

    if let Some(cached) = state.poll_cache.get(endpoint.id) {
        return Ok(Json((*cached).clone()));
    }

    let payload = build_status_payload(&state, &endpoint).await?;
    state.poll_cache.set(endpoint.id, payload.clone());
    Ok(Json(payload))
}

fn record_heartbeat(state: &AppState, endpoint: &Endpoint) -> ApiResult<()> {
    let mut updated = endpoint.clone();
    updated.heartbeat = true;
    updated.last_checkin = Some(Utc::now());
    state
        .services
        .endpoints
        .update(endpoint.id.0, &updated)
        .map_err(AppError::from)
}

async fn build_status_payload(
    state: &AppState,
    endpoint: &Endpoint,
) -> ApiResult<EdgeStatusResponse> {
    let settings = state.services.settings.current()?;
    let checkin_interval = crate::edge::effective_checkin_interval(
        endpoint,
        &settings,
        state.config.edge.checkin_interval_secs,
    );

    let (status, port, credentials) = match state.tunnels.details(endpoint.id).await {
        None => (TunnelStatus::Idle, 0, None),
        Some(tunnel) => match tunnel.status {
            TunnelStatus::Required => (
                TunnelStatus::Required,
                tunnel.port,
                Some(tunnel.credentials.clone()),
            ),
            status => (status, tunnel.port, None),
        },
    };

    let (stacks, schedules) = state.services.store().view(|tx| {
        let relation = read_tx::<crate::persistence::EndpointRelation>(tx, endpoint.id.0).ok();

        let mut stacks = Vec::new();
        if let Some(relation) = relation {
            for stack_id in relation.edge_stacks {
                let stack: EdgeStack = read_tx(tx, stack_id.0)?;
                stacks.push(EdgeStackPayload {
                    id: stack.id.0,
                    name: stack.name,
                    version: stack.version,
                    file: stack.stack_file,
                });
            }
        }

        let endpoints = crate::persistence::read_all_tx::<Endpoint>(tx)?;
        let current = endpoints
            .iter()
            .find(|candidate| candidate.id == endpoint.id);
        let endpoint_groups =
            crate::persistence::read_all_tx::<crate::persistence::EndpointGroup>(tx)?;
        let edge_groups = crate::persistence::read_all_tx::<crate::persistence::EdgeGroup>(tx)?;
        let jobs = crate::persistence::read_all_tx::<EdgeJob>(tx)?;

        let mut schedules = Vec::new();
        if let Some(current) = current {
            let group = endpoint_groups
                .iter()
                .find(|group| group.id == current.group_id);
            let related =
                crate::edge::endpoint_related_edge_jobs(current, group, &edge_groups, &jobs);
            for job in jobs {
                if related.contains(&job.id) {
                    schedules.push(EdgeJobPayload {
                        id: job.id.0,
                        cron_expression: job.cron_expression,
                        script: job.script,
                        version: job.version,
                    });
                }
            }
        }

        Ok((stacks, schedules))
    })?;

    Ok(EdgeStatusResponse {
        status,
        port,
        credentials,
        checkin_interval,
        stacks,
        schedules,
    })
}
