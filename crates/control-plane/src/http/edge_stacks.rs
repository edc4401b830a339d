//! Edge stack management: the write side of the dispatch engine.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::app_state::AppState;
use crate::edge::dispatch::{detach_stack_in, invalidate_cache_for_stack, reconcile_stack_in};
use crate::error::{ApiResult, AppError};
use crate::persistence::{EdgeGroupId, EdgeStack, EdgeStackId};

#[derive(Debug, Deserialize)]
pub struct EdgeStackPayload {
    pub name: String,
    pub stack_file: String,
    #[serde(default)]
    pub edge_groups: Vec<u32>,
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<EdgeStack>>> {
    Ok(Json(state.services.edge_stacks.read_all()?))
}

pub async fn inspect(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> ApiResult<Json<EdgeStack>> {
    Ok(Json(state.services.edge_stacks.read(id)?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<EdgeStackPayload>,
) -> ApiResult<(StatusCode, Json<EdgeStack>)> {
    if payload.name.is_empty() || payload.stack_file.is_empty() {
        return Err(AppError::bad_request("name and stack file are required"));
    }
    if payload.edge_groups.is_empty() {
        return Err(AppError::bad_request("at least one edge group is required"));
    }

    let mut stack = EdgeStack {
        id: EdgeStackId(0),
        name: payload.name,
        edge_groups: payload.edge_groups.into_iter().map(EdgeGroupId).collect(),
        stack_file: payload.stack_file,
        version: 1,
        created_at: Utc::now(),
        num_deployments: 0,
    };

    state.services.store().update(|tx| {
        state.services.edge_stacks.tx(tx).create(&mut stack)?;
        reconcile_stack_in(&state.services, tx, &stack)
    })?;

    let stack = state.services.edge_stacks.read(stack.id.0)?;
    info!(stack = %stack.id, deployments = stack.num_deployments, "edge stack created");
    Ok((StatusCode::CREATED, Json(stack)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(payload): Json<EdgeStackPayload>,
) -> ApiResult<Json<EdgeStack>> {
    state.services.store().update(|tx| {
        let mut stack: EdgeStack = state.services.edge_stacks.tx(tx).read(id)?;
        let content_changed = stack.stack_file != payload.stack_file;

        stack.name = payload.name.clone();
        stack.stack_file = payload.stack_file.clone();
        stack.edge_groups = payload
            .edge_groups
            .iter()
            .copied()
            .map(EdgeGroupId)
            .collect();
        if content_changed {
            stack.version += 1;
        }
        state.services.edge_stacks.tx(tx).update(id, &stack)?;

        // Membership changes settle counters and caches through the relation
        // service; a content-only bump still has to reach polling agents.
        reconcile_stack_in(&state.services, tx, &stack)?;
        if content_changed {
            invalidate_cache_for_stack(&state.poll_cache, tx, stack.id)?;
        }
        Ok(())
    })?;

    Ok(Json(state.services.edge_stacks.read(id)?))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<u32>) -> ApiResult<StatusCode> {
    state.services.store().update(|tx| {
        detach_stack_in(&state.services, tx, EdgeStackId(id))?;
        state.services.edge_stacks.tx(tx).delete(id)
    })?;
    Ok(StatusCode::NO_CONTENT)
}
