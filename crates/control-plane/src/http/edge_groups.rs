//! Edge group management.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::edge::dispatch::reconcile_stack_in;
use crate::error::{ApiResult, AppError};
use crate::persistence::{read_all_tx, EdgeGroup, EdgeGroupId, EdgeStack, EndpointId, TagId};
use crate::roar::Roar;

#[derive(Debug, Deserialize)]
pub struct EdgeGroupPayload {
    pub name: String,
    #[serde(default)]
    pub dynamic: bool,
    #[serde(default)]
    pub partial_match: bool,
    #[serde(default)]
    pub tag_ids: Vec<u32>,
    #[serde(default)]
    pub endpoint_ids: Vec<u32>,
}

impl EdgeGroupPayload {
    fn into_group(self, id: EdgeGroupId) -> ApiResult<EdgeGroup> {
        if self.name.is_empty() {
            return Err(AppError::bad_request("edge group name is required"));
        }
        let group = EdgeGroup {
            id,
            name: self.name,
            dynamic: self.dynamic,
            partial_match: self.partial_match,
            tag_ids: self.tag_ids.into_iter().map(TagId).collect(),
            endpoint_ids: Roar::from_slice(
                &self
                    .endpoint_ids
                    .into_iter()
                    .map(EndpointId)
                    .collect::<Vec<_>>(),
            ),
        };
        group
            .validate()
            .map_err(|reason| AppError::bad_request(reason).with_details("membership mode"))?;
        Ok(group)
    }
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<EdgeGroup>>> {
    Ok(Json(state.services.edge_groups.read_all()?))
}

pub async fn inspect(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> ApiResult<Json<EdgeGroup>> {
    Ok(Json(state.services.edge_groups.read(id)?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<EdgeGroupPayload>,
) -> ApiResult<(StatusCode, Json<EdgeGroup>)> {
    let mut group = payload.into_group(EdgeGroupId(0))?;
    state.services.edge_groups.create(&mut group)?;
    Ok((StatusCode::CREATED, Json(group)))
}

/// Updating a group can change which endpoints its stacks target, so every
/// stack referencing the group is reconciled in the same transaction.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(payload): Json<EdgeGroupPayload>,
) -> ApiResult<Json<EdgeGroup>> {
    let group = payload.into_group(EdgeGroupId(id))?;

    state.services.store().update(|tx| {
        state.services.edge_groups.tx(tx).update(id, &group)?;

        let stacks = read_all_tx::<EdgeStack>(tx)?;
        for stack in stacks {
            if stack.edge_groups.contains(&group.id) {
                reconcile_stack_in(&state.services, tx, &stack)?;
            }
        }
        Ok(())
    })?;

    Ok(Json(group))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<u32>) -> ApiResult<StatusCode> {
    let referencing = state
        .services
        .edge_groups
        .referencing_artifacts(EdgeGroupId(id))?;
    if !referencing.is_empty() {
        return Err(
            AppError::conflict("edge group is still in use").with_details(referencing.join(", "))
        );
    }

    state.services.edge_groups.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}
