//! Tag management; tags feed dynamic edge-group membership.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::edge::dispatch::reconcile_stack_in;
use crate::error::{ApiResult, AppError};
use crate::persistence::{read_all_tx, EdgeStack, Tag, TagId};

#[derive(Debug, Deserialize)]
pub struct TagPayload {
    pub name: String,
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<Tag>>> {
    Ok(Json(state.services.tags.read_all()?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<TagPayload>,
) -> ApiResult<(StatusCode, Json<Tag>)> {
    if payload.name.is_empty() {
        return Err(AppError::bad_request("tag name is required"));
    }
    if state
        .services
        .tags
        .read_all()?
        .iter()
        .any(|tag| tag.name == payload.name)
    {
        return Err(AppError::conflict("tag already exists"));
    }

    let mut tag = Tag {
        id: TagId(0),
        name: payload.name,
    };
    state.services.tags.create(&mut tag)?;
    Ok((StatusCode::CREATED, Json(tag)))
}

/// Deleting a tag detaches it from endpoints and groups, which can shrink
/// dynamic edge-group membership, so every stack is reconciled.
pub async fn delete(State(state): State<AppState>, Path(id): Path<u32>) -> ApiResult<StatusCode> {
    let tag_id = TagId(id);
    state.services.store().update(|tx| {
        state.services.tags.tx(tx).delete(id)?;

        let endpoints = read_all_tx::<crate::persistence::Endpoint>(tx)?;
        for mut endpoint in endpoints {
            if endpoint.tag_ids.contains(&tag_id) {
                endpoint.tag_ids.retain(|candidate| *candidate != tag_id);
                let id = endpoint.id.0;
                state.services.endpoints.tx(tx).update(id, &endpoint)?;
            }
        }

        let groups = read_all_tx::<crate::persistence::EndpointGroup>(tx)?;
        for mut group in groups {
            if group.tag_ids.contains(&tag_id) {
                group.tag_ids.retain(|candidate| *candidate != tag_id);
                let id = group.id.0;
                state.services.endpoint_groups.tx(tx).update(id, &group)?;
            }
        }

        let edge_groups = read_all_tx::<crate::persistence::EdgeGroup>(tx)?;
        for mut edge_group in edge_groups {
            if edge_group.tag_ids.contains(&tag_id) {
                edge_group.tag_ids.retain(|candidate| *candidate != tag_id);
                let id = edge_group.id.0;
                state.services.edge_groups.tx(tx).update(id, &edge_group)?;
            }
        }

        for stack in read_all_tx::<EdgeStack>(tx)? {
            reconcile_stack_in(&state.services, tx, &stack)?;
        }
        Ok(())
    })?;
    Ok(StatusCode::NO_CONTENT)
}
