//! Edge job management and per-endpoint task listings.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};
use crate::filters::{search_order_and_paginate, FilterConfig, ListQueryParams, SortBinding};
use crate::persistence::{EdgeGroupId, EdgeJob, EdgeJobId, EndpointId};

#[derive(Debug, Deserialize)]
pub struct EdgeJobPayload {
    pub name: String,
    pub cron_expression: String,
    pub script: String,
    #[serde(default)]
    pub edge_groups: Vec<u32>,
}

/// One endpoint the job targets, with its log-collection state.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeJobTask {
    pub endpoint_id: EndpointId,
    pub endpoint_name: String,
    pub log_collected: bool,
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<EdgeJobPayload>,
) -> ApiResult<(StatusCode, Json<EdgeJob>)> {
    if payload.name.is_empty() || payload.cron_expression.is_empty() {
        return Err(AppError::bad_request("name and cron expression are required"));
    }

    let mut job = EdgeJob {
        id: EdgeJobId(0),
        name: payload.name,
        cron_expression: payload.cron_expression,
        script: payload.script,
        edge_groups: payload.edge_groups.into_iter().map(EdgeGroupId).collect(),
        version: 1,
        created_at: Utc::now(),
        collected_logs: Vec::new(),
    };
    state.services.edge_jobs.create(&mut job)?;

    // Agents poll for schedules; drop cached payloads of targeted endpoints.
    for endpoint in job_endpoints(&state, &job)? {
        state.poll_cache.del(endpoint.endpoint_id);
    }
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn tasks(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Query(params): Query<ListQueryParams>,
) -> ApiResult<Response> {
    let job = state.services.edge_jobs.read(id)?;
    let tasks = job_endpoints(&state, &job)?;

    let config = FilterConfig {
        search_accessors: vec![|task: &EdgeJobTask| task.endpoint_name.clone()],
        sort_bindings: vec![SortBinding {
            key: "endpoint",
            cmp: |a: &EdgeJobTask, b: &EdgeJobTask| a.endpoint_name.cmp(&b.endpoint_name),
        }],
    };
    let result = search_order_and_paginate(tasks, &params, &config);
    let headers = result.headers();
    Ok((headers, Json(result.items)).into_response())
}

fn job_endpoints(state: &AppState, job: &EdgeJob) -> ApiResult<Vec<EdgeJobTask>> {
    let endpoints = state.services.endpoints.read_all()?;
    let endpoint_groups = state.services.endpoint_groups.read_all()?;
    let edge_groups = state.services.edge_groups.read_all()?;

    let mut tasks = Vec::new();
    for endpoint in &endpoints {
        let group = endpoint_groups
            .iter()
            .find(|group| group.id == endpoint.group_id);
        let related = job.edge_groups.iter().any(|group_id| {
            edge_groups
                .iter()
                .find(|candidate| candidate.id == *group_id)
                .is_some_and(|edge_group| {
                    crate::edge::edge_group_related_to_endpoint(edge_group, endpoint, group)
                })
        });
        if related {
            tasks.push(EdgeJobTask {
                endpoint_id: endpoint.id,
                endpoint_name: endpoint.name.clone(),
                log_collected: job.collected_logs.contains(&endpoint.id),
            });
        }
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::test_support::test_state;
    use crate::persistence::endpoints::test_endpoint;
    use crate::persistence::{EdgeGroup, EndpointType};
    use crate::roar::Roar;

    #[tokio::test]
    async fn tasks_list_is_paginated_with_totals() {
        let (_dir, state) = test_state();

        let mut members = Vec::new();
        for _ in 0..3 {
            let mut endpoint = test_endpoint(0, EndpointType::EdgeAgentOnDocker);
            state
                .services
                .endpoints
                .create(&mut endpoint)
                .expect("create endpoint");
            members.push(endpoint.id);
        }

        let mut group = EdgeGroup {
            id: EdgeGroupId(0),
            name: "all".into(),
            dynamic: false,
            partial_match: false,
            tag_ids: Vec::new(),
            endpoint_ids: Roar::from_slice(&members),
        };
        state
            .services
            .edge_groups
            .create(&mut group)
            .expect("create group");

        let (_, Json(job)) = create(
            State(state.clone()),
            Json(EdgeJobPayload {
                name: "prune-logs".into(),
                cron_expression: "0 2 * * *".into(),
                script: "#!/bin/sh".into(),
                edge_groups: vec![group.id.0],
            }),
        )
        .await
        .expect("create job");

        let response = tasks(
            State(state),
            Path(job.id.0),
            Query(ListQueryParams {
                limit: Some(2),
                ..Default::default()
            }),
        )
        .await
        .expect("tasks");

        assert_eq!(response.headers().get("x-total-count").unwrap(), "3");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let items: Vec<serde_json::Value> = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(items.len(), 2);
    }
}
