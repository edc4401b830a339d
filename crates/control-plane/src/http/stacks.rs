//! Stack git settings, including webhook registration.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};
use crate::persistence::stacks::is_webhook_conflict;
use crate::persistence::{GitConfig, Stack, StackId};

#[derive(Debug, Deserialize)]
pub struct StackGitUpdatePayload {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    /// Webhook token; must be unique across all stacks.
    #[serde(default)]
    pub webhook: Option<String>,
}

pub async fn update_git(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(payload): Json<StackGitUpdatePayload>,
) -> ApiResult<Json<Stack>> {
    let stack_id = StackId(id);
    let mut stack = state.services.stacks.read(id)?;

    if payload.url.is_some() || payload.reference.is_some() {
        let git = stack.git.get_or_insert_with(|| GitConfig {
            url: String::new(),
            reference: String::new(),
            commit_hash: None,
        });
        if let Some(url) = payload.url {
            git.url = url;
        }
        if let Some(reference) = payload.reference {
            git.reference = reference;
        }
        state.services.stacks.update(id, &stack)?;
    }

    if let Some(webhook) = payload.webhook {
        if webhook.is_empty() {
            return Err(AppError::bad_request("webhook token cannot be empty"));
        }
        state
            .services
            .stacks
            .claim_webhook(stack_id, &webhook)
            .map_err(|err| {
                if is_webhook_conflict(&err) {
                    AppError::conflict("webhook token already in use")
                } else {
                    AppError::from(err)
                }
            })?;
    }

    Ok(Json(state.services.stacks.read(id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::test_support::test_state;
    use crate::persistence::EndpointId;
    use axum::http::StatusCode;
    use chrono::Utc;

    fn seed_stack(state: &crate::app_state::AppState, name: &str) -> Stack {
        let mut stack = Stack {
            id: StackId(0),
            name: name.into(),
            endpoint_id: EndpointId(1),
            entry_point: "docker-compose.yml".into(),
            file_content: String::new(),
            git: Some(GitConfig {
                url: "https://git.example.com/app.git".into(),
                reference: "refs/heads/main".into(),
                commit_hash: None,
            }),
            auto_update: None,
            created_at: Utc::now(),
        };
        state.services.stacks.create(&mut stack).expect("create");
        stack
    }

    #[tokio::test]
    async fn duplicate_webhooks_conflict_across_stacks() {
        let (_dir, state) = test_state();
        let first = seed_stack(&state, "one");
        let second = seed_stack(&state, "two");

        let Json(updated) = update_git(
            State(state.clone()),
            Path(first.id.0),
            Json(StackGitUpdatePayload {
                url: None,
                reference: None,
                webhook: Some("44a84b2f".into()),
            }),
        )
        .await
        .expect("first webhook");
        assert_eq!(
            updated.auto_update.expect("auto update").webhook.as_deref(),
            Some("44a84b2f")
        );

        let err = update_git(
            State(state),
            Path(second.id.0),
            Json(StackGitUpdatePayload {
                url: None,
                reference: None,
                webhook: Some("44a84b2f".into()),
            }),
        )
        .await
        .expect_err("duplicate webhook");
        assert_eq!(err.status, StatusCode::CONFLICT);
    }
}
