//! Instance-wide settings.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};
use crate::persistence::Settings;

#[derive(Debug, Deserialize)]
pub struct SettingsPayload {
    pub edge_agent_checkin_interval: u64,
    pub edge_snapshot_interval: u64,
    pub edge_command_interval: u64,
}

pub async fn inspect(State(state): State<AppState>) -> ApiResult<Json<Settings>> {
    Ok(Json(state.services.settings.current()?))
}

/// Interval changes alter what agents should be told on their next poll, so
/// every cached payload is dropped.
pub async fn update(
    State(state): State<AppState>,
    Json(payload): Json<SettingsPayload>,
) -> ApiResult<Json<Settings>> {
    if payload.edge_agent_checkin_interval == 0 {
        return Err(AppError::bad_request("check-in interval must be non-zero"));
    }

    let settings = Settings {
        edge_agent_checkin_interval: payload.edge_agent_checkin_interval,
        edge_snapshot_interval: payload.edge_snapshot_interval,
        edge_command_interval: payload.edge_command_interval,
    };
    state.services.settings.save(&settings)?;
    state.poll_cache.clear();
    Ok(Json(settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::test_support::test_state;
    use crate::persistence::EndpointId;

    #[tokio::test]
    async fn settings_updates_clear_the_poll_cache() {
        let (_dir, state) = test_state();
        state.poll_cache.set(
            EndpointId(1),
            common::api::EdgeStatusResponse {
                status: common::api::TunnelStatus::Idle,
                port: 0,
                credentials: None,
                checkin_interval: 5,
                stacks: Vec::new(),
                schedules: Vec::new(),
            },
        );

        let Json(settings) = update(
            State(state.clone()),
            Json(SettingsPayload {
                edge_agent_checkin_interval: 30,
                edge_snapshot_interval: 120,
                edge_command_interval: 60,
            }),
        )
        .await
        .expect("update");

        assert_eq!(settings.edge_agent_checkin_interval, 30);
        assert!(state.poll_cache.get(EndpointId(1)).is_none());
        assert_eq!(
            state
                .services
                .settings
                .current()
                .expect("read")
                .edge_agent_checkin_interval,
            30
        );
    }
}
