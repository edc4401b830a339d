//! Team and membership management.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};
use crate::persistence::{Team, TeamId, TeamMembership, TeamMembershipId, TeamRole, UserId};

#[derive(Debug, Deserialize)]
pub struct TeamPayload {
    pub name: String,
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<Team>>> {
    Ok(Json(state.services.teams.read_all()?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<TeamPayload>,
) -> ApiResult<(StatusCode, Json<Team>)> {
    if payload.name.is_empty() {
        return Err(AppError::bad_request("team name is required"));
    }

    let mut team = Team {
        id: TeamId(0),
        name: payload.name,
    };
    state.services.teams.create(&mut team)?;
    Ok((StatusCode::CREATED, Json(team)))
}

/// Deleting a team also removes its memberships.
pub async fn delete(State(state): State<AppState>, Path(id): Path<u32>) -> ApiResult<StatusCode> {
    let team_id = TeamId(id);
    state.services.store().update(|tx| {
        let memberships = state.services.team_memberships.tx(tx).read_all()?;
        for membership in memberships {
            if membership.team_id == team_id {
                state
                    .services
                    .team_memberships
                    .tx(tx)
                    .delete(membership.id.0)?;
            }
        }
        state.services.teams.tx(tx).delete(id)
    })?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct MembershipPayload {
    pub user_id: u32,
    pub team_id: u32,
    #[serde(default = "default_member_role")]
    pub role: TeamRole,
}

fn default_member_role() -> TeamRole {
    TeamRole::Member
}

pub async fn create_membership(
    State(state): State<AppState>,
    Json(payload): Json<MembershipPayload>,
) -> ApiResult<(StatusCode, Json<TeamMembership>)> {
    state
        .services
        .users
        .read(payload.user_id)
        .map_err(|_| AppError::bad_request("unknown user"))?;
    state
        .services
        .teams
        .read(payload.team_id)
        .map_err(|_| AppError::bad_request("unknown team"))?;

    let mut membership = TeamMembership {
        id: TeamMembershipId(0),
        user_id: UserId(payload.user_id),
        team_id: TeamId(payload.team_id),
        role: payload.role,
    };
    state.services.team_memberships.create(&mut membership)?;
    Ok((StatusCode::CREATED, Json(membership)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::test_support::test_state;

    #[tokio::test]
    async fn team_deletion_removes_memberships() {
        let (_dir, state) = test_state();

        let mut user = crate::persistence::User {
            id: UserId(0),
            username: "alice".into(),
            password_hash: String::new(),
            role: crate::persistence::UserRole::Standard,
        };
        state.services.users.create(&mut user).expect("user");

        let (_, Json(team)) = create(
            State(state.clone()),
            Json(TeamPayload { name: "ops".into() }),
        )
        .await
        .expect("team");

        create_membership(
            State(state.clone()),
            Json(MembershipPayload {
                user_id: user.id.0,
                team_id: team.id.0,
                role: TeamRole::Leader,
            }),
        )
        .await
        .expect("membership");
        assert_eq!(
            state
                .services
                .team_memberships
                .teams_of_user(user.id)
                .expect("teams"),
            vec![team.id]
        );

        delete(State(state.clone()), Path(team.id.0))
            .await
            .expect("delete");
        assert!(state
            .services
            .team_memberships
            .teams_of_user(user.id)
            .expect("teams")
            .is_empty());
    }
}
