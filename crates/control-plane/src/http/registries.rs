//! Registry records referenced from stack definitions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};
use crate::persistence::{Registry, RegistryId};

#[derive(Debug, Deserialize)]
pub struct RegistryPayload {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub authentication: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<Registry>>> {
    let mut registries = state.services.registries.read_all()?;
    // Credentials never leave the API.
    for registry in &mut registries {
        registry.password = String::new();
    }
    Ok(Json(registries))
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<RegistryPayload>,
) -> ApiResult<(StatusCode, Json<Registry>)> {
    if payload.name.is_empty() || payload.url.is_empty() {
        return Err(AppError::bad_request("registry name and url are required"));
    }
    if payload.authentication && payload.username.is_empty() {
        return Err(AppError::bad_request(
            "authenticated registries need a username",
        ));
    }

    let mut registry = Registry {
        id: RegistryId(0),
        name: payload.name,
        url: payload.url,
        authentication: payload.authentication,
        username: payload.username,
        password: payload.password,
    };
    state.services.registries.create(&mut registry)?;

    registry.password = String::new();
    Ok((StatusCode::CREATED, Json(registry)))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<u32>) -> ApiResult<StatusCode> {
    state.services.registries.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}
