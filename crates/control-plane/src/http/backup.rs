//! Encrypted backup and restore of the data directory.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::app_state::AppState;
use crate::crypto::CryptoSuite;
use crate::error::{ApiResult, AppError};
use crate::fs::{FileService, FsError};

#[derive(Debug, Deserialize)]
pub struct BackupPayload {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RestorePayload {
    pub password: String,
    /// Base64-encoded backup bundle.
    pub archive: String,
}

pub async fn backup(
    State(state): State<AppState>,
    Json(payload): Json<BackupPayload>,
) -> ApiResult<Response> {
    if payload.password.is_empty() {
        return Err(AppError::bad_request("a backup password is required"));
    }

    let files = FileService::new(state.config.data.dir.clone());
    let bundle = files
        .backup(CryptoSuite::from_env(), payload.password.as_bytes())
        .map_err(|err| AppError::internal(&err.to_string()))?;

    info!(bytes = bundle.len(), "backup bundle created");
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"berth-backup.tar.gz.enc\"".to_string(),
            ),
        ],
        bundle,
    )
        .into_response())
}

pub async fn restore(
    State(state): State<AppState>,
    Json(payload): Json<RestorePayload>,
) -> ApiResult<StatusCode> {
    use base64::Engine as _;
    let bundle = base64::engine::general_purpose::STANDARD
        .decode(payload.archive.as_bytes())
        .map_err(|err| AppError::bad_request(err.to_string()))?;

    let files = FileService::new(state.config.data.dir.clone());
    files
        .restore(
            CryptoSuite::from_env(),
            &bundle,
            payload.password.as_bytes(),
            &state.config.data.dir,
        )
        .map_err(|err| match err {
            FsError::RestoreDecryption => AppError::bad_request(err.to_string()),
            other => AppError::internal(&other.to_string()),
        })?;

    info!("backup restored; restart required to reload the datastore");
    Ok(StatusCode::NO_CONTENT)
}
