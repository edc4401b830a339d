//! Custom template library.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::RestrictedRequestContext;
use crate::error::{ApiResult, AppError};
use crate::persistence::{
    CustomTemplate, CustomTemplateId, Ownership, ResourceControl, ResourceControlId,
    ResourceControlType,
};
use crate::proxy::access::can_access_resource;

#[derive(Debug, Deserialize)]
pub struct CustomTemplatePayload {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub file_content: String,
    #[serde(default)]
    pub platform: String,
}

/// Creation attaches a private resource-control record owned by the author,
/// so templates stay invisible to other non-admin users until shared.
pub async fn create(
    State(state): State<AppState>,
    axum::Extension(context): axum::Extension<RestrictedRequestContext>,
    Json(payload): Json<CustomTemplatePayload>,
) -> ApiResult<(StatusCode, Json<CustomTemplate>)> {
    if payload.title.is_empty() || payload.file_content.is_empty() {
        return Err(AppError::bad_request("title and file content are required"));
    }

    let mut template = CustomTemplate {
        id: CustomTemplateId(0),
        title: payload.title,
        description: payload.description,
        file_content: payload.file_content,
        platform: payload.platform,
        created_by: context.user_id,
    };

    state.services.store().update(|tx| {
        state.services.custom_templates.tx(tx).create(&mut template)?;
        let mut control = ResourceControl {
            id: ResourceControlId(0),
            resource_id: template.id.0.to_string(),
            kind: ResourceControlType::CustomTemplate,
            ownership: Ownership::Private,
            user_ids: vec![context.user_id],
            team_ids: Vec::new(),
        };
        state.services.resource_controls.tx(tx).create(&mut control)
    })?;

    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn inspect(
    State(state): State<AppState>,
    axum::Extension(context): axum::Extension<RestrictedRequestContext>,
    Path(id): Path<u32>,
) -> ApiResult<Json<CustomTemplate>> {
    let template = state
        .services
        .custom_templates
        .read(id)
        .map_err(|_| AppError::access_denied())?;

    let control = state
        .services
        .resource_controls
        .by_resource(ResourceControlType::CustomTemplate, &id.to_string())?;
    // A record always exists for templates; a missing one means an admin
    // removed sharing entirely, which only admins may bypass.
    let allowed = match &control {
        Some(_) => can_access_resource(&context, control.as_ref()),
        None => context.is_admin(),
    };
    if !allowed {
        return Err(AppError::access_denied());
    }
    Ok(Json(template))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::test_support::test_state;
    use crate::persistence::{TeamId, UserId, UserRole};

    fn context(user: u32, role: UserRole) -> RestrictedRequestContext {
        RestrictedRequestContext {
            user_id: UserId(user),
            username: format!("user-{user}"),
            role,
            team_ids: Vec::<TeamId>::new(),
        }
    }

    #[tokio::test]
    async fn templates_are_private_to_their_author() {
        let (_dir, state) = test_state();

        let (_, Json(template)) = create(
            State(state.clone()),
            axum::Extension(context(2, UserRole::Standard)),
            Json(CustomTemplatePayload {
                title: "nginx".into(),
                description: String::new(),
                file_content: "services: {}".into(),
                platform: "linux".into(),
            }),
        )
        .await
        .expect("create");

        // The author and admins see it.
        inspect(
            State(state.clone()),
            axum::Extension(context(2, UserRole::Standard)),
            Path(template.id.0),
        )
        .await
        .expect("author access");
        inspect(
            State(state.clone()),
            axum::Extension(context(1, UserRole::Admin)),
            Path(template.id.0),
        )
        .await
        .expect("admin access");

        // Another user gets the stable 403, as does a missing template.
        let denied = inspect(
            State(state.clone()),
            axum::Extension(context(3, UserRole::Standard)),
            Path(template.id.0),
        )
        .await
        .expect_err("not shared");
        assert_eq!(denied.status, StatusCode::FORBIDDEN);

        let missing = inspect(
            State(state),
            axum::Extension(context(3, UserRole::Standard)),
            Path(999),
        )
        .await
        .expect_err("missing template");
        assert_eq!(missing.status, StatusCode::FORBIDDEN);
        assert_eq!(missing.message, denied.message);
    }
}
