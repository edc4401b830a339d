//! HTTP handlers.

pub mod auth;
pub mod backup;
pub mod custom_templates;
pub mod edge;
pub mod edge_groups;
pub mod edge_jobs;
pub mod edge_stacks;
pub mod endpoints;
pub mod registries;
pub mod settings;
pub mod stacks;
pub mod tags;
pub mod teams;

use axum::http::Request;

use crate::auth::RestrictedRequestContext;
use crate::error::{ApiResult, AppError};

/// Restricted context stashed by the bouncer middleware.
pub fn request_context<B>(req: &Request<B>) -> ApiResult<&RestrictedRequestContext> {
    req.extensions()
        .get::<RestrictedRequestContext>()
        .ok_or_else(|| AppError::internal("request context missing"))
}
