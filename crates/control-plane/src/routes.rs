use axum::middleware;
use axum::routing::{any, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::auth::{require_admin, require_authenticated};
use crate::http;

pub fn build_router(state: AppState) -> Router<AppState> {
    // No credentials: login, logout, and the agent poll endpoint (agents
    // authenticate with their edge identifier, not a session).
    let public = Router::new()
        .route("/auth", post(http::auth::login))
        .route("/auth/logout", post(http::auth::logout))
        .route("/api/endpoints/{id}/edge/status", get(http::edge::status));

    let authenticated = Router::new()
        .route("/endpoints", get(http::endpoints::list))
        .route("/endpoints/{id}", get(http::endpoints::inspect))
        .route(
            "/endpoints/{id}/docker/{*path}",
            any(http::endpoints::docker_proxy),
        )
        .route(
            "/endpoints/{id}/kubernetes/{*path}",
            any(http::endpoints::kubernetes_proxy),
        )
        .route("/custom_templates", post(http::custom_templates::create))
        .route("/custom_templates/{id}", get(http::custom_templates::inspect))
        .route("/stacks/{id}/git", post(http::stacks::update_git))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_authenticated,
        ));

    let admin = Router::new()
        .route("/endpoints", post(http::endpoints::create))
        .route(
            "/endpoints/{id}",
            axum::routing::put(http::endpoints::update)
                .delete(http::endpoints::delete),
        )
        .route("/endpoints/snapshot", post(http::endpoints::snapshot_all))
        .route("/endpoints/{id}/snapshot", post(http::endpoints::snapshot_one))
        .route(
            "/edge_groups",
            get(http::edge_groups::list).post(http::edge_groups::create),
        )
        .route(
            "/edge_groups/{id}",
            get(http::edge_groups::inspect)
                .put(http::edge_groups::update)
                .delete(http::edge_groups::delete),
        )
        .route(
            "/edge_stacks",
            get(http::edge_stacks::list).post(http::edge_stacks::create),
        )
        .route(
            "/edge_stacks/{id}",
            get(http::edge_stacks::inspect)
                .put(http::edge_stacks::update)
                .delete(http::edge_stacks::delete),
        )
        .route("/edge_jobs", post(http::edge_jobs::create))
        .route("/edge_jobs/{id}/tasks", get(http::edge_jobs::tasks))
        .route("/backup", post(http::backup::backup))
        .route("/restore", post(http::backup::restore))
        .route(
            "/registries",
            get(http::registries::list).post(http::registries::create),
        )
        .route(
            "/registries/{id}",
            axum::routing::delete(http::registries::delete),
        )
        .route("/teams", get(http::teams::list).post(http::teams::create))
        .route("/teams/{id}", axum::routing::delete(http::teams::delete))
        .route("/team_memberships", post(http::teams::create_membership))
        .route("/tags", get(http::tags::list).post(http::tags::create))
        .route("/tags/{id}", axum::routing::delete(http::tags::delete))
        .route(
            "/settings",
            get(http::settings::inspect).put(http::settings::update),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .merge(public)
        .merge(authenticated)
        .merge(admin)
        .layer(TraceLayer::new_for_http())
}
