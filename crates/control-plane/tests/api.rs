//! End-to-end tests over the assembled router.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use control_plane::app_state::AppState;
use control_plane::config::{
    AppConfig, AuthConfig, DataConfig, EdgeConfig, ServerConfig, SnapshotConfig, TunnelConfig,
};
use control_plane::crypto::CryptoSuite;
use control_plane::http::auth::hash_password;
use control_plane::persistence::{User, UserId, UserRole};
use control_plane::store::Store;

fn test_state(dir: &std::path::Path) -> AppState {
    let store = Store::open(dir, None, CryptoSuite::Standard, false).expect("open store");
    let config = AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        },
        data: DataConfig {
            dir: dir.to_path_buf(),
            compact_on_startup: false,
        },
        snapshots: SnapshotConfig {
            interval_secs: 300,
            edge_async_interval_secs: 60,
            on_demand_timeout_secs: 15,
            workers: 5,
        },
        tunnel: TunnelConfig {
            server_port: 8000,
            inactivity_timeout_secs: 180,
            reap_multiplier: 2,
            sweep_interval_secs: 10,
        },
        edge: EdgeConfig {
            checkin_interval_secs: 5,
        },
        auth: AuthConfig {
            session_lifetime_hours: 8,
            rate_limit_per_minute: 100,
        },
    };
    AppState::new(config, store, b"integration-test-secret")
}

fn seed_user(state: &AppState, username: &str, password: &str, role: UserRole) {
    let mut user = User {
        id: UserId(0),
        username: username.into(),
        password_hash: hash_password(password).expect("hash"),
        role,
    };
    state.services.users.create(&mut user).expect("create user");
}

fn app(state: AppState) -> axum::Router {
    control_plane::routes::build_router(state.clone()).with_state(state)
}

fn request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let mut request = builder.body(body).expect("request");
    let addr: SocketAddr = "127.0.0.1:4321".parse().expect("addr");
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

async fn login(app: &axum::Router, username: &str, password: &str) -> String {
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/auth",
            Some(json!({"username": username, "password": password})),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("set-cookie")
        .to_str()
        .expect("ascii")
        .to_string();
    cookie.split(';').next().expect("cookie pair").to_string()
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = app(test_state(dir.path()));

    let response = app
        .oneshot(request("GET", "/endpoints", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_sets_a_session_cookie_that_authenticates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = test_state(dir.path());
    seed_user(&state, "admin", "sw0rdfish", UserRole::Admin);
    let app = app(state);

    let cookie = login(&app, "admin", "sw0rdfish").await;

    let mut req = request("GET", "/endpoints", None);
    req.headers_mut().insert(
        header::COOKIE,
        header::HeaderValue::from_str(&cookie).expect("cookie"),
    );
    let response = app.oneshot(req).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-total-count").unwrap(), "0");
    assert_eq!(response.headers().get("x-total-available").unwrap(), "0");
}

#[tokio::test]
async fn wrong_passwords_and_unknown_users_answer_alike() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = test_state(dir.path());
    seed_user(&state, "admin", "sw0rdfish", UserRole::Admin);
    let app = app(state);

    for (username, password) in [("admin", "wrong"), ("ghost", "sw0rdfish")] {
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/auth",
                Some(json!({"username": username, "password": password})),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn admin_routes_refuse_standard_users() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = test_state(dir.path());
    seed_user(&state, "alice", "p4ssword!", UserRole::Standard);
    let app = app(state);

    let cookie = login(&app, "alice", "p4ssword!").await;
    let mut req = request(
        "POST",
        "/endpoints",
        Some(json!({"name": "local", "kind": "docker", "url": "http://127.0.0.1:2375"})),
    );
    req.headers_mut().insert(
        header::COOKIE,
        header::HeaderValue::from_str(&cookie).expect("cookie"),
    );

    let response = app.oneshot(req).await.expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn edge_poll_requires_the_edge_header() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = app(test_state(dir.path()));

    let response = app
        .oneshot(request("GET", "/api/endpoints/1/edge/status", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn logout_clears_the_session_cookie() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = app(test_state(dir.path()));

    let response = app
        .oneshot(request("POST", "/auth/logout", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("set-cookie")
        .to_str()
        .expect("ascii");
    assert!(cookie.contains("Max-Age=0"));
}
