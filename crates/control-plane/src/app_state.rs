use std::sync::Arc;
use std::time::Duration;

use crate::auth::RequestBouncer;
use crate::config::AppConfig;
use crate::edge::cache::PollCache;
use crate::git::{GitService, SmartHttpGitService};
use crate::jwt::JwtService;
use crate::pending_actions::PendingActionExecutor;
use crate::persistence::DataServices;
use crate::rate_limit::FixedWindowLimiter;
use crate::store::Store;
use crate::tunnel::TunnelManager;

/// Shared application state passed into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub services: DataServices,
    pub jwt: JwtService,
    pub tunnels: TunnelManager,
    pub poll_cache: PollCache,
    pub http_client: reqwest::Client,
    pub git: Arc<dyn GitService>,
    pub bouncer: RequestBouncer,
    pub executor: PendingActionExecutor,
    /// Fixed-window budget for `POST /auth` attempts, keyed by client IP.
    pub auth_limiter: FixedWindowLimiter,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store, jwt_secret: &[u8]) -> Self {
        let poll_cache = PollCache::new();
        let services = DataServices::new(store, poll_cache.clone());
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build http client");

        let jwt = JwtService::new(
            jwt_secret,
            chrono::Duration::hours(config.auth.session_lifetime_hours as i64),
        );

        Self {
            bouncer: RequestBouncer::new(jwt.clone(), services.clone()),
            jwt,
            tunnels: TunnelManager::new(config.tunnel.clone()),
            git: Arc::new(SmartHttpGitService::new(http_client.clone())),
            executor: PendingActionExecutor::new(services.clone()),
            auth_limiter: FixedWindowLimiter::per_minute(config.auth.rate_limit_per_minute),
            poll_cache,
            services,
            http_client,
            config,
        }
    }
}

#[allow(dead_code)]
fn _assert_app_state_bounds() {
    fn assert_bounds<T: Clone + Send + Sync + 'static>() {}
    assert_bounds::<AppState>();
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::crypto::CryptoSuite;

    /// Fresh state over a temporary plain datastore.
    pub fn test_state() -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store =
            Store::open(dir.path(), None, CryptoSuite::Standard, false).expect("open store");
        let mut config = crate::config::AppConfig {
            server: crate::config::ServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
            },
            data: crate::config::DataConfig {
                dir: dir.path().to_path_buf(),
                compact_on_startup: false,
            },
            snapshots: crate::config::SnapshotConfig {
                interval_secs: 300,
                edge_async_interval_secs: 60,
                on_demand_timeout_secs: 15,
                workers: 5,
            },
            tunnel: crate::config::TunnelConfig {
                server_port: 8000,
                inactivity_timeout_secs: 180,
                reap_multiplier: 2,
                sweep_interval_secs: 10,
            },
            edge: crate::config::EdgeConfig {
                checkin_interval_secs: 5,
            },
            auth: crate::config::AuthConfig {
                session_lifetime_hours: 8,
                rate_limit_per_minute: 10,
            },
        };
        config.auth.rate_limit_per_minute = 100;
        (dir, AppState::new(config, store, b"test-jwt-secret"))
    }
}
