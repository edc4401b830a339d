pub mod app_state;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod edge;
pub mod error;
pub mod filters;
pub mod fs;
pub mod git;
pub mod http;
pub mod jwt;
pub mod pending_actions;
pub mod persistence;
pub mod proxy;
pub mod rate_limit;
pub mod roar;
pub mod routes;
pub mod store;
pub mod tasks;
pub mod telemetry;
pub mod tunnel;

pub type Result<T> = std::result::Result<T, anyhow::Error>;

use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::get;
use rand::RngCore;
use tracing::{error, info, warn};

use crate::app_state::AppState;
use crate::crypto::CryptoSuite;
use crate::persistence::{User, UserId, UserRole};
use crate::store::Store;

/// Boots the control plane: datastore, background loops, HTTP server.
///
/// The two startup fatals (ambiguous database state, encrypted database
/// without its key) propagate out of here so the process exits non-zero
/// before any write happens.
pub async fn run() -> Result<()> {
    let app_config = config::load()?;
    let suite = CryptoSuite::from_env();

    let secret_path = app_config.data.dir.join(config::SECRET_FILE_NAME);
    let key = if secret_path.exists() {
        let secret = std::fs::read(&secret_path)?;
        if secret.is_empty() {
            anyhow::bail!("secret file {} is empty", secret_path.display());
        }
        Some(crypto::master_key(&secret))
    } else {
        None
    };

    let store = Store::open(
        &app_config.data.dir,
        key,
        suite,
        app_config.data.compact_on_startup,
    )?;

    // Sessions do not survive a restart; a fresh signing secret is cheaper
    // than persisting one next to the data it would protect.
    let mut jwt_secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut jwt_secret);

    let state = AppState::new(app_config.clone(), store, &jwt_secret);
    ensure_admin_user(&state)?;

    tokio::spawn(tasks::snapshot::snapshot_loop(state.clone()));
    tokio::spawn(tasks::tunnel_sweep::tunnel_sweep_loop(state.clone()));

    let metrics_handle = telemetry::init_metrics_recorder();
    let app = routes::build_router(state.clone())
        .route("/metrics", get(move || async move { metrics_handle.render() }))
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", app_config.server.host, app_config.server.port)
        .parse()
        .map_err(|err| anyhow::anyhow!("invalid listen address: {err}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "control plane listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

/// First boot provisions an administrator with a generated password, logged
/// once. Every later boot is a no-op.
fn ensure_admin_user(state: &AppState) -> Result<()> {
    if !state.services.users.read_all()?.is_empty() {
        return Ok(());
    }

    let password: String = {
        use rand::distributions::Alphanumeric;
        use rand::Rng;
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect()
    };

    let mut admin = User {
        id: UserId(0),
        username: "admin".into(),
        password_hash: http::auth::hash_password(&password)?,
        role: UserRole::Admin,
    };
    state.services.users.create(&mut admin)?;
    warn!(
        username = "admin",
        password = %password,
        "created initial administrator; change this password immediately"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(%err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("received SIGTERM, shutting down");
        },
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
}
