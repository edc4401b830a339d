use std::path::PathBuf;

use serde::Deserialize;

pub const ENV_PREFIX: &str = "BERTH";

/// Name of the optional passphrase file inside the data directory. When the
/// file exists its SHA-256 digest becomes the datastore encryption key.
pub const SECRET_FILE_NAME: &str = "berth_secret";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub data: DataConfig,
    pub snapshots: SnapshotConfig,
    pub tunnel: TunnelConfig,
    pub edge: EdgeConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Directory holding the datastore file, TLS material and backups.
    pub dir: PathBuf,
    /// Rewrite the datastore into a fresh file on startup.
    #[serde(default)]
    pub compact_on_startup: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    /// Seconds between background snapshot sweeps.
    #[serde(default = "default_snapshot_interval_secs")]
    pub interval_secs: u64,
    /// Separate, finer interval for async edge environments.
    #[serde(default = "default_edge_async_interval_secs")]
    pub edge_async_interval_secs: u64,
    /// Deadline for an on-demand snapshot request.
    #[serde(default = "default_on_demand_timeout_secs")]
    pub on_demand_timeout_secs: u64,
    /// Upper bound on concurrently running snapshot workers.
    #[serde(default = "default_snapshot_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    /// Port the agents dial for the reverse-tunnel control session.
    pub server_port: u16,
    /// Close an active tunnel after this many seconds without proxy traffic.
    #[serde(default = "default_tunnel_inactivity_secs")]
    pub inactivity_timeout_secs: u64,
    /// Reap a required-but-never-established tunnel after
    /// `reap_multiplier x effective check-in interval`.
    #[serde(default = "default_tunnel_reap_multiplier")]
    pub reap_multiplier: u32,
    /// Seconds between sweeper passes over the tunnel map.
    #[serde(default = "default_tunnel_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EdgeConfig {
    /// Default agent check-in interval when neither the endpoint nor the
    /// stored settings carry an override.
    #[serde(default = "default_edge_checkin_secs")]
    pub checkin_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Session token lifetime in hours.
    #[serde(default = "default_session_lifetime_hours")]
    pub session_lifetime_hours: u64,
    /// Fixed-window budget for authentication attempts per client IP.
    #[serde(default = "default_auth_rate_limit")]
    pub rate_limit_per_minute: u32,
}

fn default_snapshot_interval_secs() -> u64 {
    300
}

fn default_edge_async_interval_secs() -> u64 {
    60
}

fn default_on_demand_timeout_secs() -> u64 {
    15
}

fn default_snapshot_workers() -> usize {
    5
}

fn default_tunnel_inactivity_secs() -> u64 {
    180
}

fn default_tunnel_reap_multiplier() -> u32 {
    2
}

fn default_tunnel_sweep_interval_secs() -> u64 {
    10
}

fn default_edge_checkin_secs() -> u64 {
    5
}

fn default_session_lifetime_hours() -> u64 {
    8
}

fn default_auth_rate_limit() -> u32 {
    10
}

impl SnapshotConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_secs < 300 {
            anyhow::bail!("snapshots.interval_secs must be at least 300");
        }
        if self.edge_async_interval_secs == 0 {
            anyhow::bail!("snapshots.edge_async_interval_secs must be > 0");
        }
        if self.workers == 0 {
            anyhow::bail!("snapshots.workers must be > 0");
        }
        Ok(())
    }
}

impl TunnelConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server_port == 0 {
            anyhow::bail!("tunnel.server_port must be > 0");
        }
        if self.inactivity_timeout_secs == 0 {
            anyhow::bail!("tunnel.inactivity_timeout_secs must be > 0");
        }
        if self.reap_multiplier == 0 {
            anyhow::bail!("tunnel.reap_multiplier must be > 0");
        }
        Ok(())
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    let env = config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true);

    let builder = config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(env)
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 9000)?
        .set_default("data.dir", "data")?
        .set_default("data.compact_on_startup", false)?
        .set_default("snapshots.interval_secs", default_snapshot_interval_secs())?
        .set_default(
            "snapshots.edge_async_interval_secs",
            default_edge_async_interval_secs(),
        )?
        .set_default(
            "snapshots.on_demand_timeout_secs",
            default_on_demand_timeout_secs(),
        )?
        .set_default("snapshots.workers", default_snapshot_workers() as u64)?
        .set_default("tunnel.server_port", 8000)?
        .set_default(
            "tunnel.inactivity_timeout_secs",
            default_tunnel_inactivity_secs(),
        )?
        .set_default("tunnel.reap_multiplier", default_tunnel_reap_multiplier())?
        .set_default(
            "tunnel.sweep_interval_secs",
            default_tunnel_sweep_interval_secs(),
        )?
        .set_default("edge.checkin_interval_secs", default_edge_checkin_secs())?
        .set_default(
            "auth.session_lifetime_hours",
            default_session_lifetime_hours(),
        )?
        .set_default("auth.rate_limit_per_minute", default_auth_rate_limit())?;

    let cfg = builder.build()?;
    let app: AppConfig = cfg.try_deserialize()?;
    app.snapshots.validate()?;
    app.tunnel.validate()?;
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_interval_below_five_minutes_is_rejected() {
        let cfg = SnapshotConfig {
            interval_secs: 60,
            edge_async_interval_secs: 60,
            on_demand_timeout_secs: 15,
            workers: 5,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tunnel_config_requires_nonzero_reap_multiplier() {
        let cfg = TunnelConfig {
            server_port: 8000,
            inactivity_timeout_secs: 180,
            reap_multiplier: 0,
            sweep_interval_secs: 10,
        };
        assert!(cfg.validate().is_err());
    }
}
