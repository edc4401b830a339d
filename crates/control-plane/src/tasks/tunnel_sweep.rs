use std::time::Duration;

use tracing::info;

use crate::app_state::AppState;

/// Periodically closes inactive tunnels and reaps handshakes that never
/// completed. Endpoints whose tunnel was closed keep their last status; the
/// next proxy request or snapshot re-establishes state.
pub async fn tunnel_sweep_loop(state: AppState) {
    let mut interval =
        tokio::time::interval(Duration::from_secs(state.config.tunnel.sweep_interval_secs.max(1)));

    loop {
        interval.tick().await;
        let closed = state.tunnels.sweep().await;
        for endpoint in closed {
            info!(%endpoint, "closed idle tunnel");
            // The agent must pick up fresh credentials on its next poll.
            state.poll_cache.del(endpoint);
        }
    }
}
