//! Background discovery tasks: sweeping stale registrations out of the local
//! registry, and announcing this server to a (possibly remote) registry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use xzrpc_core::wire::SERVER_HEADER;
use xzrpc_services::DiscoveryRegistry;

/// Periodically drop registrations older than the registry's TTL.
///
/// Runs until the task handle is dropped.
pub async fn sweep_loop(registry: Arc<DiscoveryRegistry>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;

    loop {
        interval.tick().await;

        let removed = registry.sweep();
        if removed > 0 {
            tracing::debug!(removed, "swept stale registrations");
        }
    }
}

/// Register `advertise` with the registry at `url` now and then every
/// `every`. Failures are logged and retried on the next tick.
///
/// Runs until the task handle is dropped.
pub async fn heartbeat_loop(url: String, advertise: String, every: Duration) {
    let client = reqwest::Client::new();
    let mut interval = tokio::time::interval(every);

    tracing::info!(url = %url, address = %advertise, every_secs = every.as_secs(), "heartbeat starting");

    loop {
        interval.tick().await;

        match send_heartbeat(&client, &url, &advertise).await {
            Ok(()) => tracing::debug!(url = %url, address = %advertise, "heartbeat sent"),
            Err(e) => tracing::warn!(url = %url, error = format!("{e:#}"), "heartbeat failed"),
        }
    }
}

async fn send_heartbeat(client: &reqwest::Client, url: &str, advertise: &str) -> Result<()> {
    let resp = client
        .post(url)
        .header(SERVER_HEADER, advertise)
        .send()
        .await
        .context("failed to reach registry")?;
    resp.error_for_status()
        .context("registry rejected heartbeat")?;
    Ok(())
}
