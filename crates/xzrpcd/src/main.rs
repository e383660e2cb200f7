//! xzrpcd — xzrpc server daemon.
//!
//! Serves the built-in services over RPC and, unless disabled, the discovery
//! registry over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinHandle};

use xzrpc_api::ApiState;
use xzrpc_core::config::XzrpcConfig;
use xzrpc_server::{bind_listener, Server};
use xzrpc_services::{Arith, DiscoveryRegistry, ServiceDirectory};

mod discovery;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = XzrpcConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = XzrpcConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        XzrpcConfig::default()
    });
    tracing::info!(
        rpc_addr = %config.network.rpc_addr,
        transport = ?config.network.transport,
        registry = config.registry.enabled,
        "xzrpcd starting"
    );

    // Services
    let directory = Arc::new(ServiceDirectory::new());
    directory
        .register(Arith)
        .context("failed to register Arith")?;
    for service in directory.services() {
        let methods: Vec<&str> = service.methods.iter().map(|(m, _)| m.as_str()).collect();
        tracing::info!(service = %service.name, methods = ?methods, "service ready");
    }

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── RPC listener ─────────────────────────────────────────────────────────

    let rpc_addr: SocketAddr = config
        .network
        .rpc_addr
        .parse()
        .with_context(|| format!("invalid rpc_addr {:?}", config.network.rpc_addr))?;
    let rpc_listener = bind_listener(rpc_addr).context("failed to bind rpc listener")?;
    let rpc_local = rpc_listener.local_addr()?;

    let server = Arc::new(Server::new(directory, config.server.clone()));
    tracing::info!(
        max_inflight_per_conn = config.server.max_inflight_per_conn,
        backpressure = ?config.server.backpressure,
        request_timeout_ms = config.server.request_timeout_ms,
        "rpc server configured"
    );
    let rpc_task = tokio::spawn(server.accept(
        rpc_listener,
        config.network.transport,
        shutdown_tx.subscribe(),
    ));

    // ── Discovery registry ───────────────────────────────────────────────────

    let registry = Arc::new(DiscoveryRegistry::new(Duration::from_secs(
        config.registry.ttl_secs,
    )));

    let mut api_task = None;
    let mut sweep_task = None;
    if config.registry.enabled {
        xzrpc_api::check_path(&config.registry.path)?;
        let listener = TcpListener::bind(&config.network.registry_addr)
            .await
            .with_context(|| format!("failed to bind registry on {}", config.network.registry_addr))?;

        let state = ApiState::new(registry.clone(), &config.registry);
        let path = config.registry.path.clone();
        api_task = Some(tokio::spawn(async move {
            if let Err(e) = xzrpc_api::serve(listener, state, &path).await {
                tracing::error!(error = %e, "registry server failed");
            }
        }));

        if config.registry.sweep_interval_secs > 0 && config.registry.ttl_secs > 0 {
            sweep_task = Some(tokio::spawn(discovery::sweep_loop(
                registry.clone(),
                Duration::from_secs(config.registry.sweep_interval_secs),
            )));
        }
    }

    // ── Heartbeat ────────────────────────────────────────────────────────────

    let heartbeat_task = if config.heartbeat.registry_url.is_empty() {
        None
    } else {
        let advertise = if config.heartbeat.advertise_addr.is_empty() {
            rpc_local.to_string()
        } else {
            config.heartbeat.advertise_addr.clone()
        };
        Some(tokio::spawn(discovery::heartbeat_loop(
            config.heartbeat.registry_url.clone(),
            advertise,
            Duration::from_secs(config.heartbeat.interval_secs()),
        )))
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        _ = shutdown_rx.recv()         => tracing::info!("shutting down"),
        r = rpc_task                   => tracing::error!("rpc listener exited: {:?}", r),
        r = join_if_running(api_task)  => tracing::error!("registry server exited: {:?}", r),
        r = join_if_running(sweep_task) => tracing::error!("sweep task exited: {:?}", r),
        r = join_if_running(heartbeat_task) => tracing::error!("heartbeat task exited: {:?}", r),
    }

    Ok(())
}

/// Wait on an optional task; a task that was never started never finishes.
async fn join_if_running(task: Option<JoinHandle<()>>) -> Result<(), JoinError> {
    match task {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}
