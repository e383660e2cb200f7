//! Discovery HTTP handlers.
//!
//! Every registration made over HTTP is filed under the one
//! (app id, env, hostname) tuple the state was built with, and GET reads the
//! same key.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;

use xzrpc_core::config::RegistryConfig;
use xzrpc_core::wire::{SERVERS_HEADER, SERVER_HEADER};
use xzrpc_services::{unix_now, DiscoveryRegistry, ServerItem};

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<DiscoveryRegistry>,
    pub app_id: String,
    pub env: String,
    pub hostname: String,
}

impl ApiState {
    pub fn new(registry: Arc<DiscoveryRegistry>, config: &RegistryConfig) -> Self {
        Self {
            registry,
            app_id: config.app_id.clone(),
            env: config.env.clone(),
            hostname: config.hostname.clone(),
        }
    }
}

// ── GET {path} ───────────────────────────────────────────────────────────────

pub async fn handle_get_servers(
    State(state): State<ApiState>,
) -> Result<[(&'static str, String); 1], (StatusCode, String)> {
    let alive = state
        .registry
        .alive_servers(&state.app_id, &state.env)
        .map_err(|e| {
            tracing::warn!(error = %e, "failed to look up servers");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    Ok([(SERVERS_HEADER, alive.join(","))])
}

// ── POST {path} ──────────────────────────────────────────────────────────────

pub async fn handle_register(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<StatusCode, (StatusCode, String)> {
    let addr = headers
        .get(SERVER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();
    if addr.is_empty() {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("missing {SERVER_HEADER} header"),
        ));
    }

    let app = state.registry.register(ServerItem::new(
        addr,
        &state.app_id,
        &state.env,
        &state.hostname,
    ));
    tracing::info!(address = addr, app_id = app.app_id(), servers = app.len(), "server registered");

    Ok(StatusCode::OK)
}

// ── GET {path}/apps ──────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct AppsResponse {
    pub ttl_secs: u64,
    pub now: u64,
    pub apps: Vec<AppInfo>,
}

#[derive(Serialize)]
pub struct AppInfo {
    pub app_id: String,
    pub env: String,
    pub servers: Vec<ServerInfo>,
}

#[derive(Serialize)]
pub struct ServerInfo {
    #[serde(flatten)]
    pub item: ServerItem,
    pub alive: bool,
}

pub async fn handle_apps(State(state): State<ApiState>) -> Json<AppsResponse> {
    let ttl_secs = state.registry.ttl_secs();
    let now = unix_now();

    let apps = state
        .registry
        .apps()
        .into_iter()
        .map(|app| AppInfo {
            app_id: app.app_id().to_string(),
            env: app.env().to_string(),
            servers: app
                .servers()
                .into_iter()
                .map(|item| ServerInfo {
                    alive: item.is_alive(ttl_secs, now),
                    item,
                })
                .collect(),
        })
        .collect();

    Json(AppsResponse {
        ttl_secs,
        now,
        apps,
    })
}
