//! xzrpc-api — the discovery registry over HTTP.
//!
//! | Method | Path | |
//! |---|---|---|
//! | GET | `{path}` | alive addresses in the `X-Xzrpc-Servers` header |
//! | POST | `{path}` | register the `X-Xzrpc-Server` header's address |
//! | GET | `{path}/apps` | JSON snapshot of every app |
//!
//! Other methods on `{path}` get 405.

pub mod handlers;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub use handlers::ApiState;

/// Build the registry router mounted at `path`.
///
/// `path` must be a plain absolute path; see `check_path`.
pub fn router(state: ApiState, path: &str) -> Router {
    let apps_path = format!("{}/apps", path.trim_end_matches('/'));

    Router::new()
        .route(
            path,
            get(handlers::handle_get_servers).post(handlers::handle_register),
        )
        .route(&apps_path, get(handlers::handle_apps))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Reject paths the router can't mount literally.
pub fn check_path(path: &str) -> anyhow::Result<()> {
    anyhow::ensure!(path.starts_with('/'), "registry path {path:?} must start with '/'");
    anyhow::ensure!(
        !path.contains(['{', '}']) && !path.split('/').any(|s| s.starts_with([':', '*'])),
        "registry path {path:?} must not contain route parameters"
    );
    Ok(())
}

/// Serve the registry on an already bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, state: ApiState, path: &str) -> anyhow::Result<()> {
    check_path(path)?;
    let app = router(state, path);

    let addr = listener.local_addr().context("registry listener address")?;
    tracing::info!(addr = %addr, path, "registry listening");
    axum::serve(listener, app).await?;
    Ok(())
}
