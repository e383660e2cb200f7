//! Discovery registry — which server addresses are alive for an
//! (application id, environment) pair.
//!
//! Registrations are refreshed in place by address and age out after the
//! configured TTL. Liveness is decided at read time; `sweep_at` physically
//! drops stale items but keeps their (possibly empty) `App`.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;

/// Errors raised by registry lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no servers registered for app {app_id} in env {env}")]
    AppNotFound { app_id: String, env: String },
}

/// Map key of an (application id, environment) pair.
pub type AppKey = (String, String);

pub fn app_key(app_id: &str, env: &str) -> AppKey {
    (app_id.to_string(), env.to_string())
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// One announced endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerItem {
    pub address: String,
    pub app_id: String,
    pub env: String,
    pub hostname: String,
    /// Unix seconds of the last registration.
    pub registered_at: u64,
}

impl ServerItem {
    pub fn new(
        address: impl Into<String>,
        app_id: impl Into<String>,
        env: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            app_id: app_id.into(),
            env: env.into(),
            hostname: hostname.into(),
            registered_at: 0,
        }
    }

    /// `now - registered_at <= ttl_secs`. A zero TTL never expires.
    pub fn is_alive(&self, ttl_secs: u64, now: u64) -> bool {
        ttl_secs == 0 || now.saturating_sub(self.registered_at) <= ttl_secs
    }
}

/// Every item registered under one key.
#[derive(Debug)]
pub struct App {
    app_id: String,
    env: String,
    items: RwLock<Vec<ServerItem>>,
}

impl App {
    pub fn new(app_id: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            env: env.into(),
            items: RwLock::new(Vec::new()),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    /// Add `item`, or refresh the existing entry with the same address.
    /// Refreshing keeps the entry's position.
    pub fn add_server(&self, item: ServerItem) {
        let mut items = self.items.write();
        match items.iter_mut().find(|i| i.address == item.address) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
    }

    /// Snapshot of every item, live and stale, in registration order.
    pub fn servers(&self) -> Vec<ServerItem> {
        self.items.read().clone()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Drop items that are stale at `now`. Returns how many went.
    pub fn remove_stale(&self, ttl_secs: u64, now: u64) -> usize {
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|i| i.is_alive(ttl_secs, now));
        before - items.len()
    }
}

/// The registry. Share it as `Arc<DiscoveryRegistry>`.
#[derive(Debug)]
pub struct DiscoveryRegistry {
    apps: DashMap<AppKey, Arc<App>>,
    ttl: Duration,
}

impl DiscoveryRegistry {
    /// A zero `ttl` disables expiry. Liveness is judged in whole seconds, so
    /// a fractional `ttl` is rounded up.
    pub fn new(ttl: Duration) -> Self {
        Self {
            apps: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The TTL in whole seconds, rounded up. Zero only for a zero TTL.
    pub fn ttl_secs(&self) -> u64 {
        let secs = self.ttl.as_secs();
        if self.ttl.subsec_nanos() > 0 {
            secs.saturating_add(1)
        } else {
            secs
        }
    }

    /// Register or refresh `item` as of now.
    pub fn register(&self, item: ServerItem) -> Arc<App> {
        self.register_at(item, unix_now())
    }

    /// Register or refresh `item` as of `now`.
    ///
    /// The App for the item's key is created on first use; racing first
    /// registrations for one key all land in the same App.
    pub fn register_at(&self, mut item: ServerItem, now: u64) -> Arc<App> {
        item.registered_at = now;
        let app = self
            .apps
            .entry(app_key(&item.app_id, &item.env))
            .or_insert_with(|| Arc::new(App::new(item.app_id.clone(), item.env.clone())))
            .value()
            .clone();

        tracing::debug!(
            app_id = %item.app_id,
            env = %item.env,
            address = %item.address,
            registered_at = now,
            "server registered"
        );
        app.add_server(item);
        app
    }

    pub fn get_app(&self, app_id: &str, env: &str) -> Option<Arc<App>> {
        self.apps
            .get(&app_key(app_id, env))
            .map(|a| a.value().clone())
    }

    /// Every item under the key, live and stale.
    pub fn get_server(&self, app_id: &str, env: &str) -> Result<Vec<ServerItem>, RegistryError> {
        self.get_app(app_id, env)
            .map(|app| app.servers())
            .ok_or_else(|| RegistryError::AppNotFound {
                app_id: app_id.to_string(),
                env: env.to_string(),
            })
    }

    /// Addresses alive now, in registration order.
    pub fn alive_servers(&self, app_id: &str, env: &str) -> Result<Vec<String>, RegistryError> {
        self.alive_servers_at(app_id, env, unix_now())
    }

    pub fn alive_servers_at(
        &self,
        app_id: &str,
        env: &str,
        now: u64,
    ) -> Result<Vec<String>, RegistryError> {
        let ttl = self.ttl_secs();
        Ok(self
            .get_server(app_id, env)?
            .into_iter()
            .filter(|i| i.is_alive(ttl, now))
            .map(|i| i.address)
            .collect())
    }

    /// Remove every item stale at `now`. Apps stay, even when emptied.
    pub fn sweep_at(&self, now: u64) -> usize {
        let ttl = self.ttl_secs();
        if ttl == 0 {
            return 0;
        }
        self.apps
            .iter()
            .map(|app| app.value().remove_stale(ttl, now))
            .sum()
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(unix_now())
    }

    /// All apps, sorted by key.
    pub fn apps(&self) -> Vec<Arc<App>> {
        let mut apps: Vec<(AppKey, Arc<App>)> = self
            .apps
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        apps.sort_by(|a, b| a.0.cmp(&b.0));
        apps.into_iter().map(|(_, app)| app).collect()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}
