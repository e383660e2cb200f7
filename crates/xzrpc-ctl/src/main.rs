//! xzrpc-ctl — command-line client for the xzrpc discovery registry.

use anyhow::{Context, Result};
use serde::Deserialize;

use xzrpc_core::wire::{DEFAULT_REGISTRY_PATH, SERVERS_HEADER, SERVER_HEADER};

const URL_ENV: &str = "XZRPC_REGISTRY_URL";

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AppsResponse {
    ttl_secs: u64,
    now:      u64,
    apps:     Vec<AppInfo>,
}

#[derive(Deserialize)]
struct AppInfo {
    app_id:  String,
    env:     String,
    servers: Vec<ServerInfo>,
}

#[derive(Deserialize)]
struct ServerInfo {
    address:       String,
    hostname:      String,
    registered_at: u64,
    alive:         bool,
}

// ── HTTP helpers ──────────────────────────────────────────────────────────────

fn default_url() -> String {
    std::env::var(URL_ENV)
        .unwrap_or_else(|_| format!("http://127.0.0.1:9998{}", DEFAULT_REGISTRY_PATH))
}

async fn get_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    reqwest::get(url)
    .await
    .with_context(|| format!("failed to reach registry at {}, is xzrpcd running?", url))?
    .error_for_status()
    .context("registry returned an error")?
    .json::<T>()
    .await
    .context("failed to parse response")
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

async fn cmd_servers(url: &str) -> Result<()> {
    let resp = reqwest::get(url)
    .await
    .with_context(|| format!("failed to reach registry at {}, is xzrpcd running?", url))?;

    if !resp.status().is_success() {
        println!("No servers registered yet ({}).", resp.status());
        return Ok(());
    }

    let servers = resp
    .headers()
    .get(SERVERS_HEADER)
    .and_then(|v| v.to_str().ok())
    .unwrap_or_default();

    if servers.is_empty() {
        println!("No alive servers.");
        return Ok(());
    }
    for addr in servers.split(',') {
        println!("{}", addr);
    }
    Ok(())
}

async fn cmd_register(url: &str, addr: &str) -> Result<()> {
    let resp = reqwest::Client::new()
    .post(url)
    .header(SERVER_HEADER, addr)
    .send()
    .await
    .with_context(|| format!("failed to reach registry at {}, is xzrpcd running?", url))?;

    anyhow::ensure!(resp.status().is_success(), "registration failed: {}", resp.status());
    println!("Registered {}.", addr);
    Ok(())
}

async fn cmd_apps(url: &str) -> Result<()> {
    let resp: AppsResponse = get_json(&format!("{}/apps", url.trim_end_matches('/'))).await?;

    if resp.apps.is_empty() {
        println!("No apps registered yet.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Registry (ttl {}s)", resp.ttl_secs);
    println!("═══════════════════════════════════════");

    for app in &resp.apps {
        println!("  ┌─ {}-{} ({} servers)", app.app_id, app.env, app.servers.len());
        for s in &app.servers {
            let state = if s.alive { "alive" } else { "stale" };
            println!(
                "  │  {:<22} {:<6} {}  seen {}s ago",
                s.address,
                state,
                s.hostname,
                resp.now.saturating_sub(s.registered_at)
            );
        }
        println!("  └─");
    }

    Ok(())
}

fn print_usage() {
    println!("Usage: xzrpc-ctl [--url <registry url>] <command>");
    println!();
    println!("Commands:");
    println!("  servers           List alive server addresses");
    println!("  register <addr>   Register (or refresh) a server address");
    println!("  apps              Show every app and its servers");
    println!();
    println!("Options:");
    println!("  --url <url>   Registry URL (default: ${} or http://127.0.0.1:9998{})", URL_ENV, DEFAULT_REGISTRY_PATH);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --url option
    let mut url = default_url();
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--url" {
            i += 1;
            url = args.get(i)
            .context("--url requires a value")?
            .clone();
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["servers"] | []                   => cmd_servers(&url).await,
        ["register", addr]                 => cmd_register(&url, addr).await,
        ["apps"]                           => cmd_apps(&url).await,
        ["help"] | ["--help"] | ["-h"]     => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
