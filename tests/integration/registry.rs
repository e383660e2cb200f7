use xzrpc_core::wire::{SERVERS_HEADER, SERVER_HEADER};

use crate::*;

async fn register(url: &str, addr: &str) -> Result<reqwest::StatusCode> {
    let resp = reqwest::Client::new()
        .post(url)
        .header(SERVER_HEADER, addr)
        .send()
        .await?;
    Ok(resp.status())
}

async fn alive(url: &str) -> Result<(reqwest::StatusCode, Option<String>)> {
    let resp = reqwest::get(url).await?;
    let servers = resp
        .headers()
        .get(SERVERS_HEADER)
        .map(|v| v.to_str().map(str::to_string))
        .transpose()?;
    Ok((resp.status(), servers))
}

/// POST then GET returns the registered address.
#[tokio::test]
async fn test_register_then_discover() -> Result<()> {
    let reg = start_registry(Duration::from_secs(300)).await?;

    assert_eq!(register(&reg.url, "10.0.0.5:9000").await?, reqwest::StatusCode::OK);
    let (status, servers) = alive(&reg.url).await?;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(servers.as_deref(), Some("10.0.0.5:9000"));

    // Refreshing does not duplicate.
    register(&reg.url, "10.0.0.5:9000").await?;
    register(&reg.url, "10.0.0.6:9000").await?;
    let (_, servers) = alive(&reg.url).await?;
    assert_eq!(servers.as_deref(), Some("10.0.0.5:9000,10.0.0.6:9000"));
    Ok(())
}

/// GET before anything registered is a 500, not an empty success.
#[tokio::test]
async fn test_unknown_app_is_500() -> Result<()> {
    let reg = start_registry(Duration::from_secs(300)).await?;
    let (status, _) = alive(&reg.url).await?;
    assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    Ok(())
}

/// POST without the address header is a 500; other methods are 405.
#[tokio::test]
async fn test_bad_requests() -> Result<()> {
    let reg = start_registry(Duration::from_secs(300)).await?;
    let client = reqwest::Client::new();

    let resp = client.post(&reg.url).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

    let resp = client.put(&reg.url).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
    assert!(reg.registry.is_empty());
    Ok(())
}

/// After the TTL passes without a refresh the address drops out, while the
/// app itself still answers.
#[tokio::test]
async fn test_registration_expires() -> Result<()> {
    let reg = start_registry(Duration::from_secs(1)).await?;

    register(&reg.url, "10.0.0.5:9000").await?;
    let (_, servers) = alive(&reg.url).await?;
    assert_eq!(servers.as_deref(), Some("10.0.0.5:9000"));

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    let (status, servers) = alive(&reg.url).await?;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(servers.as_deref(), Some(""));

    // A sweep removes it from storage too, and GET still answers.
    assert_eq!(reg.registry.sweep(), 1);
    let (status, servers) = alive(&reg.url).await?;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(servers.as_deref(), Some(""));
    Ok(())
}

/// The JSON snapshot lists every registration.
#[tokio::test]
async fn test_apps_snapshot() -> Result<()> {
    let reg = start_registry(Duration::from_secs(300)).await?;
    register(&reg.url, "10.0.0.5:9000").await?;

    let json: serde_json::Value = reqwest::get(format!("{}/apps", reg.url))
        .await?
        .json()
        .await?;
    assert_eq!(json["ttl_secs"], 300);
    assert_eq!(json["apps"][0]["app_id"], "xzrpc");
    assert_eq!(json["apps"][0]["env"], "dev");
    assert_eq!(json["apps"][0]["servers"][0]["address"], "10.0.0.5:9000");
    assert_eq!(json["apps"][0]["servers"][0]["hostname"], "localhost");
    assert_eq!(json["apps"][0]["servers"][0]["alive"], true);
    Ok(())
}
