//! xzrpc integration test harness.
//!
//! Every test starts its own RPC server and/or registry in-process on an
//! ephemeral loopback port and talks to it over real sockets:
//!
//!   cargo test --test integration
//!
//! Each test shuts down what it starts when its harness is dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use xzrpc_api::ApiState;
use xzrpc_core::config::{RegistryConfig, ServerConfig, Transport};
use xzrpc_core::wire::{CONNECTED, DEFAULT_REGISTRY_PATH};
use xzrpc_core::{Codec, Frame, FrameReader, FrameWriter, Header, Message};
use xzrpc_server::{bind_listener, Server};
use xzrpc_services::{Arith, DiscoveryRegistry, ServiceDirectory};

mod registry;
mod rpc;

// ── Harness ───────────────────────────────────────────────────────────────────

/// A running RPC server. Stops accepting when dropped.
pub struct RpcHarness {
    pub addr: SocketAddr,
    pub server: Arc<Server>,
    shutdown: broadcast::Sender<()>,
}

impl Drop for RpcHarness {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

/// Start an RPC server with `Arith` registered.
pub async fn start_rpc(config: ServerConfig, transport: Transport) -> Result<RpcHarness> {
    let directory = ServiceDirectory::new();
    directory.register(Arith)?;
    let server = Arc::new(Server::new(Arc::new(directory), config));

    let listener = bind_listener("127.0.0.1:0".parse()?)?;
    let addr = listener.local_addr()?;
    let (shutdown, rx) = broadcast::channel(1);
    tokio::spawn(server.clone().accept(listener, transport, rx));

    Ok(RpcHarness {
        addr,
        server,
        shutdown,
    })
}

/// A running registry. Stops serving when dropped.
pub struct RegistryHarness {
    pub url: String,
    pub registry: Arc<DiscoveryRegistry>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for RegistryHarness {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub async fn start_registry(ttl: Duration) -> Result<RegistryHarness> {
    let registry = Arc::new(DiscoveryRegistry::new(ttl));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let state = ApiState::new(registry.clone(), &RegistryConfig::default());
    let task = tokio::spawn(async move {
        if let Err(e) = xzrpc_api::serve(listener, state, DEFAULT_REGISTRY_PATH).await {
            eprintln!("registry server failed: {e:#}");
        }
    });

    Ok(RegistryHarness {
        url: format!("http://{addr}{DEFAULT_REGISTRY_PATH}"),
        registry,
        task,
    })
}

/// Minimal framed client for driving the server.
pub struct Client {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        Ok(Self::from_stream(stream))
    }

    /// Connect through the HTTP CONNECT handshake.
    pub async fn connect_http(addr: SocketAddr) -> Result<Self> {
        let mut stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        stream
            .write_all(format!("CONNECT {DEFAULT_REGISTRY_PATH} HTTP/1.0\r\n\r\n").as_bytes())
            .await?;

        let expected = format!("HTTP/1.0 {CONNECTED}\n\n");
        let mut status = vec![0u8; expected.len()];
        stream.read_exact(&mut status).await?;
        if status != expected.as_bytes() {
            bail!("unexpected CONNECT response: {:?}", String::from_utf8_lossy(&status));
        }
        Ok(Self::from_stream(stream))
    }

    fn from_stream(stream: TcpStream) -> Self {
        let (rd, wr) = stream.into_split();
        Self {
            reader: FrameReader::new(rd),
            writer: FrameWriter::new(wr),
        }
    }

    pub async fn send<A: Serialize>(&mut self, method: &str, seq: u64, args: &A) -> Result<()> {
        let body = Codec::Json.encode(args)?;
        self.writer
            .pack(&Message::call(Header::new(method, seq), Codec::Json, body))
            .await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Message> {
        let mut msg = Message::new();
        match self.reader.unpack(&mut msg, |_| ()).await? {
            Frame::Read(()) => Ok(msg),
            Frame::Closed => bail!("server closed the connection"),
        }
    }
}

/// Poll `cond` every 10ms for up to `timeout`.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
