//! The RPC server and its accept loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use xzrpc_core::config::{ServerConfig, Transport};
use xzrpc_core::MessagePool;
use xzrpc_services::ServiceDirectory;

/// Listen backlog for the RPC socket.
const LISTEN_BACKLOG: i32 = 1024;

/// Dispatches requests from any number of connections to one directory.
pub struct Server {
    pub(crate) directory: Arc<ServiceDirectory>,
    pub(crate) pool: MessagePool,
    pub(crate) config: ServerConfig,
}

impl Server {
    pub fn new(directory: Arc<ServiceDirectory>, config: ServerConfig) -> Self {
        Self {
            directory,
            pool: MessagePool::new(),
            config,
        }
    }

    /// Use `pool` for response messages instead of a private one.
    pub fn with_pool(mut self, pool: MessagePool) -> Self {
        self.pool = pool;
        self
    }

    pub fn directory(&self) -> &Arc<ServiceDirectory> {
        &self.directory
    }

    pub fn pool(&self) -> &MessagePool {
        &self.pool
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub(crate) fn request_timeout(&self) -> Option<Duration> {
        match self.config.request_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Accept connections until `shutdown` fires, one task per connection.
    ///
    /// Accept errors are logged and the loop carries on.
    pub async fn accept(
        self: Arc<Self>,
        listener: TcpListener,
        transport: Transport,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        match listener.local_addr() {
            Ok(addr) => tracing::info!(addr = %addr, ?transport, "rpc listener starting"),
            Err(e) => tracing::info!(error = %e, ?transport, "rpc listener starting"),
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("rpc listener shutting down");
                    return;
                }

                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };

                    tracing::debug!(peer = %peer, "connection accepted");
                    let server = self.clone();
                    tokio::spawn(async move {
                        match transport {
                            Transport::Raw => server.serve_conn(stream).await,
                            Transport::Http => server.serve_http_conn(stream).await,
                        }
                        tracing::debug!(peer = %peer, "connection closed");
                    });
                }
            }
        }
    }
}

/// Bind a TCP listener with SO_REUSEADDR so restarts don't trip over
/// sockets in TIME_WAIT.
pub fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("bind({addr})"))?;
    socket.listen(LISTEN_BACKLOG).context("listen()")?;

    TcpListener::from_std(socket.into()).context("failed to convert to tokio TcpListener")
}

#[cfg(test)]
mod tests {
    use super::*;
    use xzrpc_core::{Codec, Frame, FrameReader, FrameWriter, Header, Message};
    use xzrpc_services::arith::ArithArgs;
    use xzrpc_services::Arith;

    #[tokio::test]
    async fn accept_serves_connections_until_shutdown() {
        let directory = ServiceDirectory::new();
        directory.register(Arith).unwrap();
        let server = Arc::new(Server::new(Arc::new(directory), ServerConfig::default()));

        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let acceptor = tokio::spawn(server.clone().accept(listener, Transport::Raw, shutdown_rx));

        for n in 0..3i64 {
            let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            let (rd, wr) = stream.into_split();
            let mut writer = FrameWriter::new(wr);
            let mut reader = FrameReader::new(rd);

            let body = Codec::Json.encode(&ArithArgs { a: n, b: n }).unwrap();
            writer
                .pack(&Message::call(Header::new("Arith.Add", n as u64), Codec::Json, body))
                .await
                .unwrap();

            let mut reply = Message::new();
            let frame = reader.unpack(&mut reply, |_| ()).await.unwrap();
            assert!(matches!(frame, Frame::Read(())));
            assert_eq!(Codec::Json.decode::<i64>(&reply.body).unwrap(), 2 * n);
        }

        shutdown_tx.send(()).unwrap();
        acceptor.await.unwrap();
    }

    #[test]
    fn zero_timeout_means_no_deadline() {
        let server = Server::new(Arc::new(ServiceDirectory::new()), ServerConfig::default());
        assert_eq!(server.request_timeout(), None);

        let config = ServerConfig {
            request_timeout_ms: 250,
            ..ServerConfig::default()
        };
        let server = Server::new(Arc::new(ServiceDirectory::new()), config);
        assert_eq!(server.request_timeout(), Some(Duration::from_millis(250)));
    }
}
