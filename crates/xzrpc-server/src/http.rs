//! RPC over an HTTP CONNECT handshake.
//!
//! The client sends `CONNECT <path> HTTP/1.x` and a blank line. The server
//! answers with a bare `HTTP/1.0 200 Connected` status line and from then on
//! the stream carries frames. Anything but CONNECT gets a 405 and the
//! connection is closed.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use xzrpc_core::wire::CONNECTED;

use crate::server::Server;

/// Longest request head accepted, request line and headers together.
const MAX_REQUEST_HEAD: u64 = 8 * 1024;

const NOT_ALLOWED_BODY: &str = "only support CONNECT method\n";

impl Server {
    /// Run the CONNECT handshake, then serve the connection as raw RPC.
    pub async fn serve_http_conn<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        // Frames the client pipelines behind the request head stay in the
        // buffer and are read by the connection handler.
        let mut stream = BufReader::new(stream);

        let method = match read_request_head(&mut stream).await {
            Ok(method) => method,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read http request head");
                return;
            }
        };

        if method != "CONNECT" {
            tracing::debug!(method = %method, "rejecting non-CONNECT request");
            if let Err(e) = write_not_allowed(&mut stream).await {
                tracing::debug!(error = %e, "failed to write 405");
            }
            return;
        }

        let status = format!("HTTP/1.0 {CONNECTED}\n\n");
        if let Err(e) = stream.write_all(status.as_bytes()).await {
            tracing::warn!(error = %e, "failed to write CONNECT response");
            return;
        }
        if let Err(e) = stream.flush().await {
            tracing::warn!(error = %e, "failed to write CONNECT response");
            return;
        }

        self.serve_conn(stream).await;
    }
}

/// Read the request line and headers. Returns the request method.
async fn read_request_head<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut limited = (&mut *reader).take(MAX_REQUEST_HEAD);
    let mut line = String::new();

    if limited.read_line(&mut line).await? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before request line",
        ));
    }
    let method = line
        .split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "empty request line"))?;

    loop {
        line.clear();
        if limited.read_line(&mut line).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "request head truncated or too large",
            ));
        }
        if line == "\r\n" || line == "\n" {
            return Ok(method);
        }
    }
}

async fn write_not_allowed<W>(writer: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.0 405 Method Not Allowed\r\n\
         Content-Type: text/plain;charset=utf-8\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {NOT_ALLOWED_BODY}",
        NOT_ALLOWED_BODY.len()
    );
    writer.write_all(response.as_bytes()).await?;
    writer.shutdown().await
}
