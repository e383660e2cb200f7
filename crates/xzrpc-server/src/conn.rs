//! Connection handler.
//!
//! One reading task per connection decodes requests in order. Each request
//! that resolves runs on its own task and writes its response under the
//! connection's write lock as soon as it finishes, so responses leave in
//! completion order, not request order. Callers match them by `seq`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use xzrpc_core::config::Backpressure;
use xzrpc_core::{Action, Frame, FrameReader, FrameWriter, Header, Message, MessagePool, WireError};
use xzrpc_services::{clip_name, Invocation, MethodType, Service, ServiceError};

use crate::server::Server;

type SharedWriter<W> = Arc<Mutex<FrameWriter<W>>>;

/// Sent in place of a response that doesn't fit in a frame.
const RESPONSE_TOO_LARGE: &str = "response too large";

/// A decoded request, ready to dispatch.
struct Request {
    msg: Message,
    service: Arc<Service>,
    mtype: Arc<MethodType>,
    invocation: Invocation,
}

/// What one read produced.
enum Incoming {
    /// Resolved, with its arguments decoded.
    Request(Request),
    /// A whole frame that can't be dispatched. Answered with `error`.
    Invalid { msg: Message, error: String },
    /// A liveness probe.
    Ping(Message),
}

impl Server {
    /// Serve one connection until the peer closes it or sends something
    /// unreadable, then wait for every in-flight request to respond.
    pub async fn serve_conn<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (rd, wr) = tokio::io::split(stream);
        let mut reader = FrameReader::new(rd);
        let writer: SharedWriter<_> = Arc::new(Mutex::new(FrameWriter::new(wr)));

        let limit = self.config.max_inflight_per_conn;
        let slots = (limit > 0).then(|| Arc::new(Semaphore::new(limit)));
        let timeout = self.request_timeout();
        let mut inflight = JoinSet::new();

        loop {
            let req = match self.read_request(&mut reader).await {
                None => break,
                Some(Incoming::Request(req)) => req,
                Some(Incoming::Invalid { mut msg, error }) => {
                    tracing::debug!(seq = msg.header.seq, error = %error, "rejecting request");
                    msg.header.set_error(error);
                    send_resp(&self.pool, &writer, &msg, Bytes::new()).await;
                    continue;
                }
                Some(Incoming::Ping(msg)) => {
                    send_resp(&self.pool, &writer, &msg, Bytes::new()).await;
                    continue;
                }
            };

            let permit = match &slots {
                None => None,
                Some(slots) => match self.acquire_slot(slots, limit).await {
                    Slot::Acquired(permit) => Some(permit),
                    Slot::Busy(error) => {
                        let mut msg = req.msg;
                        tracing::debug!(seq = msg.header.seq, limit, "connection busy");
                        msg.header.set_error(error);
                        send_resp(&self.pool, &writer, &msg, Bytes::new()).await;
                        continue;
                    }
                    Slot::Closed => break,
                },
            };

            while let Some(done) = inflight.try_join_next() {
                log_join(done);
            }

            let pool = self.pool.clone();
            let writer = writer.clone();
            inflight.spawn(async move {
                let _permit = permit;
                handle_request(req, &pool, &writer, timeout).await;
            });
        }

        let draining = inflight.len();
        if draining > 0 {
            tracing::debug!(draining, "waiting for in-flight requests");
        }
        while let Some(done) = inflight.join_next().await {
            log_join(done);
        }
    }

    /// Read one frame and resolve it.
    ///
    /// `None` means the connection is finished: clean close, I/O failure or a
    /// frame that can't be parsed, after which the stream can't be trusted.
    async fn read_request<R>(&self, reader: &mut FrameReader<R>) -> Option<Incoming>
    where
        R: AsyncRead + Unpin,
    {
        let mut msg = Message::new();
        let frame = reader
            .unpack(&mut msg, |header| {
                self.directory.find_service(&header.service_method)
            })
            .await;

        let resolved = match frame {
            Ok(Frame::Read(resolved)) => resolved,
            Ok(Frame::Closed) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read request");
                return None;
            }
        };

        if msg.action == Action::Ping {
            return Some(Incoming::Ping(msg));
        }

        let (service, mtype) = match resolved {
            Ok(found) => found,
            Err(e) => {
                return Some(Incoming::Invalid {
                    msg,
                    error: e.to_string(),
                })
            }
        };

        match mtype.new_invocation(msg.codec, &msg.body) {
            Ok(invocation) => Some(Incoming::Request(Request {
                msg,
                service,
                mtype,
                invocation,
            })),
            Err(e) => Some(Incoming::Invalid {
                error: format!(
                    "failed to decode arguments of {}: {e}",
                    clip_name(&msg.header.service_method)
                ),
                msg,
            }),
        }
    }

    async fn acquire_slot(&self, slots: &Arc<Semaphore>, limit: usize) -> Slot {
        match self.config.backpressure {
            Backpressure::Queue => match slots.clone().acquire_owned().await {
                Ok(permit) => Slot::Acquired(permit),
                Err(_) => Slot::Closed,
            },
            Backpressure::Reject => match slots.clone().try_acquire_owned() {
                Ok(permit) => Slot::Acquired(permit),
                Err(_) => Slot::Busy(format!("server busy: {limit} requests in flight")),
            },
        }
    }
}

enum Slot {
    Acquired(OwnedSemaphorePermit),
    Busy(String),
    Closed,
}

/// Run one request and send its response.
async fn handle_request<W>(
    req: Request,
    pool: &MessagePool,
    writer: &SharedWriter<W>,
    timeout: Option<Duration>,
) where
    W: AsyncWrite + Unpin,
{
    let Request {
        mut msg,
        service,
        mtype,
        invocation,
    } = req;

    tracing::trace!(seq = msg.header.seq, service_method = %msg.header.service_method, "dispatching");

    let call = service.call(&mtype, invocation);
    let outcome = match timeout {
        None => call.await,
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ServiceError::new(format!(
                "request timed out after {}ms",
                limit.as_millis()
            ))),
        },
    };

    let body = match outcome {
        Ok(body) => body,
        Err(e) => {
            msg.header.set_error(e.message());
            Bytes::new()
        }
    };
    send_resp(pool, writer, &msg, body).await;
}

/// Write the response to `req` as one frame.
///
/// A response too large to frame is replaced by an empty-bodied error reply
/// with the same `seq`, so every request is answered. The pooled message goes
/// back to the pool when the guard drops, whether or not the write succeeded.
/// Write failures are logged; the reading side will notice a dead connection
/// on its own.
async fn send_resp<W>(pool: &MessagePool, writer: &SharedWriter<W>, req: &Message, body: Bytes)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = writer.lock().await;

    let mut resp = pool.get();
    resp.header = req.header.clone();
    resp.action = req.action;
    resp.codec = req.codec;
    resp.compressor = req.compressor;
    resp.body = body;

    match writer.pack(&resp).await {
        Ok(()) => {}
        Err(e @ (WireError::HeaderTooLarge(_) | WireError::BodyTooLarge(_))) => {
            tracing::warn!(seq = resp.header.seq, error = %e, "response too large to send");
            resp.header = Header::new(clip_name(&req.header.service_method), req.header.seq);
            resp.header.set_error(RESPONSE_TOO_LARGE);
            resp.body = Bytes::new();
            if let Err(e) = writer.pack(&resp).await {
                tracing::warn!(seq = resp.header.seq, error = %e, "failed to write response");
            }
        }
        Err(e) => {
            tracing::warn!(seq = resp.header.seq, error = %e, "failed to write response");
        }
    }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "request task failed");
    }
}
