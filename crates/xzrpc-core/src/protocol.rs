//! Framed reader and writer — the pack/unpack boundary of a connection.
//!
//! The two halves are independent so one task can keep reading requests
//! while others write responses.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zerocopy::{AsBytes, FromZeroes};

use crate::codec::Codec;
use crate::message::{Header, Message};
use crate::wire::{Action, Compressor, FrameHeader, WireError, MAX_BODY_LEN, MAX_HEADER_LEN};

/// Outcome of reading one frame.
#[derive(Debug)]
pub enum Frame<T> {
    /// The peer closed the stream on a frame boundary.
    Closed,

    /// A whole frame was read into the message. Carries whatever the header
    /// callback returned; the stream is in sync either way.
    Read(T),
}

/// Reads frames from the receive half of a connection.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Decode one frame into `msg`.
    ///
    /// `on_header` runs once the RPC header is decoded and before the body is
    /// read, so the caller can pick the body's target type. Whatever it
    /// returns, the body is consumed, keeping the stream aligned for the next
    /// frame.
    pub async fn unpack<T, F>(
        &mut self,
        msg: &mut Message,
        on_header: F,
    ) -> Result<Frame<T>, WireError>
    where
        F: FnOnce(&Header) -> T,
    {
        let mut frame = FrameHeader::new_zeroed();
        let head = frame.as_bytes_mut();
        let first = self.inner.read(head).await?;
        if first == 0 {
            return Ok(Frame::Closed);
        }
        self.inner.read_exact(&mut head[first..]).await?;
        frame.validate()?;

        let codec = Codec::try_from(frame.codec)?;
        msg.action = Action::try_from(frame.action)?;
        msg.codec = codec;
        msg.compressor = Compressor::try_from(frame.compressor)?;

        let header_len = frame.header_len.get() as usize;
        let mut header_buf = vec![0u8; header_len];
        self.inner.read_exact(&mut header_buf).await?;
        msg.header = codec.decode(&header_buf)?;

        let verdict = on_header(&msg.header);

        let body_len = frame.body_len.get() as usize;
        let mut body = vec![0u8; body_len];
        self.inner.read_exact(&mut body).await?;
        msg.body = Bytes::from(body);

        tracing::trace!(
            seq = msg.header.seq,
            service_method = %msg.header.service_method,
            header_len,
            body_len,
            "frame read"
        );

        Ok(Frame::Read(verdict))
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes frames to the send half of a connection.
///
/// Each `pack` issues a single write of the whole frame. Callers sharing a
/// writer must hold a lock across `pack` to keep frames from interleaving.
pub struct FrameWriter<W> {
    inner: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Serialize `msg` and write it as one frame.
    pub async fn pack(&mut self, msg: &Message) -> Result<(), WireError> {
        let header = msg.codec.encode(&msg.header)?;
        if header.len() > MAX_HEADER_LEN {
            return Err(WireError::HeaderTooLarge(header.len()));
        }
        if msg.body.len() > MAX_BODY_LEN {
            return Err(WireError::BodyTooLarge(msg.body.len()));
        }

        let frame = FrameHeader::new(
            msg.action,
            msg.codec,
            msg.compressor,
            header.len() as u32,
            msg.body.len() as u32,
        );

        self.buf.clear();
        self.buf.extend_from_slice(frame.as_bytes());
        self.buf.extend_from_slice(&header);
        self.buf.extend_from_slice(&msg.body);

        self.inner.write_all(&self.buf).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
