//! RPC messages and the shared response pool.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::wire::{Action, Compressor};

/// The RPC header carried in every frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// "Service.Method" on requests; echoed on replies.
    pub service_method: String,

    /// Chosen by the caller. Replies carry the request's value so callers can
    /// match them up; replies are not sent in request order.
    pub seq: u64,

    /// Empty on success.
    #[serde(default)]
    pub error: String,
}

impl Header {
    pub fn new(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    pub fn set_error(&mut self, error: impl ToString) {
        self.error = error.to_string();
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// One request or response.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub header: Header,
    /// Encoded with `codec`; typed only once the target method is known.
    pub body: Bytes,
    pub action: Action,
    pub codec: Codec,
    pub compressor: Compressor,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a call message.
    pub fn call(header: Header, codec: Codec, body: impl Into<Bytes>) -> Self {
        Self {
            header,
            body: body.into(),
            action: Action::Call,
            codec,
            compressor: Compressor::None,
        }
    }

    /// Clear every field so nothing from the previous use survives.
    pub fn reset(&mut self) {
        self.header = Header::default();
        self.body = Bytes::new();
        self.action = Action::default();
        self.codec = Codec::default();
        self.compressor = Compressor::default();
    }
}

// ── Pool ─────────────────────────────────────────────────────────────────────

/// Idle messages kept by default. Extra returns are dropped.
const DEFAULT_MAX_IDLE: usize = 1024;

/// Shared pool of response messages.
///
/// Cheap to clone; all clones share one free list. `get` hands out a guard
/// that resets the message and puts it back when dropped, so a message is
/// returned exactly once whatever path the holder takes.
#[derive(Clone)]
pub struct MessagePool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    free: Mutex<Vec<Message>>,
    max_idle: usize,
    taken: AtomicU64,
    returned: AtomicU64,
}

impl Default for MessagePool {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagePool {
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                max_idle,
                taken: AtomicU64::new(0),
                returned: AtomicU64::new(0),
            }),
        }
    }

    /// Take a message, reusing an idle one when available.
    pub fn get(&self) -> PooledMessage {
        let msg = self.inner.free.lock().pop().unwrap_or_default();
        self.inner.taken.fetch_add(1, Ordering::Relaxed);
        PooledMessage {
            msg,
            pool: self.clone(),
        }
    }

    fn put(&self, mut msg: Message) {
        msg.reset();
        self.inner.returned.fetch_add(1, Ordering::Relaxed);
        let mut free = self.inner.free.lock();
        if free.len() < self.inner.max_idle {
            free.push(msg);
        }
    }

    /// Messages handed out since creation.
    pub fn taken(&self) -> u64 {
        self.inner.taken.load(Ordering::Relaxed)
    }

    /// Messages given back since creation.
    pub fn returned(&self) -> u64 {
        self.inner.returned.load(Ordering::Relaxed)
    }

    /// Messages currently held by callers.
    pub fn outstanding(&self) -> u64 {
        self.taken().saturating_sub(self.returned())
    }

    /// Messages sitting in the free list.
    pub fn idle(&self) -> usize {
        self.inner.free.lock().len()
    }
}

/// A message on loan from a `MessagePool`.
pub struct PooledMessage {
    msg: Message,
    pool: MessagePool,
}

impl Deref for PooledMessage {
    type Target = Message;

    fn deref(&self) -> &Message {
        &self.msg
    }
}

impl DerefMut for PooledMessage {
    fn deref_mut(&mut self) -> &mut Message {
        &mut self.msg
    }
}

impl Drop for PooledMessage {
    fn drop(&mut self) {
        let msg = std::mem::take(&mut self.msg);
        self.pool.put(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_every_field() {
        let mut msg = Message::call(Header::new("Arith.Add", 9), Codec::Bincode, vec![1, 2, 3]);
        msg.header.set_error("boom");
        msg.action = Action::Reply;

        msg.reset();
        assert_eq!(msg.header, Header::default());
        assert!(msg.body.is_empty());
        assert_eq!(msg.action, Action::Call);
        assert_eq!(msg.codec, Codec::Json);
        assert_eq!(msg.compressor, Compressor::None);
    }

    #[test]
    fn guard_returns_message_on_drop() {
        let pool = MessagePool::new();
        {
            let mut msg = pool.get();
            msg.header = Header::new("Arith.Add", 1);
            msg.body = Bytes::from_static(b"{\"a\":1}");
            assert_eq!(pool.outstanding(), 1);
        }
        assert_eq!(pool.taken(), 1);
        assert_eq!(pool.returned(), 1);
        assert_eq!(pool.idle(), 1);

        // The reused message must come back clean.
        let msg = pool.get();
        assert_eq!(msg.header, Header::default());
        assert!(msg.body.is_empty());
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn guard_returns_message_on_unwind() {
        let pool = MessagePool::new();
        let cloned = pool.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _msg = cloned.get();
            panic!("holder failed");
        }));
        assert!(result.is_err());
        assert_eq!(pool.taken(), 1);
        assert_eq!(pool.returned(), 1);
    }

    #[test]
    fn idle_list_is_capped() {
        let pool = MessagePool::with_max_idle(2);
        let held: Vec<_> = (0..5).map(|_| pool.get()).collect();
        drop(held);
        assert_eq!(pool.returned(), 5);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn header_error_helpers() {
        let mut header = Header::new("Arith.Divide", 3);
        assert!(!header.is_error());
        header.set_error("divide by zero");
        assert!(header.is_error());
        assert_eq!(header.error, "divide by zero");
    }
}
