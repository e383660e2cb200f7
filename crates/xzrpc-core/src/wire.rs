//! xzrpc wire format — the fixed header in front of every frame.
//!
//! A frame is a 16-byte `FrameHeader`, then the RPC `Header` encoded with the
//! frame's codec (`header_len` bytes), then the body (`body_len` bytes).
//! Multi-byte integers are little-endian. Changing anything here is a
//! protocol break; bump `FRAME_VERSION` if you must.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::codec::{Codec, CodecError};

// ── Frame Header ─────────────────────────────────────────────────────────────

/// Fixed prefix of every frame.
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct FrameHeader {
    /// Always `FRAME_MAGIC`. Anything else means the peer is not speaking
    /// xzrpc, or the stream lost sync.
    pub magic: U16<LittleEndian>,

    /// Frame format version. Currently 0x01.
    pub version: u8,

    /// See `Action`.
    pub action: u8,

    /// See `Codec`. Applies to both the RPC header and the body.
    pub codec: u8,

    /// See `Compressor`. Applies to the body only.
    pub compressor: u8,

    /// Reserved, must be zero.
    pub flags: u8,

    /// Reserved, must be zero.
    pub reserved: u8,

    /// Length of the encoded RPC header.
    pub header_len: U32<LittleEndian>,

    /// Length of the body.
    pub body_len: U32<LittleEndian>,
}

assert_eq_size!(FrameHeader, [u8; 16]);

/// Size of `FrameHeader` on the wire.
pub const FRAME_HEADER_LEN: usize = std::mem::size_of::<FrameHeader>();

impl FrameHeader {
    pub fn new(
        action: Action,
        codec: Codec,
        compressor: Compressor,
        header_len: u32,
        body_len: u32,
    ) -> Self {
        Self {
            magic: U16::new(FRAME_MAGIC),
            version: FRAME_VERSION,
            action: action.into(),
            codec: codec.into(),
            compressor: compressor.into(),
            flags: 0,
            reserved: 0,
            header_len: U32::new(header_len),
            body_len: U32::new(body_len),
        }
    }

    /// Check the fixed fields and the declared lengths.
    pub fn validate(&self) -> Result<(), WireError> {
        let magic = self.magic.get();
        if magic != FRAME_MAGIC {
            return Err(WireError::BadMagic(magic));
        }
        if self.version != FRAME_VERSION {
            return Err(WireError::UnknownVersion(self.version));
        }
        if self.flags != 0 {
            return Err(WireError::ReservedFlagsSet(self.flags));
        }
        let header_len = self.header_len.get() as usize;
        if header_len > MAX_HEADER_LEN {
            return Err(WireError::HeaderTooLarge(header_len));
        }
        let body_len = self.body_len.get() as usize;
        if body_len > MAX_BODY_LEN {
            return Err(WireError::BodyTooLarge(body_len));
        }
        Ok(())
    }
}

// ── Action ───────────────────────────────────────────────────────────────────

/// What the frame asks the receiver to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Action {
    /// Invoke `Header::service_method`.
    #[default]
    Call = 0x01,

    /// Answer to a `Call`.
    Reply = 0x02,

    /// Liveness probe. Carries no service method.
    Ping = 0x03,
}

impl TryFrom<u8> for Action {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Action::Call),
            0x02 => Ok(Action::Reply),
            0x03 => Ok(Action::Ping),
            other => Err(WireError::UnknownAction(other)),
        }
    }
}

impl From<Action> for u8 {
    fn from(a: Action) -> u8 {
        a as u8
    }
}

// ── Compressor ───────────────────────────────────────────────────────────────

/// Body compression. Only the identity transform is defined so far; the
/// byte is carried so responses can echo whatever the request declared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Compressor {
    #[default]
    None = 0x00,
}

impl TryFrom<u8> for Compressor {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Compressor::None),
            other => Err(WireError::UnknownCompressor(other)),
        }
    }
}

impl From<Compressor> for u8 {
    fn from(c: Compressor) -> u8 {
        c as u8
    }
}

// ── Constants ────────────────────────────────────────────────────────────────

/// "xz" read as a little-endian u16.
pub const FRAME_MAGIC: u16 = 0x7a78;

/// Current frame format version.
pub const FRAME_VERSION: u8 = 0x01;

/// Largest encoded RPC header accepted.
pub const MAX_HEADER_LEN: usize = 64 * 1024;

/// Largest body accepted.
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

/// Default URL path of the discovery registry.
pub const DEFAULT_REGISTRY_PATH: &str = "/_xzrpc_/registry";

/// Request header carrying the address being registered.
pub const SERVER_HEADER: &str = "X-Xzrpc-Server";

/// Response header carrying the comma-joined alive addresses.
pub const SERVERS_HEADER: &str = "X-Xzrpc-Servers";

/// Status text written after a successful HTTP CONNECT.
pub const CONNECTED: &str = "200 Connected";

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors raised while reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("bad frame magic: 0x{0:04x}")]
    BadMagic(u16),

    #[error("unknown frame version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("unknown action byte: 0x{0:02x}")]
    UnknownAction(u8),

    #[error("unknown codec byte: 0x{0:02x}")]
    UnknownCodec(u8),

    #[error("unknown compressor byte: 0x{0:02x}")]
    UnknownCompressor(u8),

    #[error("reserved flags are non-zero: 0x{0:02x}")]
    ReservedFlagsSet(u8),

    #[error("rpc header length {0} exceeds maximum {}", MAX_HEADER_LEN)]
    HeaderTooLarge(usize),

    #[error("body length {0} exceeds maximum {}", MAX_BODY_LEN)]
    BodyTooLarge(usize),

    #[error("failed to encode or decode rpc header: {0}")]
    Header(#[from] CodecError),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

// ── Tests ────────────────────────────────────────────────────────────────────
