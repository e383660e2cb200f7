//! xzrpc-core — wire format, messages, framing and configuration.
//! Every other xzrpc crate depends on this one.

pub mod codec;
pub mod config;
pub mod message;
pub mod protocol;
pub mod wire;

pub use codec::{Codec, CodecError};
pub use message::{Header, Message, MessagePool, PooledMessage};
pub use protocol::{Frame, FrameReader, FrameWriter};
pub use wire::{Action, Compressor, WireError};
