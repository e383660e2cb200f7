//! Body and header codecs.
//!
//! The codec is chosen by the caller per frame and echoed back on the
//! response, so a server answers every request in the codec it was asked in.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::wire::WireError;

/// Serialization format for the RPC header and body of one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Codec {
    /// serde_json. Self-describing, the default.
    #[default]
    Json = 0x01,

    /// bincode (standard config). Compact, not self-describing.
    Bincode = 0x02,
}

impl Codec {
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::Json => Ok(serde_json::to_vec(value)?),
            Codec::Bincode => Ok(bincode::serde::encode_to_vec(
                value,
                bincode::config::standard(),
            )?),
        }
    }

    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            Codec::Json => Ok(serde_json::from_slice(bytes)?),
            Codec::Bincode => {
                let (value, _) =
                    bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
                Ok(value)
            }
        }
    }
}

impl TryFrom<u8> for Codec {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Codec::Json),
            0x02 => Ok(Codec::Bincode),
            other => Err(WireError::UnknownCodec(other)),
        }
    }
}

impl From<Codec> for u8 {
    fn from(c: Codec) -> u8 {
        c as u8
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bincode encode: {0}")]
    BincodeEncode(#[from] bincode::error::EncodeError),

    #[error("bincode decode: {0}")]
    BincodeDecode(#[from] bincode::error::DecodeError),
}
