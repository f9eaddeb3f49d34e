//! Pluggable serialisation.
//!
//! A [`Codec`] turns application values into payload bytes and back, and
//! also decides how a whole [`Envelope`](crate::Envelope) is laid out on the
//! wire. Two formats are supported:
//!
//! - [`Codec::MsgPack`]: compact binary, the default
//! - [`Codec::Json`]: textual, handy when inspecting traffic
//!
//! The codec is chosen when a connection is built and stays fixed for its
//! lifetime. Every envelope remembers the codec it was built or decoded
//! with, so payload helpers never need it passed in again.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Result, RpcError};

/// First byte of every JSON-encoded envelope (`{`).
const JSON_OBJECT_START: u8 = 0x7b;

/// Serialisation format for envelopes and their payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Codec {
    /// MessagePack, field names kept (`f`, `s`, ...).
    #[default]
    MsgPack,

    /// JSON with the payload embedded as a raw JSON value.
    Json,
}

impl Codec {
    /// Short lowercase name, suitable for logs and content-type style tags.
    pub fn name(self) -> &'static str {
        match self {
            Codec::MsgPack => "msgpack",
            Codec::Json => "json",
        }
    }

    /// Guess the codec of an encoded envelope from its first byte.
    ///
    /// JSON envelopes are always objects, so a leading `{` means JSON and
    /// anything else is treated as MessagePack. Returns `None` for an empty
    /// buffer.
    pub fn sniff(buf: &[u8]) -> Option<Codec> {
        // ---
        match buf.first() {
            None => None,
            Some(&JSON_OBJECT_START) => Some(Codec::Json),
            Some(_) => Some(Codec::MsgPack),
        }
    }

    /// Serialise an application value.
    pub fn encode<T>(self, value: &T) -> Result<Vec<u8>>
    where
        T: Serialize + ?Sized,
    {
        // ---
        match self {
            Codec::MsgPack => Ok(rmp_serde::to_vec_named(value)?),
            Codec::Json => serde_json::to_vec(value).map_err(|e| RpcError::Encode(e.to_string())),
        }
    }

    /// Deserialise an application value.
    pub fn decode<T>(self, bytes: &[u8]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        // ---
        match self {
            Codec::MsgPack => Ok(rmp_serde::from_slice(bytes)?),
            Codec::Json => {
                serde_json::from_slice(bytes).map_err(|e| RpcError::Decode(e.to_string()))
            }
        }
    }

    /// Re-encode bytes produced by `self` into `target`'s format.
    ///
    /// Goes through a self-describing intermediate value, so it works for
    /// any payload without knowing its Rust type.
    pub fn transcode(self, bytes: &[u8], target: Codec) -> Result<Vec<u8>> {
        // ---
        if self == target || bytes.is_empty() {
            return Ok(bytes.to_vec());
        }
        let value: serde_json::Value = self.decode(bytes)?;
        target.encode(&value)
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
