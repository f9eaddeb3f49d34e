// src/domain/envelope.rs

//! The unit of wire exchange.
//!
//! An [`Envelope`] carries a method name, a correlation sequence, a reply
//! flag, reply status fields, server-side timing and an opaque payload.
//! On the wire it is a map with single-letter keys:
//!
//! | key | field            | omitted when |
//! |-----|------------------|--------------|
//! | `f` | method           | never        |
//! | `s` | sequence         | never        |
//! | `r` | is_reply         | `false`      |
//! | `c` | status_code      | `0`          |
//! | `m` | status_message   | empty        |
//! | `t` | elapsed_millis   | `0`          |
//! | `d` | payload          | empty        |
//!
//! The payload is embedded inline as a plain value of the envelope's own
//! format: a raw JSON value with [`Codec::Json`], a MessagePack value with
//! [`Codec::MsgPack`].

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::status;
use crate::{Codec, Result, RpcError, Sequence};

/// A structured message exchanged over a connection.
///
/// # Example
///
/// ```
/// use framed_rpc::{Codec, Envelope};
///
/// let mut request = Envelope::request(Codec::Json, "hello", 7.into());
/// request.set_payload(&"world")?;
///
/// let bytes = request.encode()?;
/// let decoded = Envelope::decode(Codec::Json, &bytes)?;
/// assert_eq!(decoded.read_payload::<String>()?, "world");
/// # Ok::<(), framed_rpc::RpcError>(())
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    // ---
    /// Remote procedure name; echoed back on replies.
    pub method: String,

    /// Correlation identifier assigned by the calling side.
    pub sequence: Sequence,

    /// `true` for replies, `false` for requests needing dispatch.
    pub is_reply: bool,

    /// Reply status, see [`status`](crate::status).
    pub status_code: u8,

    /// Human-readable error text paired with a non-zero status.
    pub status_message: String,

    /// Handler execution time measured by the replying side.
    pub elapsed_millis: u32,

    /// Payload bytes in this envelope's codec; empty means absent.
    pub payload: Bytes,

    codec: Codec,
}

impl Envelope {
    // ---
    /// Create an empty envelope bound to `codec`.
    pub fn new(codec: Codec) -> Self {
        Self {
            method: String::new(),
            sequence: Sequence::new(0),
            is_reply: false,
            status_code: status::OK,
            status_message: String::new(),
            elapsed_millis: 0,
            payload: Bytes::new(),
            codec,
        }
    }

    /// Create a request envelope for `method`.
    pub fn request(codec: Codec, method: impl Into<String>, sequence: Sequence) -> Self {
        Self {
            method: method.into(),
            sequence,
            ..Self::new(codec)
        }
    }

    /// Create an empty successful reply to `self`.
    ///
    /// The reply keeps the request's method, sequence and codec.
    pub fn reply(&self) -> Self {
        Self {
            method: self.method.clone(),
            sequence: self.sequence,
            is_reply: true,
            ..Self::new(self.codec)
        }
    }

    /// Create an error-only reply to `self`.
    pub fn error_reply(&self, code: u8, message: impl Into<String>) -> Self {
        let mut reply = self.reply();
        reply.set_error(code, message);
        reply
    }

    /// The codec this envelope is bound to.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Serialise `value` into the payload using this envelope's codec.
    pub fn set_payload<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.payload = Bytes::from(self.codec.encode(value)?);
        Ok(())
    }

    /// Builder-style [`set_payload`](Self::set_payload).
    pub fn with_payload<T>(mut self, value: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        self.set_payload(value)?;
        Ok(self)
    }

    /// Deserialise the payload using this envelope's codec.
    pub fn read_payload<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.codec.decode(&self.payload)
    }

    /// Set the status fields.
    pub fn set_error(&mut self, code: u8, message: impl Into<String>) -> &mut Self {
        self.status_code = code;
        self.status_message = message.into();
        self
    }

    /// Builder-style [`set_error`](Self::set_error).
    pub fn with_error(mut self, code: u8, message: impl Into<String>) -> Self {
        self.set_error(code, message);
        self
    }

    /// Outcome described by the status fields.
    ///
    /// # Errors
    ///
    /// - `RpcError::MethodNotFound` for [`status::METHOD_NOT_FOUND`]
    /// - `RpcError::Internal` for [`status::INTERNAL_ERROR`]
    /// - `RpcError::Remote` for any other non-zero code
    pub fn status(&self) -> Result<()> {
        match RpcError::from_status(self.status_code, &self.status_message) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Serialise the whole envelope.
    pub fn encode(&self) -> Result<Bytes> {
        // ---
        let bytes = match self.codec {
            Codec::MsgPack => {
                let data = if self.payload.is_empty() {
                    None
                } else {
                    Some(
                        rmpv::decode::read_value(&mut &self.payload[..]).map_err(|e| {
                            RpcError::Encode(format!("payload is not MessagePack: {e}"))
                        })?,
                    )
                };
                rmp_serde::to_vec_named(&self.wire(data))?
            }
            Codec::Json => {
                let data = if self.payload.is_empty() {
                    None
                } else {
                    Some(
                        serde_json::from_slice::<&RawValue>(&self.payload)
                            .map_err(|e| RpcError::Encode(format!("payload is not JSON: {e}")))?,
                    )
                };
                serde_json::to_vec(&self.wire(data))
                    .map_err(|e| RpcError::Encode(e.to_string()))?
            }
        };
        Ok(Bytes::from(bytes))
    }

    /// Parse an envelope encoded with `codec`.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Decode` for malformed input.
    pub fn decode(codec: Codec, buf: &[u8]) -> Result<Self> {
        // ---
        match codec {
            Codec::MsgPack => {
                let wire: WireEnvelope<rmpv::Value> = rmp_serde::from_slice(buf)?;
                wire.into_envelope(codec, |value| {
                    let mut payload = Vec::new();
                    rmpv::encode::write_value(&mut payload, &value)
                        .map_err(|e| RpcError::Decode(e.to_string()))?;
                    Ok(Bytes::from(payload))
                })
            }
            Codec::Json => {
                let wire: WireEnvelope<Box<RawValue>> =
                    serde_json::from_slice(buf).map_err(|e| RpcError::Decode(e.to_string()))?;
                wire.into_envelope(codec, |raw| {
                    Ok(Bytes::copy_from_slice(raw.get().as_bytes()))
                })
            }
        }
    }

    /// Parse an envelope, detecting its codec from the first byte.
    pub fn decode_any(buf: &[u8]) -> Result<Self> {
        let codec = Codec::sniff(buf).ok_or_else(|| RpcError::Decode("empty data".into()))?;
        Self::decode(codec, buf)
    }

    /// Copy of this envelope re-bound to `target`, payload re-encoded.
    pub fn transcode(&self, target: Codec) -> Result<Self> {
        let payload = self.codec.transcode(&self.payload, target)?;
        Ok(Self {
            payload: Bytes::from(payload),
            codec: target,
            ..self.clone()
        })
    }

    fn wire<D>(&self, data: Option<D>) -> WireEnvelopeRef<'_, D> {
        WireEnvelopeRef {
            method: &self.method,
            sequence: self.sequence.get(),
            is_reply: self.is_reply,
            status_code: self.status_code,
            status_message: &self.status_message,
            elapsed_millis: self.elapsed_millis,
            data,
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_empty_str(value: &&str) -> bool {
    value.is_empty()
}

fn is_zero_u8(value: &u8) -> bool {
    *value == 0
}

fn is_zero_u32(value: &u32) -> bool {
    *value == 0
}

#[derive(Serialize)]
struct WireEnvelopeRef<'a, D> {
    #[serde(rename = "f")]
    method: &'a str,
    #[serde(rename = "s")]
    sequence: u32,
    #[serde(rename = "r", skip_serializing_if = "is_false")]
    is_reply: bool,
    #[serde(rename = "c", skip_serializing_if = "is_zero_u8")]
    status_code: u8,
    #[serde(rename = "m", skip_serializing_if = "is_empty_str")]
    status_message: &'a str,
    #[serde(rename = "t", skip_serializing_if = "is_zero_u32")]
    elapsed_millis: u32,
    #[serde(rename = "d", skip_serializing_if = "Option::is_none")]
    data: Option<D>,
}

#[derive(Deserialize)]
struct WireEnvelope<D> {
    #[serde(rename = "f", default)]
    method: String,
    #[serde(rename = "s", default)]
    sequence: u32,
    #[serde(rename = "r", default)]
    is_reply: bool,
    #[serde(rename = "c", default)]
    status_code: u8,
    #[serde(rename = "m", default)]
    status_message: String,
    #[serde(rename = "t", default)]
    elapsed_millis: u32,
    #[serde(rename = "d", default = "Option::default")]
    data: Option<D>,
}

impl<D> WireEnvelope<D> {
    fn into_envelope(
        self,
        codec: Codec,
        payload: impl FnOnce(D) -> Result<Bytes>,
    ) -> Result<Envelope> {
        let payload = match self.data {
            Some(data) => payload(data)?,
            None => Bytes::new(),
        };
        Ok(Envelope {
            method: self.method,
            sequence: Sequence::new(self.sequence),
            is_reply: self.is_reply,
            status_code: self.status_code,
            status_message: self.status_message,
            elapsed_millis: self.elapsed_millis,
            payload,
            codec,
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        say: String,
        times: u32,
    }

    fn full_reply(codec: Codec) -> Envelope {
        let mut env = Envelope::request(codec, "login", Sequence::new(99)).reply();
        env.set_payload(&Greeting {
            say: "ok".into(),
            times: 2,
        })
        .unwrap();
        env.set_error(status::STANDARD, "user does not exist");
        env.elapsed_millis = 12;
        env
    }

    #[test]
    fn test_round_trip_all_fields() {
        // ---
        for codec in [Codec::MsgPack, Codec::Json] {
            let env = full_reply(codec);
            let decoded = Envelope::decode(codec, &env.encode().unwrap()).unwrap();
            assert_eq!(decoded, env, "codec {codec}");
        }
    }

    #[test]
    fn test_json_uses_short_keys_and_omits_defaults() {
        // ---
        let env = Envelope::request(Codec::Json, "hello", Sequence::new(3));
        let text = String::from_utf8(env.encode().unwrap().to_vec()).unwrap();
        assert_eq!(text, r#"{"f":"hello","s":3}"#);
    }

    #[test]
    fn test_json_payload_is_embedded_raw() {
        // ---
        let env = Envelope::request(Codec::Json, "hello", Sequence::new(1))
            .with_payload(&"xxxxxxxx")
            .unwrap();
        let text = String::from_utf8(env.encode().unwrap().to_vec()).unwrap();
        assert_eq!(text, r#"{"f":"hello","s":1,"d":"xxxxxxxx"}"#);
    }

    #[test]
    fn test_decode_accepts_foreign_json() {
        // ---
        let raw = br#"{"f":"login","s":5,"r":true,"c":1,"m":"nope","t":4,"d":{"say":"ok","times":1}}"#;
        let env = Envelope::decode(Codec::Json, raw).unwrap();
        assert!(env.is_reply);
        assert_eq!(env.sequence.get(), 5);
        assert_eq!(env.elapsed_millis, 4);
        let greeting: Greeting = env.read_payload().unwrap();
        assert_eq!(greeting.times, 1);
        assert!(matches!(env.status(), Err(RpcError::Remote { code: 1, .. })));
    }

    #[test]
    fn test_msgpack_payload_is_inline() {
        // ---
        let env = Envelope::request(Codec::MsgPack, "add", Sequence::new(1))
            .with_payload(&(2i64, 3i64))
            .unwrap();
        let bytes = env.encode().unwrap();
        assert!(
            bytes.ends_with(&[0xa1, b'd', 0x92, 0x02, 0x03]),
            "payload not inline: {:02x?}",
            &bytes[..]
        );
    }

    #[derive(Serialize)]
    struct ForeignRequest {
        f: &'static str,
        s: u32,
        d: (i64, i64),
    }

    #[test]
    fn test_decode_accepts_foreign_msgpack() {
        // ---
        let raw = rmp_serde::to_vec_named(&ForeignRequest {
            f: "add",
            s: 1,
            d: (2, 3),
        })
        .unwrap();
        let env = Envelope::decode(Codec::MsgPack, &raw).unwrap();
        assert_eq!(env.method, "add");
        assert_eq!(env.sequence.get(), 1);
        assert_eq!(env.read_payload::<(i64, i64)>().unwrap(), (2, 3));
    }

    #[test]
    fn test_encode_rejects_non_msgpack_payload() {
        // ---
        let mut env = Envelope::request(Codec::MsgPack, "add", Sequence::new(1));
        env.payload = Bytes::from_static(&[0xc1]);
        assert!(matches!(env.encode(), Err(RpcError::Encode(_))));
    }

    #[test]
    fn test_malformed_input_is_decode_error() {
        // ---
        assert!(matches!(
            Envelope::decode(Codec::Json, b"{\"f\":"),
            Err(RpcError::Decode(_))
        ));
        assert!(matches!(
            Envelope::decode(Codec::MsgPack, &[0x93, 0x01]),
            Err(RpcError::Decode(_))
        ));
        assert!(matches!(Envelope::decode_any(&[]), Err(RpcError::Decode(_))));
    }

    #[test]
    fn test_decode_any_detects_codec() {
        // ---
        for codec in [Codec::MsgPack, Codec::Json] {
            let bytes = full_reply(codec).encode().unwrap();
            assert_eq!(Envelope::decode_any(&bytes).unwrap().codec(), codec);
        }
    }

    #[test]
    fn test_transcode_keeps_payload_value() {
        // ---
        let env = full_reply(Codec::MsgPack);
        let json = env.transcode(Codec::Json).unwrap();
        assert_eq!(json.codec(), Codec::Json);
        assert_eq!(json.status_message, env.status_message);
        assert_eq!(
            json.read_payload::<Greeting>().unwrap(),
            env.read_payload::<Greeting>().unwrap()
        );
    }

    #[test]
    fn test_reply_keeps_correlation() {
        // ---
        let request = Envelope::request(Codec::MsgPack, "add", Sequence::new(41));
        let reply = request.error_reply(status::METHOD_NOT_FOUND, "");
        assert!(reply.is_reply);
        assert_eq!(reply.sequence, request.sequence);
        assert_eq!(reply.method, "add");
        assert!(reply.payload.is_empty());
        assert!(matches!(reply.status(), Err(RpcError::MethodNotFound)));
    }

    proptest! {
        #[test]
        fn prop_envelope_round_trip(
            method in "[a-z_/]{0,24}",
            seq in any::<u32>(),
            is_reply in any::<bool>(),
            code in any::<u8>(),
            message in ".{0,32}",
            elapsed in any::<u32>(),
            say in ".{0,16}",
            times in any::<u32>(),
            json in any::<bool>(),
        ) {
            let codec = if json { Codec::Json } else { Codec::MsgPack };
            let mut env = Envelope::request(codec, method, Sequence::new(seq));
            env.is_reply = is_reply;
            env.set_error(code, message);
            env.elapsed_millis = elapsed;
            env.set_payload(&Greeting { say, times }).unwrap();

            let decoded = Envelope::decode(codec, &env.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, env);
        }
    }
}
