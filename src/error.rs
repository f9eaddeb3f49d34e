use thiserror::Error;

/// Reply status codes carried in an envelope's `c` field.
///
/// Zero means success. The two top values are reserved by the runtime;
/// everything in between is free for application-defined errors.
pub mod status {
    /// Successful reply.
    pub const OK: u8 = 0;

    /// Generic application error (pair it with a status message).
    pub const STANDARD: u8 = 1;

    /// The peer failed while handling the request.
    pub const INTERNAL_ERROR: u8 = 254;

    /// No handler is registered for the requested method.
    pub const METHOD_NOT_FOUND: u8 = 255;
}

/// Errors that can occur during RPC operations
#[derive(Error, Debug)]
pub enum RpcError {
    /// Establishing the underlying stream failed.
    #[error("dial error: {0}")]
    Dial(#[source] std::io::Error),

    /// Read or write failure on an established stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream.
    #[error("stream closed")]
    StreamClosed,

    /// A frame announced a length above the configured limit.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: u32, max: u32 },

    /// Serialising an envelope or payload failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// Parsing an envelope or payload failed.
    #[error("decode error: {0}")]
    Decode(String),

    /// No live stream to write to.
    #[error("connection has no live stream")]
    NotConnected,

    /// A call was attempted while the connection is not online.
    #[error("not online")]
    Offline,

    /// Synchronous call waited longer than its timeout.
    #[error("request timed out")]
    Timeout,

    /// The connection was closed while the call was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// `start()` was called more than once.
    #[error("connection already started")]
    AlreadyStarted,

    /// Builder input is incomplete or contradictory.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Reply status `METHOD_NOT_FOUND`.
    #[error("method is not found")]
    MethodNotFound,

    /// Reply status `INTERNAL_ERROR`.
    #[error("internal error: {0}")]
    Internal(String),

    /// Application-defined error status from the peer.
    #[error("remote error (code {code}): {message}")]
    Remote { code: u8, message: String },
}

impl From<rmp_serde::encode::Error> for RpcError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        RpcError::Encode(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for RpcError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        RpcError::Decode(err.to_string())
    }
}

impl RpcError {
    /// Whether the error ends the stream it occurred on.
    pub fn is_stream_fatal(&self) -> bool {
        matches!(
            self,
            RpcError::Io(_)
                | RpcError::StreamClosed
                | RpcError::FrameTooLarge { .. }
                | RpcError::Decode(_)
        )
    }

    /// Map a reply's status fields to an outcome.
    pub(crate) fn from_status(code: u8, message: &str) -> Option<Self> {
        // ---
        match code {
            status::OK => None,
            status::METHOD_NOT_FOUND => Some(RpcError::MethodNotFound),
            status::INTERNAL_ERROR => Some(RpcError::Internal(message.to_string())),
            code => {
                let message = if message.is_empty() {
                    format!("response error code={code}")
                } else {
                    message.to_string()
                };
                Some(RpcError::Remote { code, message })
            }
        }
    }
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;
