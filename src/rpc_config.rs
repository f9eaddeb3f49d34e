//! Connection configuration.
//!
//! This type intentionally contains no transport-specific concepts (socket
//! addresses, TLS material). Those belong to whatever [`Dialer`](crate::Dialer)
//! or accepted [`Stream`](crate::Stream) the connection is built from.

use std::sync::Arc;
use std::time::Duration;

use crate::frame::DEFAULT_MAX_FRAME_SIZE;
use crate::reconnect::{FixedDelay, ReconnectPolicy};
use crate::Codec;

/// How inbound requests are fanned out to handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Every request runs on its own task with no limit.
    #[default]
    Unbounded,

    /// Every request still gets its own task, but at most `n` handlers
    /// execute at once; the rest wait for a permit.
    ///
    /// Reply delivery and the read loop are never throttled.
    Bounded(usize),
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    // ---
    /// Codec used for every envelope sent on the connection.
    ///
    /// Default: [`Codec::MsgPack`]
    pub codec: Codec,

    /// Keep dialing after a failed dial.
    ///
    /// When `false`, the first failed dial stops the connection for good.
    /// Only meaningful for dialing connections.
    ///
    /// Default: `false`
    pub reconnect: bool,

    /// Delay between dial attempts.
    ///
    /// Default: [`FixedDelay`] of 3 seconds
    pub reconnect_policy: Arc<dyn ReconnectPolicy>,

    /// Timeout used by [`Connection::request`](crate::Connection::request).
    ///
    /// `Duration::ZERO` waits forever.
    ///
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// Largest accepted inbound frame; `None` disables the check.
    ///
    /// Default: 16 MiB
    pub max_frame_size: Option<u32>,

    /// Handler fan-out strategy.
    ///
    /// Default: [`DispatchMode::Unbounded`]
    pub dispatch: DispatchMode,

    /// Capacity of each [`AsyncReply`](crate::AsyncReply) channel.
    ///
    /// Default: 16
    pub async_reply_buffer: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            codec: Codec::MsgPack,
            reconnect: false,
            reconnect_policy: Arc::new(FixedDelay::default()),
            request_timeout: Duration::from_secs(30),
            max_frame_size: Some(DEFAULT_MAX_FRAME_SIZE),
            dispatch: DispatchMode::Unbounded,
            async_reply_buffer: 16,
        }
    }
}

impl RpcConfig {
    /// Set the codec.
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Enable reconnection with a fixed delay between attempts.
    ///
    /// # Example
    ///
    /// ```
    /// use framed_rpc::RpcConfig;
    /// use std::time::Duration;
    ///
    /// let config = RpcConfig::default().with_reconnect(Duration::from_secs(3));
    /// assert!(config.reconnect);
    /// ```
    pub fn with_reconnect(mut self, delay: Duration) -> Self {
        self.reconnect = true;
        self.reconnect_policy = Arc::new(FixedDelay(delay));
        self
    }

    /// Enable reconnection, pacing attempts with `policy`.
    pub fn with_reconnect_policy(mut self, policy: impl ReconnectPolicy) -> Self {
        self.reconnect = true;
        self.reconnect_policy = Arc::new(policy);
        self
    }

    /// Set the default request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set (or remove, with `None`) the inbound frame limit.
    pub fn with_max_frame_size(mut self, max: Option<u32>) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Set the handler fan-out strategy.
    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Set the per-handle buffer for asynchronous calls.
    pub fn with_async_reply_buffer(mut self, capacity: usize) -> Self {
        self.async_reply_buffer = capacity.max(1);
        self
    }
}
