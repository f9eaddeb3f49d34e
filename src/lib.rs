//! Bidirectional RPC over a single persistent byte stream.
//!
//! Both ends of a [`Connection`] can issue calls and serve requests. Every
//! message is an [`Envelope`] encoded with a pluggable [`Codec`]
//! (MessagePack or JSON) and framed with a 4-byte little-endian length
//! prefix. Calls are correlated with their replies by [`Sequence`];
//! inbound requests are routed by method name through a [`Dispatcher`].
//!
//! ```no_run
//! use framed_rpc::transport::MemoryHub;
//! use framed_rpc::{Connection, Dispatcher, HandlerError, RpcConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> framed_rpc::Result<()> {
//! let hub = MemoryHub::new();
//! let mut listener = hub.listen("calc");
//!
//! let dispatcher = Arc::new(Dispatcher::new());
//! dispatcher.register_typed("add", |(a, b): (i64, i64)| async move {
//!     Ok::<_, HandlerError>(a + b)
//! });
//!
//! let client = Connection::with_dialer(hub.dialer("calc"), RpcConfig::default());
//! client.start()?;
//!
//! if let Some(stream) = listener.accept().await {
//!     let server = Connection::builder().stream(stream).dispatcher(dispatcher).build()?;
//!     server.start()?;
//! }
//!
//! client.wait_online(Duration::from_secs(1)).await?;
//! let sum: i64 = client.request("add", &(2, 3)).await?;
//! assert_eq!(sum, 5);
//! # Ok(())
//! # }
//! ```
//!
//! Logging goes through `tracing` when the `logging` feature (on by default)
//! is enabled.

mod macros;
mod sync;

mod codec;
mod connection;
mod connection_builder;
mod correlation;
mod dispatcher;
mod domain;
mod error;
mod reconnect;
mod rpc_config;

pub mod frame;
pub mod transport;

pub(crate) use macros::{log_debug, log_error, log_info, log_trace, log_warn};

// --- public re-exports
pub use codec::Codec;
pub use connection::{AsyncReply, Connection, ConnectionState};
pub use connection_builder::ConnectionBuilder;
pub use correlation::Sequence;
pub use dispatcher::{Dispatcher, Handler, HandlerError};
pub use domain::{
    //
    BoxStream,
    Dialer,
    Envelope,
    Stream,
};
pub use error::{status, Result, RpcError};
pub use reconnect::{ExponentialBackoff, FixedDelay, ReconnectPolicy};
pub use rpc_config::{DispatchMode, RpcConfig};
