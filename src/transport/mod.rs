//! Concrete stream collaborators.
//!
//! The connection only needs a [`Stream`](crate::Stream) or a
//! [`Dialer`](crate::Dialer); this module supplies the common ones:
//!
//! - [`tcp`]: dial a `host:port`, or accept and serve peers
//! - [`memory`]: in-process pipes addressed by name, for tests and
//!   single-process setups

pub mod memory;
pub mod tcp;

pub use memory::{MemoryDialer, MemoryHub, MemoryListener};
pub use tcp::{RpcListener, TcpDialer};
