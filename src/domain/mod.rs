//! Domain layer public interface.
//!
//! This module defines the message envelope and the byte-stream
//! abstractions the runtime is written against. Nothing in here knows about
//! sockets, correlation tables or handlers.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod envelope;
mod stream;

// --- Domain re-exports ---

pub use envelope::Envelope;
pub use stream::{BoxStream, Dialer, Stream};
