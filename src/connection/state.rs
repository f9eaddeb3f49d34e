//! Connection state machine.
//!
//! ```text
//!            start (dialer)          dial ok
//! Disconnected ──────────► Connecting ───────► Connected
//!      ▲                       │                   │
//!      │     dial failed,      │                   │ stream ended
//!      └───── reconnect ───────┘◄──────────────────┘
//!
//! any state ── close() / dial failed without reconnect ──► Stopped
//! ```
//!
//! A connection built from an accepted stream starts in `Connected` and
//! moves to `Stopped` once that stream ends.

use std::fmt;

/// Lifecycle state of a [`Connection`](crate::Connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No live stream; a dialing connection will try again.
    Disconnected,

    /// A dial is in progress.
    Connecting,

    /// A stream is established and the read loop runs. Calls are accepted.
    Connected,

    /// Torn down for good. Terminal.
    Stopped,
}

impl ConnectionState {
    /// Whether calls may be issued in this state.
    pub fn is_online(self) -> bool {
        self == ConnectionState::Connected
    }

    /// Whether this is the terminal state.
    pub fn is_stopped(self) -> bool {
        self == ConnectionState::Stopped
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
