// src/transport/memory.rs

//! In-process streams.
//!
//! A [`MemoryHub`] is a named switchboard: listeners register under a name,
//! dialers connect to that name and receive one end of a fresh
//! `tokio::io::duplex` pipe while the listener receives the other. Dialing
//! a name nobody listens on fails with `ConnectionRefused`, so reconnect
//! behavior can be exercised without sockets.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use crate::sync::lock_ignore_poison;
use crate::{BoxStream, Dialer};

/// Default pipe capacity in bytes.
const DEFAULT_BUFFER: usize = 64 * 1024;

/// Shared registry of in-process listeners.
///
/// Clones share the same registry.
#[derive(Clone)]
pub struct MemoryHub {
    // ---
    listeners: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<DuplexStream>>>>,
    buffer: usize,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    /// Hub whose pipes buffer `buffer` bytes per direction.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            listeners: Arc::new(Mutex::new(HashMap::new())),
            buffer: buffer.max(1),
        }
    }

    /// Listen under `name`, replacing any previous listener.
    pub fn listen(&self, name: impl Into<String>) -> MemoryListener {
        // ---
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        lock_ignore_poison(&self.listeners).insert(name.clone(), tx);
        crate::log_debug!("memory listener registered: {name}");
        MemoryListener { name, rx }
    }

    /// Open a pipe to the listener registered under `name`.
    ///
    /// # Errors
    ///
    /// `ConnectionRefused` if no live listener has that name.
    pub fn connect(&self, name: &str) -> io::Result<DuplexStream> {
        // ---
        let (local, remote) = tokio::io::duplex(self.buffer);

        let mut listeners = lock_ignore_poison(&self.listeners);
        let Some(tx) = listeners.get(name) else {
            return Err(refused(name));
        };
        if tx.send(remote).is_err() {
            // Listener was dropped.
            listeners.remove(name);
            return Err(refused(name));
        }
        Ok(local)
    }

    /// Dialer bound to `name`, for [`Connection::with_dialer`](crate::Connection::with_dialer).
    pub fn dialer(&self, name: impl Into<String>) -> MemoryDialer {
        MemoryDialer {
            hub: self.clone(),
            name: name.into(),
        }
    }
}

impl std::fmt::Debug for MemoryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = lock_ignore_poison(&self.listeners).keys().cloned().collect();
        f.debug_struct("MemoryHub")
            .field("listeners", &names)
            .field("buffer", &self.buffer)
            .finish()
    }
}

fn refused(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::ConnectionRefused,
        format!("no memory listener named {name:?}"),
    )
}

/// Accepting side of a hub name. Dropping it refuses further dials.
#[derive(Debug)]
pub struct MemoryListener {
    name: String,
    rx: mpsc::UnboundedReceiver<DuplexStream>,
}

impl MemoryListener {
    /// Next incoming pipe; `None` once the listener was replaced.
    pub async fn accept(&mut self) -> Option<DuplexStream> {
        self.rx.recv().await
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// [`Dialer`] connecting to a [`MemoryHub`] name.
#[derive(Debug, Clone)]
pub struct MemoryDialer {
    hub: MemoryHub,
    name: String,
}

#[async_trait::async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self) -> io::Result<BoxStream> {
        let stream = self.hub.connect(&self.name)?;
        Ok(Box::new(stream))
    }
}
