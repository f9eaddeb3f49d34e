//! Handle for calls that may receive any number of replies.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::mpsc;

use super::pending::PendingCalls;
use crate::{Envelope, Result, RpcError, Sequence};

/// Receiving end of [`Connection::call_async`](crate::Connection::call_async).
///
/// Every reply carrying this call's sequence is delivered in arrival order
/// until the handle is closed or dropped, which unregisters the sequence.
/// Replies that arrive afterwards are discarded.
///
/// Also implements [`futures::Stream`].
pub struct AsyncReply {
    sequence: Sequence,
    rx: mpsc::Receiver<Result<Envelope>>,
    pending: Arc<PendingCalls>,
}

impl AsyncReply {
    pub(crate) fn new(
        sequence: Sequence,
        rx: mpsc::Receiver<Result<Envelope>>,
        pending: Arc<PendingCalls>,
    ) -> Self {
        Self {
            sequence,
            rx,
            pending,
        }
    }

    /// Sequence assigned to the request.
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Next reply.
    ///
    /// Yields `Some(Err(RpcError::ConnectionClosed))` once if the connection
    /// is closed while the handle is live, then `None`.
    pub async fn recv(&mut self) -> Option<Result<Envelope>> {
        self.rx.recv().await
    }

    /// Next reply, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// - `RpcError::Timeout` if nothing arrives in time (the handle stays usable)
    /// - `RpcError::ConnectionClosed` if the handle can no longer receive
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Envelope> {
        // ---
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(reply)) => reply,
            Ok(None) => Err(RpcError::ConnectionClosed),
            Err(_) => Err(RpcError::Timeout),
        }
    }

    /// Stop receiving and unregister the sequence.
    pub fn close(self) {
        // Drop does the work.
    }
}

impl Drop for AsyncReply {
    fn drop(&mut self) {
        // ---
        self.rx.close();
        if self.pending.remove(self.sequence) {
            crate::log_trace!("async call {} released", self.sequence);
        }
    }
}

impl futures::Stream for AsyncReply {
    type Item = Result<Envelope>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for AsyncReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncReply")
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}
