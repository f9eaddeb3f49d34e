//! Table of calls awaiting a reply.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use crate::sync::lock_ignore_poison;
use crate::{Envelope, Result, RpcError, Sequence};

/// Where a reply for a pending sequence goes.
pub(crate) enum Sink {
    /// Synchronous call: first reply completes it and removes the entry.
    Once(oneshot::Sender<Result<Envelope>>),

    /// Asynchronous call: every reply is forwarded until the handle goes away.
    Stream(StreamSink),
}

/// Bounded reply channel of an async handle that never blocks the caller.
///
/// While the handle keeps up, replies go straight into `tx`. The first
/// reply that finds it full starts a forwarding task fed by an unbounded
/// backlog, and from then on every reply goes through the backlog, so the
/// handle still sees replies in arrival order.
pub(crate) struct StreamSink {
    tx: mpsc::Sender<Result<Envelope>>,
    backlog: Option<mpsc::UnboundedSender<Result<Envelope>>>,
}

impl StreamSink {
    fn push(&mut self, item: Result<Envelope>) {
        // ---
        if let Some(backlog) = &self.backlog {
            // Forwarder gone means the handle went away.
            let _ = backlog.send(item);
            return;
        }

        match self.tx.try_send(item) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(item)) => {
                let (backlog, mut queued) = mpsc::unbounded_channel();
                let _ = backlog.send(item);

                let tx = self.tx.clone();
                tokio::spawn(async move {
                    while let Some(item) = queued.recv().await {
                        if tx.send(item).await.is_err() {
                            break;
                        }
                    }
                });
                self.backlog = Some(backlog);
            }
        }
    }
}

/// Outcome of routing one inbound reply.
pub(crate) enum Routed {
    /// Handed to the waiting call (or its waiter already gave up).
    Delivered,

    /// No call is waiting on this sequence.
    Unroutable(Envelope),
}

/// Tracks pending calls by sequence.
///
/// At most one entry exists per sequence. Registering a sequence that is
/// still pending replaces the older entry, whose waiter then observes a
/// closed channel.
pub(crate) struct PendingCalls {
    // ---
    calls: Mutex<HashMap<Sequence, Sink>>,
}

impl PendingCalls {
    // ---

    pub(crate) fn new() -> Self {
        // ---
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Register a synchronous call.
    pub(crate) fn register_once(&self, sequence: Sequence) -> oneshot::Receiver<Result<Envelope>> {
        // ---
        let (tx, rx) = oneshot::channel();
        self.insert(sequence, Sink::Once(tx));
        rx
    }

    /// Register an asynchronous call with a bounded reply buffer.
    ///
    /// Routing to a full buffer needs a tokio runtime.
    pub(crate) fn register_stream(
        &self,
        sequence: Sequence,
        capacity: usize,
    ) -> mpsc::Receiver<Result<Envelope>> {
        // ---
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.insert(sequence, Sink::Stream(StreamSink { tx, backlog: None }));
        rx
    }

    fn insert(&self, sequence: Sequence, sink: Sink) {
        // ---
        let replaced = lock_ignore_poison(&self.calls).insert(sequence, sink);
        if replaced.is_some() {
            crate::log_warn!("sequence {sequence} was still pending; older call abandoned");
        }
    }

    /// Route an inbound reply to its waiter. Never blocks.
    pub(crate) fn route(&self, reply: Envelope) -> Routed {
        // ---
        let sequence = reply.sequence;
        let mut calls = lock_ignore_poison(&self.calls);

        match calls.remove(&sequence) {
            None => Routed::Unroutable(reply),
            Some(Sink::Once(tx)) => {
                // Receiver gone means the caller timed out concurrently.
                let _ = tx.send(Ok(reply));
                Routed::Delivered
            }
            Some(Sink::Stream(mut sink)) => {
                sink.push(Ok(reply));
                calls.insert(sequence, Sink::Stream(sink));
                Routed::Delivered
            }
        }
    }

    /// Drop the entry for `sequence`.
    ///
    /// Returns true if an entry was present.
    pub(crate) fn remove(&self, sequence: Sequence) -> bool {
        // ---
        lock_ignore_poison(&self.calls).remove(&sequence).is_some()
    }

    /// Fail every pending call with `ConnectionClosed` and empty the table.
    ///
    /// Returns the number of calls failed.
    pub(crate) fn fail_all(&self) -> usize {
        // ---
        let drained: Vec<Sink> = {
            let mut calls = lock_ignore_poison(&self.calls);
            calls.drain().map(|(_, sink)| sink).collect()
        };

        let count = drained.len();
        for sink in drained {
            match sink {
                Sink::Once(tx) => {
                    let _ = tx.send(Err(RpcError::ConnectionClosed));
                }
                Sink::Stream(sink) => match sink.backlog {
                    Some(backlog) => {
                        let _ = backlog.send(Err(RpcError::ConnectionClosed));
                    }
                    // A full buffer still sees the channel close once `tx` drops.
                    None => {
                        let _ = sink.tx.try_send(Err(RpcError::ConnectionClosed));
                    }
                },
            }
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        // ---
        lock_ignore_poison(&self.calls).len()
    }
}

/// Removes a pending entry when the waiting call goes away, whatever the
/// reason (reply, timeout, send failure, cancellation).
pub(crate) struct PendingGuard<'a> {
    pub(crate) pending: &'a PendingCalls,
    pub(crate) sequence: Sequence,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.sequence);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::Codec;

    fn reply(seq: u32) -> Envelope {
        // ---
        let mut env = Envelope::request(Codec::MsgPack, "echo", Sequence::new(seq));
        env.is_reply = true;
        env
    }

    #[test]
    fn test_once_delivery_removes_entry() {
        // ---
        let pending = PendingCalls::new();
        let rx = pending.register_once(Sequence::new(7));
        assert_eq!(pending.len(), 1);

        assert!(matches!(pending.route(reply(7)), Routed::Delivered));
        assert_eq!(pending.len(), 0);

        let received = rx.blocking_recv().unwrap().unwrap();
        assert_eq!(received.sequence, Sequence::new(7));
    }

    #[test]
    fn test_unknown_sequence_is_unroutable() {
        // ---
        let pending = PendingCalls::new();
        let _rx = pending.register_once(Sequence::new(1));

        match pending.route(reply(2)) {
            Routed::Unroutable(env) => assert_eq!(env.sequence, Sequence::new(2)),
            _ => panic!("reply for an unknown sequence must not be delivered"),
        }
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_stream_entry_survives_replies() {
        // ---
        let pending = PendingCalls::new();
        let mut rx = pending.register_stream(Sequence::new(3), 4);

        for _ in 0..3 {
            assert!(matches!(pending.route(reply(3)), Routed::Delivered));
        }
        assert_eq!(pending.len(), 1);
        for _ in 0..3 {
            assert_eq!(rx.try_recv().unwrap().unwrap().sequence, Sequence::new(3));
        }
        assert!(pending.remove(Sequence::new(3)));
        assert!(!pending.remove(Sequence::new(3)));
    }

    #[test]
    fn test_fail_all_wakes_every_waiter() {
        // ---
        let pending = PendingCalls::new();
        let once = pending.register_once(Sequence::new(1));
        let mut stream = pending.register_stream(Sequence::new(2), 1);

        assert_eq!(pending.fail_all(), 2);
        assert_eq!(pending.len(), 0);

        assert!(matches!(
            once.blocking_recv().unwrap(),
            Err(RpcError::ConnectionClosed)
        ));
        assert!(matches!(
            stream.blocking_recv().unwrap(),
            Err(RpcError::ConnectionClosed)
        ));
        assert!(stream.blocking_recv().is_none());
    }

    fn numbered(seq: u32, n: u32) -> Envelope {
        let mut env = reply(seq);
        env.elapsed_millis = n;
        env
    }

    #[tokio::test]
    async fn test_full_stream_keeps_arrival_order() {
        // ---
        let pending = PendingCalls::new();
        let mut rx = pending.register_stream(Sequence::new(4), 1);

        for n in 0..50 {
            assert!(matches!(pending.route(numbered(4, n)), Routed::Delivered));
        }

        for n in 0..50 {
            let got = rx.recv().await.unwrap().unwrap();
            assert_eq!(got.elapsed_millis, n);
        }
    }

    #[tokio::test]
    async fn test_fail_all_queues_behind_backlog() {
        // ---
        let pending = PendingCalls::new();
        let mut rx = pending.register_stream(Sequence::new(5), 1);

        for n in 0..3 {
            pending.route(numbered(5, n));
        }
        assert_eq!(pending.fail_all(), 1);

        for n in 0..3 {
            assert_eq!(rx.recv().await.unwrap().unwrap().elapsed_millis, n);
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            Err(RpcError::ConnectionClosed)
        ));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_guard_removes_on_drop() {
        // ---
        let pending = PendingCalls::new();
        let _rx = pending.register_once(Sequence::new(9));
        {
            let _guard = PendingGuard {
                pending: &pending,
                sequence: Sequence::new(9),
            };
        }
        assert_eq!(pending.len(), 0);
    }
}
