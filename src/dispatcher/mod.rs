//! Method-name routing for inbound requests.
//!
//! A [`Dispatcher`] maps method names to [`Handler`]s. For each request it:
//!
//! 1. looks up the handler (or the unknown-method fallback)
//! 2. runs it with panic isolation
//! 3. stamps the reply with the request's sequence, `is_reply = true` and
//!    the handler's execution time
//! 4. writes the reply on the connection the request came from
//!
//! A panicking handler never takes the connection down: the panic is
//! reported to the `on_panic` hook and the caller receives an
//! `INTERNAL_ERROR` reply.

mod handler;

pub use handler::{Handler, HandlerError};

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::status;
use crate::sync::{read_ignore_poison, write_ignore_poison};
use crate::{Connection, Envelope, RpcError};
use handler::Typed;

type PanicHook = Arc<dyn Fn(&Connection, &Envelope, &str) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&Connection, &RpcError) + Send + Sync>;

/// Registry of method handlers shared by any number of connections.
///
/// # Example
///
/// ```
/// use framed_rpc::{Dispatcher, HandlerError};
/// use std::sync::Arc;
///
/// let dispatcher = Arc::new(Dispatcher::new());
/// dispatcher.register_typed("add", |(a, b): (i64, i64)| async move {
///     a.checked_add(b).ok_or_else(|| HandlerError::standard("overflow"))
/// });
/// assert!(dispatcher.contains("add"));
/// ```
#[derive(Default)]
pub struct Dispatcher {
    routes: RwLock<HashMap<String, Arc<dyn Handler>>>,
    unknown: RwLock<Option<Arc<dyn Handler>>>,
    on_panic: RwLock<Option<PanicHook>>,
    on_error: RwLock<Option<ErrorHook>>,
}

impl Dispatcher {
    // ---

    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method`, replacing any previous one.
    pub fn register<H: Handler>(&self, method: impl Into<String>, handler: H) {
        // ---
        let method = method.into();
        crate::log_debug!("registering handler for {method}");
        write_ignore_poison(&self.routes).insert(method, Arc::new(handler));
    }

    /// Register a handler that works on decoded payloads.
    ///
    /// The request payload is decoded into `Req` with the request's codec
    /// (undecodable payloads get a [`status::STANDARD`] error reply); an
    /// `Ok` result becomes the reply payload, an `Err` its status fields.
    pub fn register_typed<F, Fut, Req, Resp>(&self, method: impl Into<String>, f: F)
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, HandlerError>> + Send + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
    {
        self.register(method, Typed::new(f));
    }

    /// Remove the handler for `method`. Returns true if one was registered.
    pub fn unregister(&self, method: &str) -> bool {
        write_ignore_poison(&self.routes).remove(method).is_some()
    }

    /// Handler invoked for methods with no registered handler.
    ///
    /// Without one, such requests get a [`status::METHOD_NOT_FOUND`] reply.
    pub fn on_unknown_method<H: Handler>(&self, handler: H) {
        *write_ignore_poison(&self.unknown) = Some(Arc::new(handler));
    }

    /// Observe handler panics: connection, request, panic message.
    pub fn on_panic<F>(&self, f: F)
    where
        F: Fn(&Connection, &Envelope, &str) + Send + Sync + 'static,
    {
        *write_ignore_poison(&self.on_panic) = Some(Arc::new(f));
    }

    /// Observe failures to send a reply.
    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&Connection, &RpcError) + Send + Sync + 'static,
    {
        *write_ignore_poison(&self.on_error) = Some(Arc::new(f));
    }

    pub fn contains(&self, method: &str) -> bool {
        read_ignore_poison(&self.routes).contains_key(method)
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        // ---
        let mut methods: Vec<String> = read_ignore_poison(&self.routes).keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Serve one request received on `conn`.
    ///
    /// Called by the connection for every inbound envelope with
    /// `is_reply == false`; public so requests can be re-dispatched or
    /// dispatched from a custom read path.
    pub async fn dispatch(&self, conn: &Connection, request: Envelope) {
        // ---
        let started = Instant::now();
        let sequence = request.sequence;
        let method = request.method.clone();

        let handler = read_ignore_poison(&self.routes).get(&method).cloned();
        let fallback = read_ignore_poison(&self.unknown).clone();
        let Some(handler) = handler.or(fallback) else {
            crate::log_debug!("no handler for method: {method}");
            let reply =
                request.error_reply(status::METHOD_NOT_FOUND, format!("method not found: {method}"));
            self.send_reply(conn, reply).await;
            return;
        };

        // Kept for the error reply if the handler panics.
        let template = request.reply();

        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| {
            handler.call(conn.clone(), request)
        })) {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
            Err(panic) => Err(panic),
        };
        let elapsed = elapsed_millis(started);

        let reply = match outcome {
            Ok(Some(mut reply)) => {
                reply.is_reply = true;
                reply.sequence = sequence;
                if reply.method.is_empty() {
                    reply.method = method.clone();
                }
                reply
            }
            Ok(None) => {
                crate::log_trace!("{method} {sequence} handled without reply");
                return;
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                crate::log_error!("handler for {method} {sequence} panicked: {message}");

                let hook = read_ignore_poison(&self.on_panic).clone();
                if let Some(hook) = hook {
                    hook(conn, &template, &message);
                }
                template.with_error(status::INTERNAL_ERROR, message)
            }
        };

        let mut reply = reply;
        reply.elapsed_millis = elapsed;
        crate::log_trace!("{method} {sequence} handled in {elapsed}ms");
        self.send_reply(conn, reply).await;
    }

    async fn send_reply(&self, conn: &Connection, reply: Envelope) {
        // ---
        if let Err(e) = conn.send(&reply).await {
            crate::log_warn!("failed to send reply {} for {}: {e}", reply.sequence, reply.method);
            let hook = read_ignore_poison(&self.on_error).clone();
            if let Some(hook) = hook {
                hook(conn, &e);
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("methods", &self.methods())
            .finish_non_exhaustive()
    }
}

fn elapsed_millis(started: Instant) -> u32 {
    u32::try_from(started.elapsed().as_millis()).unwrap_or(u32::MAX)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    // ---
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic in handler: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic in handler: {s}")
    } else {
        "panic in handler".to_string()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::frame::read_frame;
    use crate::{Codec, RpcConfig, Sequence};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{BufReader, DuplexStream};

    fn server() -> (Connection, BufReader<DuplexStream>) {
        let (a, b) = tokio::io::duplex(4096);
        (Connection::new(a, RpcConfig::default()), BufReader::new(b))
    }

    async fn next_reply(peer: &mut BufReader<DuplexStream>) -> Envelope {
        let body = read_frame(peer, None).await.unwrap();
        Envelope::decode(Codec::MsgPack, &body).unwrap()
    }

    #[tokio::test]
    async fn test_reply_is_stamped() {
        // ---
        let (conn, mut peer) = server();
        let dispatcher = Dispatcher::new();
        dispatcher.register("echo", |_c: Connection, req: Envelope| async move {
            // Handler forgets every correlation field on purpose.
            let mut env = Envelope::new(Codec::MsgPack);
            env.payload = req.payload;
            Some(env)
        });

        let request = Envelope::request(Codec::MsgPack, "echo", Sequence::new(42))
            .with_payload("hi")
            .unwrap();
        dispatcher.dispatch(&conn, request).await;

        let reply = next_reply(&mut peer).await;
        assert!(reply.is_reply);
        assert_eq!(reply.sequence, Sequence::new(42));
        assert_eq!(reply.method, "echo");
        assert_eq!(reply.read_payload::<String>().unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_unknown_method_gets_not_found() {
        // ---
        let (conn, mut peer) = server();
        let dispatcher = Dispatcher::new();

        let request = Envelope::request(Codec::MsgPack, "nope", Sequence::new(3));
        dispatcher.dispatch(&conn, request).await;

        let reply = next_reply(&mut peer).await;
        assert_eq!(reply.status_code, status::METHOD_NOT_FOUND);
        assert!(matches!(reply.status(), Err(RpcError::MethodNotFound)));
    }

    #[tokio::test]
    async fn test_unknown_method_fallback() {
        // ---
        let (conn, mut peer) = server();
        let dispatcher = Dispatcher::new();
        dispatcher.on_unknown_method(|_c: Connection, req: Envelope| async move {
            let method = req.method.clone();
            req.reply().with_payload(&format!("fallback:{method}")).ok()
        });

        dispatcher
            .dispatch(&conn, Envelope::request(Codec::MsgPack, "x.y", Sequence::new(8)))
            .await;

        let reply = next_reply(&mut peer).await;
        assert_eq!(reply.read_payload::<String>().unwrap(), "fallback:x.y");
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        // ---
        let (conn, mut peer) = server();
        let dispatcher = Dispatcher::new();
        let panics = Arc::new(AtomicUsize::new(0));
        let seen = panics.clone();
        dispatcher.on_panic(move |_c, req, message| {
            assert_eq!(req.method, "boom");
            assert!(message.contains("kaboom"));
            seen.fetch_add(1, Ordering::SeqCst);
        });
        dispatcher.register("boom", |_c: Connection, _req: Envelope| async move {
            if true {
                panic!("kaboom");
            }
            None
        });

        dispatcher
            .dispatch(&conn, Envelope::request(Codec::MsgPack, "boom", Sequence::new(5)))
            .await;

        let reply = next_reply(&mut peer).await;
        assert_eq!(reply.sequence, Sequence::new(5));
        assert_eq!(reply.status_code, status::INTERNAL_ERROR);
        assert!(reply.status_message.contains("kaboom"));
        assert_eq!(panics.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_typed_handler_errors_become_status() {
        // ---
        let (conn, mut peer) = server();
        let dispatcher = Dispatcher::new();
        dispatcher.register_typed("div", |(a, b): (i32, i32)| async move {
            if b == 0 {
                return Err(HandlerError::new(7, "division by zero"));
            }
            Ok(a / b)
        });

        let ok = Envelope::request(Codec::MsgPack, "div", Sequence::new(1))
            .with_payload(&(9, 3))
            .unwrap();
        dispatcher.dispatch(&conn, ok).await;
        let reply = next_reply(&mut peer).await;
        assert_eq!(reply.read_payload::<i32>().unwrap(), 3);

        let bad = Envelope::request(Codec::MsgPack, "div", Sequence::new(2))
            .with_payload(&(1, 0))
            .unwrap();
        dispatcher.dispatch(&conn, bad).await;
        let reply = next_reply(&mut peer).await;
        match reply.status() {
            Err(RpcError::Remote { code, message }) => {
                assert_eq!(code, 7);
                assert_eq!(message, "division by zero");
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_reply_handler_writes_nothing() {
        // ---
        let (conn, mut peer) = server();
        let dispatcher = Dispatcher::new();
        dispatcher.register("notify", |_c: Connection, _req: Envelope| async move { None });
        dispatcher.register("ping", |_c: Connection, req: Envelope| async move { Some(req.reply()) });

        dispatcher
            .dispatch(&conn, Envelope::request(Codec::MsgPack, "notify", Sequence::new(1)))
            .await;
        dispatcher
            .dispatch(&conn, Envelope::request(Codec::MsgPack, "ping", Sequence::new(2)))
            .await;

        // The first frame on the wire is the ping reply.
        let reply = next_reply(&mut peer).await;
        assert_eq!(reply.sequence, Sequence::new(2));
    }

    #[test]
    fn test_methods_sorted() {
        // ---
        let dispatcher = Dispatcher::new();
        dispatcher.register("b", |_c: Connection, _r: Envelope| async move { None });
        dispatcher.register("a", |_c: Connection, _r: Envelope| async move { None });
        assert_eq!(dispatcher.methods(), vec!["a".to_string(), "b".to_string()]);
        assert!(dispatcher.unregister("a"));
        assert!(!dispatcher.contains("a"));
    }
}
