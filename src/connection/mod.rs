//! A bidirectional RPC endpoint over one framed byte stream.
//!
//! Either side of a [`Connection`] may issue calls and serve requests:
//!
//! - outbound calls are correlated by [`Sequence`] through the pending table
//! - inbound requests are handed to the installed [`Dispatcher`]
//! - all frames written on the stream go through a single write lock
//!
//! A connection is created from an already established stream (server role)
//! or from a [`Dialer`] (client role), then driven by [`Connection::start`].
//! Client-role connections redial after the stream drops; see
//! [`ConnectionState`] for the full state machine.

mod async_reply;
mod hooks;
pub(crate) mod pending;
mod state;

pub use async_reply::AsyncReply;
pub use state::ConnectionState;

pub(crate) use hooks::Hooks;

use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex as AsyncMutex, Semaphore};

use crate::correlation::SequenceCounter;
use crate::error::status;
use crate::frame::{read_frame, write_frame};
use crate::sync::{lock_ignore_poison, read_ignore_poison, write_ignore_poison};
use crate::{
    // ---
    BoxStream,
    Codec,
    ConnectionBuilder,
    Dialer,
    DispatchMode,
    Dispatcher,
    Envelope,
    Result,
    RpcConfig,
    RpcError,
    Sequence,
    Stream,
};
use pending::{PendingCalls, PendingGuard, Routed};

type Reader = ReadHalf<BoxStream>;
type Writer = WriteHalf<BoxStream>;

/// Bidirectional RPC endpoint.
///
/// Cheap to clone; all clones share the same stream, pending table and
/// state.
///
/// # Example
///
/// ```no_run
/// use framed_rpc::{Connection, RpcConfig};
/// use std::time::Duration;
/// use tokio::net::TcpStream;
///
/// # async fn example() -> framed_rpc::Result<()> {
/// let conn = Connection::with_dialer(
///     || TcpStream::connect("127.0.0.1:8888"),
///     RpcConfig::default().with_reconnect(Duration::from_secs(3)),
/// );
/// conn.start()?;
/// conn.wait_online(Duration::from_secs(5)).await?;
///
/// let sum: i64 = conn.request("add", &(1, 2)).await?;
/// assert_eq!(sum, 3);
/// conn.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    config: RpcConfig,
    dialer: Option<Arc<dyn Dialer>>,

    // Read half of an accepted stream, consumed by the first run iteration.
    reader: Mutex<Option<Reader>>,

    // The single write lock; `None` while no stream is live.
    writer: AsyncMutex<Option<Writer>>,
    addrs: Mutex<Addrs>,

    sequence: SequenceCounter,
    pending: Arc<PendingCalls>,

    dispatcher: RwLock<Option<Arc<Dispatcher>>>,
    hooks: RwLock<Hooks>,
    handler_permits: Option<Arc<Semaphore>>,

    state: watch::Sender<ConnectionState>,
    started: AtomicBool,
    closed: AtomicBool,

    extra: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Addrs {
    remote: Option<SocketAddr>,
    local: Option<SocketAddr>,
}

impl Addrs {
    fn of(stream: &BoxStream) -> Self {
        Self {
            remote: stream.peer_addr(),
            local: stream.local_addr(),
        }
    }
}

impl Inner {
    /// Move to `next` unless already stopped.
    fn set_state(&self, next: ConnectionState) {
        // ---
        self.state.send_if_modified(|current| {
            if current.is_stopped() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

impl Connection {
    // ---

    /// Connection over an already established stream (server role).
    ///
    /// The connection is online immediately, so [`send`](Self::send) works
    /// before [`start`](Self::start). Once the stream ends the connection
    /// stops; it never redials.
    pub fn new<S: Stream>(stream: S, config: RpcConfig) -> Self {
        let stream: BoxStream = Box::new(stream);
        Self::from_parts(config, None, Some(stream), None, Hooks::default())
    }

    /// Connection that dials with `dialer` (client role).
    ///
    /// Nothing happens until [`start`](Self::start).
    pub fn with_dialer(dialer: impl Dialer, config: RpcConfig) -> Self {
        let dialer: Arc<dyn Dialer> = Arc::new(dialer);
        Self::from_parts(config, Some(dialer), None, None, Hooks::default())
    }

    /// Fluent construction, see [`ConnectionBuilder`].
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    pub(crate) fn from_parts(
        config: RpcConfig,
        dialer: Option<Arc<dyn Dialer>>,
        stream: Option<BoxStream>,
        dispatcher: Option<Arc<Dispatcher>>,
        hooks: Hooks,
    ) -> Self {
        // ---
        let (reader, writer, addrs, initial) = match stream {
            Some(stream) => {
                let addrs = Addrs::of(&stream);
                let (reader, writer) = tokio::io::split(stream);
                (Some(reader), Some(writer), addrs, ConnectionState::Connected)
            }
            None => (None, None, Addrs::default(), ConnectionState::Disconnected),
        };

        let handler_permits = match config.dispatch {
            DispatchMode::Unbounded => None,
            DispatchMode::Bounded(n) => Some(Arc::new(Semaphore::new(n.max(1)))),
        };

        let (state, _) = watch::channel(initial);

        Self {
            inner: Arc::new(Inner {
                config,
                dialer,
                reader: Mutex::new(reader),
                writer: AsyncMutex::new(writer),
                addrs: Mutex::new(addrs),
                sequence: SequenceCounter::new(),
                pending: Arc::new(PendingCalls::new()),
                dispatcher: RwLock::new(dispatcher),
                hooks: RwLock::new(hooks),
                handler_permits,
                state,
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                extra: Mutex::new(None),
            }),
        }
    }

    /// Launch the background task that reads frames and (re)dials.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `RpcError::AlreadyStarted` on a second call
    /// - `RpcError::ConnectionClosed` if the connection was already closed
    pub fn start(&self) -> Result<()> {
        // ---
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(RpcError::ConnectionClosed);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(RpcError::AlreadyStarted);
        }

        let conn = self.clone();
        tokio::spawn(async move { conn.run().await });
        Ok(())
    }

    /// Write one envelope as a single frame.
    ///
    /// The envelope is re-encoded with the connection's codec if it was
    /// built for another one.
    ///
    /// # Errors
    ///
    /// - `RpcError::NotConnected` if no stream is live
    /// - `RpcError::Io` if the write fails
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        // ---
        let codec = self.inner.config.codec;
        let bytes = if envelope.codec() == codec {
            envelope.encode()?
        } else {
            envelope.transcode(codec)?.encode()?
        };

        let mut writer = self.inner.writer.lock().await;
        let writer = writer.as_mut().ok_or(RpcError::NotConnected)?;
        write_frame(writer, &bytes).await
    }

    /// Issue a request and wait for the first reply carrying its sequence.
    ///
    /// A zero `timeout` waits until a reply arrives or the connection is
    /// closed. The returned envelope may carry an error status; see
    /// [`Envelope::status`] or use [`request`](Self::request).
    ///
    /// # Errors
    ///
    /// - `RpcError::Offline` if the connection is not online (no sequence
    ///   is consumed)
    /// - `RpcError::Timeout` if no reply arrives within `timeout`
    /// - `RpcError::ConnectionClosed` if the connection is closed meanwhile
    /// - encode and send errors
    pub async fn call<T>(&self, method: &str, request: &T, timeout: Duration) -> Result<Envelope>
    where
        T: Serialize + ?Sized,
    {
        // ---
        if !self.is_online() {
            return Err(RpcError::Offline);
        }

        let sequence = self.inner.sequence.next();
        let envelope =
            Envelope::request(self.inner.config.codec, method, sequence).with_payload(request)?;

        // Registered before the send so a fast reply cannot be missed.
        let rx = self.inner.pending.register_once(sequence);
        let _guard = PendingGuard {
            pending: &self.inner.pending,
            sequence,
        };
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(RpcError::ConnectionClosed);
        }

        self.send(&envelope).await?;
        crate::log_trace!("call {method} {sequence} sent");

        let reply = if timeout.is_zero() {
            rx.await
        } else {
            match tokio::time::timeout(timeout, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    crate::log_debug!("call {method} {sequence} timed out after {timeout:?}");
                    return Err(RpcError::Timeout);
                }
            }
        };

        match reply {
            Ok(reply) => reply,
            Err(_) => Err(RpcError::ConnectionClosed),
        }
    }

    /// Issue a request whose replies are delivered to the returned handle.
    ///
    /// Replies keep flowing until the handle is closed or dropped.
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call), minus the timeout.
    pub async fn call_async<T>(&self, method: &str, request: &T) -> Result<AsyncReply>
    where
        T: Serialize + ?Sized,
    {
        // ---
        if !self.is_online() {
            return Err(RpcError::Offline);
        }

        let sequence = self.inner.sequence.next();
        let envelope =
            Envelope::request(self.inner.config.codec, method, sequence).with_payload(request)?;

        let rx = self
            .inner
            .pending
            .register_stream(sequence, self.inner.config.async_reply_buffer);
        let handle = AsyncReply::new(sequence, rx, self.inner.pending.clone());
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(RpcError::ConnectionClosed);
        }

        // On failure the dropped handle unregisters the sequence.
        self.send(&envelope).await?;
        crate::log_trace!("async call {method} {sequence} sent");
        Ok(handle)
    }

    /// Typed call using the configured request timeout.
    ///
    /// A non-zero reply status becomes the matching error.
    ///
    /// # Errors
    ///
    /// Everything [`call`](Self::call) returns, plus
    /// `RpcError::MethodNotFound`, `RpcError::Internal` and
    /// `RpcError::Remote` for error replies.
    pub async fn request<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        // ---
        let reply = self
            .call(method, request, self.inner.config.request_timeout)
            .await?;
        reply.status()?;
        reply.read_payload()
    }

    /// Stop the connection for good.
    ///
    /// Every pending call fails with `RpcError::ConnectionClosed`, the
    /// stream is shut down and no redial happens. Idempotent.
    pub async fn close(&self) {
        // ---
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.state.send_replace(ConnectionState::Stopped);
        let failed = self.inner.pending.fail_all();

        lock_ignore_poison(&self.inner.reader).take();
        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                crate::log_debug!("stream shutdown failed: {e}");
            }
        }

        crate::log_debug!("connection closed, {failed} pending call(s) failed");
    }

    /// Whether calls are currently accepted.
    pub fn is_online(&self) -> bool {
        self.inner.current_state().is_online()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.current_state()
    }

    /// Wait until the connection is online.
    ///
    /// # Errors
    ///
    /// - `RpcError::Timeout` if it does not come online in time
    /// - `RpcError::ConnectionClosed` if it stops instead
    pub async fn wait_online(&self, timeout: Duration) -> Result<()> {
        // ---
        let mut rx = self.inner.state.subscribe();
        let wait = async {
            rx.wait_for(|s| s.is_online() || s.is_stopped())
                .await
                .map(|s| *s)
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(ConnectionState::Connected)) => Ok(()),
            Ok(_) => Err(RpcError::ConnectionClosed),
            Err(_) => Err(RpcError::Timeout),
        }
    }

    /// Resolve once the connection has stopped.
    pub async fn stopped(&self) {
        let mut rx = self.inner.state.subscribe();
        wait_stopped(&mut rx).await;
    }

    /// Remote address of the current (or last) stream, if it has one.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        lock_ignore_poison(&self.inner.addrs).remote
    }

    /// Local address of the current (or last) stream, if it has one.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock_ignore_poison(&self.inner.addrs).local
    }

    /// Codec used for every outbound envelope.
    pub fn codec(&self) -> Codec {
        self.inner.config.codec
    }

    /// Configuration the connection was built with.
    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    /// Number of calls waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Highest sequence handed out so far (0 before the first call).
    pub fn last_sequence(&self) -> Sequence {
        Sequence::new(self.inner.sequence.current())
    }

    /// Attach an arbitrary application value, replacing any previous one.
    pub fn set_extra<T>(&self, value: T)
    where
        T: Any + Send + Sync,
    {
        *lock_ignore_poison(&self.inner.extra) = Some(Arc::new(value));
    }

    /// The attached value, if one of type `T` is present.
    pub fn extra<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let value = lock_ignore_poison(&self.inner.extra).clone()?;
        value.downcast::<T>().ok()
    }

    /// Install (or replace) the request dispatcher.
    pub fn set_dispatcher(&self, dispatcher: Arc<Dispatcher>) {
        *write_ignore_poison(&self.inner.dispatcher) = Some(dispatcher);
    }

    /// The installed dispatcher.
    pub fn dispatcher(&self) -> Option<Arc<Dispatcher>> {
        read_ignore_poison(&self.inner.dispatcher).clone()
    }

    /// Run `f` on its own task every time a stream is established.
    pub fn on_connect<F, Fut>(&self, f: F)
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        write_ignore_poison(&self.inner.hooks).on_connect = Some(Hooks::connect_hook(f));
    }

    /// Call `f` every time a live stream ends.
    pub fn on_disconnect<F>(&self, f: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        write_ignore_poison(&self.inner.hooks).on_disconnect = Some(Arc::new(f));
    }

    /// Call `f` for dial failures and read loop errors.
    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&RpcError) + Send + Sync + 'static,
    {
        write_ignore_poison(&self.inner.hooks).on_error = Some(Arc::new(f));
    }

    // --- background task

    async fn run(self) {
        // ---
        let inner = &self.inner;
        let mut stop = inner.state.subscribe();
        let mut failures: u32 = 0;

        crate::log_debug!("connection task started");

        loop {
            let accepted = lock_ignore_poison(&inner.reader).take();
            let reader = match accepted {
                Some(reader) => reader,
                None => {
                    let Some(dialer) = inner.dialer.clone() else {
                        break;
                    };

                    inner.set_state(ConnectionState::Connecting);
                    let dialed = tokio::select! {
                        dialed = dialer.dial() => dialed,
                        _ = wait_stopped(&mut stop) => break,
                    };

                    match dialed {
                        Ok(stream) => match self.install(stream).await {
                            Some(reader) => {
                                failures = 0;
                                reader
                            }
                            None => break,
                        },
                        Err(e) => {
                            let err = RpcError::Dial(e);
                            crate::log_warn!("{err}");
                            self.report(&err);

                            if !inner.config.reconnect {
                                break;
                            }
                            inner.set_state(ConnectionState::Disconnected);

                            let delay = inner.config.reconnect_policy.delay(failures);
                            failures = failures.saturating_add(1);
                            crate::log_debug!("redialing in {delay:?} (attempt {failures})");
                            if !sleep_unless_stopped(delay, &mut stop).await {
                                break;
                            }
                            continue;
                        }
                    }
                }
            };

            crate::log_info!(
                "connected, remote {}",
                self.remote_addr()
                    .map_or_else(|| "<unknown>".to_string(), |a| a.to_string())
            );
            self.fire_connect();

            let outcome = tokio::select! {
                outcome = self.read_loop(reader) => outcome,
                _ = wait_stopped(&mut stop) => Ok(()),
            };
            if let Err(e) = outcome {
                crate::log_warn!("read loop ended: {e}");
                self.report(&e);
            }

            self.uninstall().await;
            inner.set_state(ConnectionState::Disconnected);
            crate::log_info!("disconnected");
            self.fire_disconnect();

            if inner.dialer.is_none() || inner.current_state().is_stopped() {
                break;
            }

            let delay = inner.config.reconnect_policy.delay(0);
            if !sleep_unless_stopped(delay, &mut stop).await {
                break;
            }
        }

        self.close().await;
        crate::log_debug!("connection task stopped");
    }

    /// Make a freshly dialed stream the live one.
    ///
    /// Returns `None` (dropping the stream) if the connection was closed
    /// while dialing.
    async fn install(&self, stream: BoxStream) -> Option<Reader> {
        // ---
        let addrs = Addrs::of(&stream);
        let (reader, writer) = tokio::io::split(stream);

        let mut slot = self.inner.writer.lock().await;
        if self.inner.closed.load(Ordering::SeqCst) {
            return None;
        }
        *slot = Some(writer);
        drop(slot);

        *lock_ignore_poison(&self.inner.addrs) = addrs;
        self.inner.set_state(ConnectionState::Connected);
        Some(reader)
    }

    async fn uninstall(&self) {
        // ---
        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }
    }

    async fn read_loop(&self, reader: Reader) -> Result<()> {
        // ---
        let codec = self.inner.config.codec;
        let max_frame_size = self.inner.config.max_frame_size;
        let mut reader = BufReader::new(reader);

        loop {
            let body = match read_frame(&mut reader, max_frame_size).await {
                Ok(body) => body,
                Err(RpcError::StreamClosed) => return Ok(()),
                Err(e) => return Err(e),
            };

            let envelope = Envelope::decode(codec, &body)?;
            self.route(envelope);
        }
    }

    fn route(&self, envelope: Envelope) {
        // ---
        if !envelope.is_reply {
            let conn = self.clone();
            tokio::spawn(async move { conn.handle_request(envelope).await });
            return;
        }

        match self.inner.pending.route(envelope) {
            Routed::Delivered => {}
            Routed::Unroutable(envelope) => {
                crate::log_debug!(
                    "dropping reply {} for {}: no pending call",
                    envelope.sequence,
                    envelope.method
                );
            }
        }
    }

    async fn handle_request(self, request: Envelope) {
        // ---
        let _permit = match &self.inner.handler_permits {
            Some(permits) => permits.clone().acquire_owned().await.ok(),
            None => None,
        };

        let dispatcher = self.dispatcher();
        match dispatcher {
            Some(dispatcher) => dispatcher.dispatch(&self, request).await,
            None => {
                crate::log_debug!("no dispatcher installed, rejecting {}", request.method);
                let reply = request.error_reply(
                    status::METHOD_NOT_FOUND,
                    format!("method not found: {}", request.method),
                );
                if let Err(e) = self.send(&reply).await {
                    crate::log_warn!("failed to send reply {}: {e}", reply.sequence);
                }
            }
        }
    }

    fn fire_connect(&self) {
        // ---
        let hook = read_ignore_poison(&self.inner.hooks).on_connect.clone();
        if let Some(hook) = hook {
            tokio::spawn(hook(self.clone()));
        }
    }

    fn fire_disconnect(&self) {
        // ---
        let hook = read_ignore_poison(&self.inner.hooks).on_disconnect.clone();
        if let Some(hook) = hook {
            hook(self);
        }
    }

    fn report(&self, err: &RpcError) {
        // ---
        let hook = read_ignore_poison(&self.inner.hooks).on_error.clone();
        if let Some(hook) = hook {
            hook(err);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("codec", &self.codec())
            .field("remote_addr", &self.remote_addr())
            .field("pending_calls", &self.pending_calls())
            .finish_non_exhaustive()
    }
}

async fn wait_stopped(rx: &mut watch::Receiver<ConnectionState>) {
    let _ = rx.wait_for(|s| s.is_stopped()).await;
}

/// Sleep for `delay`; `false` if the connection stopped first.
async fn sleep_unless_stopped(delay: Duration, stop: &mut watch::Receiver<ConnectionState>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = wait_stopped(stop) => false,
    }
}
