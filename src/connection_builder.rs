//! Connection builder.
//!
//! Provides a fluent API for assembling a [`Connection`] from a stream or a
//! dialer plus configuration, a dispatcher and lifecycle hooks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::connection::Hooks;
use crate::{
    // ---
    BoxStream,
    Codec,
    Connection,
    Dialer,
    DispatchMode,
    Dispatcher,
    ReconnectPolicy,
    Result,
    RpcConfig,
    RpcError,
    Stream,
};

enum Source {
    Stream(BoxStream),
    Dialer(Arc<dyn Dialer>),
}

/// Builder for [`Connection`].
///
/// Exactly one of [`stream`](Self::stream) or [`dialer`](Self::dialer) must
/// be set. Every other setting is optional and defaults to
/// [`RpcConfig::default`].
///
/// # Examples
///
/// ## Client that keeps reconnecting
/// ```no_run
/// use framed_rpc::{Codec, Connection};
/// use std::time::Duration;
/// use tokio::net::TcpStream;
///
/// # async fn example() -> framed_rpc::Result<()> {
/// let conn = Connection::builder()
///     .dialer(|| TcpStream::connect("127.0.0.1:8888"))
///     .codec(Codec::Json)
///     .reconnect(Duration::from_secs(1))
///     .on_connect(|conn| async move {
///         let _ = conn.request::<_, String>("hello", "client").await;
///     })
///     .build()?;
/// conn.start()?;
/// # Ok(())
/// # }
/// ```
///
/// ## Server side of an accepted stream
/// ```no_run
/// use framed_rpc::{Connection, Dispatcher};
/// use std::sync::Arc;
/// use tokio::net::TcpListener;
///
/// # async fn example(dispatcher: Arc<Dispatcher>) -> framed_rpc::Result<()> {
/// let listener = TcpListener::bind("127.0.0.1:8888").await?;
/// let (socket, _) = listener.accept().await?;
/// let conn = Connection::builder()
///     .stream(socket)
///     .dispatcher(dispatcher)
///     .build()?;
/// conn.start()?;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionBuilder {
    // ---
    source: Option<Source>,
    config: RpcConfig,
    dispatcher: Option<Arc<Dispatcher>>,
    hooks: Hooks,
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        // ---
        Self {
            source: None,
            config: RpcConfig::default(),
            dispatcher: None,
            hooks: Hooks::default(),
        }
    }

    /// Use an already established stream (server role).
    pub fn stream(mut self, stream: impl Stream) -> Self {
        self.source = Some(Source::Stream(Box::new(stream)));
        self
    }

    /// Dial with `dialer`, now and after every disconnect (client role).
    pub fn dialer(mut self, dialer: impl Dialer) -> Self {
        self.source = Some(Source::Dialer(Arc::new(dialer)));
        self
    }

    /// Replace the whole configuration.
    ///
    /// Setters called afterwards adjust the replacement.
    pub fn config(mut self, config: RpcConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the codec.
    ///
    /// Default: MessagePack.
    pub fn codec(mut self, codec: Codec) -> Self {
        self.config.codec = codec;
        self
    }

    /// Retry failed dials with a fixed delay.
    ///
    /// Default: a failed dial stops the connection.
    pub fn reconnect(mut self, delay: Duration) -> Self {
        self.config = self.config.with_reconnect(delay);
        self
    }

    /// Retry failed dials, pacing attempts with `policy`.
    pub fn reconnect_policy(mut self, policy: impl ReconnectPolicy) -> Self {
        self.config = self.config.with_reconnect_policy(policy);
        self
    }

    /// Timeout used by [`Connection::request`].
    ///
    /// Default: 30s.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Largest accepted inbound frame.
    ///
    /// Default: 16 MiB.
    pub fn max_frame_size(mut self, max: u32) -> Self {
        self.config.max_frame_size = Some(max);
        self
    }

    /// Handler fan-out strategy.
    ///
    /// Default: [`DispatchMode::Unbounded`].
    pub fn dispatch(mut self, mode: DispatchMode) -> Self {
        self.config.dispatch = mode;
        self
    }

    /// Dispatcher serving inbound requests.
    ///
    /// Default: none; every request gets a method-not-found reply.
    pub fn dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// See [`Connection::on_connect`].
    pub fn on_connect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.on_connect = Some(Hooks::connect_hook(f));
        self
    }

    /// See [`Connection::on_disconnect`].
    pub fn on_disconnect<F>(mut self, f: F) -> Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.hooks.on_disconnect = Some(Arc::new(f));
        self
    }

    /// See [`Connection::on_error`].
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&RpcError) + Send + Sync + 'static,
    {
        self.hooks.on_error = Some(Arc::new(f));
        self
    }

    /// Build the connection (consumes self). It still has to be started.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Config` if neither a stream nor a dialer was set.
    pub fn build(self) -> Result<Connection> {
        // ---
        let (stream, dialer) = match self.source {
            Some(Source::Stream(stream)) => (Some(stream), None),
            Some(Source::Dialer(dialer)) => (None, Some(dialer)),
            None => {
                return Err(RpcError::Config(
                    "a stream or a dialer is required".to_string(),
                ))
            }
        };

        Ok(Connection::from_parts(
            self.config,
            dialer,
            stream,
            self.dispatcher,
            self.hooks,
        ))
    }
}
