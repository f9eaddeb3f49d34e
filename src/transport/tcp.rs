// src/transport/tcp.rs

//! TCP collaborators: a reconnect-friendly dialer and an accept loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::{
    // ---
    BoxStream,
    Connection,
    ConnectionBuilder,
    Dialer,
    Dispatcher,
    Result,
    RpcConfig,
    Stream,
};

/// Pause after a failed `accept`, so a persistent error (e.g. out of file
/// descriptors) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Dials a fixed address, resolving it again on every attempt.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    addr: String,
    nodelay: bool,
}

impl TcpDialer {
    /// Dialer for `addr` (`host:port`), with `TCP_NODELAY` on.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            nodelay: true,
        }
    }

    /// Toggle `TCP_NODELAY` on dialed sockets.
    pub fn nodelay(mut self, on: bool) -> Self {
        self.nodelay = on;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait::async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self) -> io::Result<BoxStream> {
        // ---
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(self.nodelay)?;
        crate::log_debug!("dialed {}", self.addr);
        Ok(Box::new(stream))
    }
}

/// Accepts TCP connections and serves each with a shared dispatcher.
///
/// # Example
///
/// ```no_run
/// use framed_rpc::transport::RpcListener;
/// use framed_rpc::{Dispatcher, HandlerError, RpcConfig};
/// use std::sync::Arc;
///
/// # async fn example() -> framed_rpc::Result<()> {
/// let dispatcher = Arc::new(Dispatcher::new());
/// dispatcher.register_typed("echo", |s: String| async move { Ok::<_, HandlerError>(s) });
///
/// let listener = RpcListener::bind("127.0.0.1:8888", RpcConfig::default(), dispatcher).await?;
/// listener.serve().await;
/// # Ok(())
/// # }
/// ```
pub struct RpcListener {
    listener: TcpListener,
    config: RpcConfig,
    dispatcher: Arc<Dispatcher>,
}

impl RpcListener {
    /// Bind to `addr`.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        config: RpcConfig,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self> {
        // ---
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            config,
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one peer and return its started connection.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Io` if accepting fails.
    pub async fn accept(&self) -> Result<Connection> {
        // ---
        let (socket, _) = self.listener.accept().await?;
        tune(&socket);
        serve_peer(socket, &self.config, &self.dispatcher)
    }

    /// Accept peers forever.
    ///
    /// Each peer is served on its own connection task; a peer going away
    /// never affects the others. A failed `accept` is logged and retried
    /// after a short pause.
    pub async fn serve(self) {
        // ---
        let Self {
            listener,
            config,
            dispatcher,
        } = self;

        let incoming = futures::stream::unfold(listener, |listener| async move {
            let accepted = listener.accept().await.map(|(socket, _)| {
                tune(&socket);
                socket
            });
            Some((accepted, listener))
        });
        serve_incoming(incoming, config, dispatcher).await;
    }
}

fn tune(socket: &TcpStream) {
    if let Err(e) = socket.set_nodelay(true) {
        crate::log_warn!("set_nodelay failed: {e}");
    }
}

/// Build and start a server connection for one accepted stream.
fn serve_peer<S: Stream>(
    stream: S,
    config: &RpcConfig,
    dispatcher: &Arc<Dispatcher>,
) -> Result<Connection> {
    // ---
    let conn = ConnectionBuilder::new()
        .stream(stream)
        .config(config.clone())
        .dispatcher(dispatcher.clone())
        .build()?;
    conn.start()?;

    crate::log_info!(
        "accepted {}",
        conn.remote_addr()
            .map_or_else(|| "<unknown>".to_string(), |a| a.to_string())
    );
    Ok(conn)
}

/// Serve every stream `incoming` yields until it ends.
///
/// Errors stay local: a failed accept is logged and paced by
/// [`ACCEPT_BACKOFF`], a peer that cannot be set up is dropped.
async fn serve_incoming<S, I>(incoming: I, config: RpcConfig, dispatcher: Arc<Dispatcher>)
where
    S: Stream,
    I: futures::Stream<Item = io::Result<S>>,
{
    // ---
    futures::pin_mut!(incoming);

    while let Some(accepted) = incoming.next().await {
        match accepted {
            Ok(stream) => {
                if let Err(e) = serve_peer(stream, &config, &dispatcher) {
                    crate::log_warn!("dropping peer: {e}");
                }
            }
            Err(e) => {
                crate::log_warn!("accept failed: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

impl std::fmt::Debug for RpcListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcListener")
            .field("local_addr", &self.listener.local_addr().ok())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::HandlerError;
    use std::time::Duration;

    #[tokio::test]
    async fn test_tcp_round_trip() {
        // ---
        let dispatcher = Arc::new(Dispatcher::new());
        dispatcher.register_typed("upper", |s: String| async move {
            Ok::<_, HandlerError>(s.to_uppercase())
        });

        let listener = RpcListener::bind("127.0.0.1:0", RpcConfig::default(), dispatcher)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { listener.accept().await.unwrap() });

        let client = Connection::with_dialer(TcpDialer::new(addr.to_string()), RpcConfig::default());
        client.start().unwrap();
        client.wait_online(Duration::from_secs(5)).await.unwrap();
        assert_eq!(client.remote_addr(), Some(addr));

        let reply: String = client.request("upper", "abc").await.unwrap();
        assert_eq!(reply, "ABC");

        let server_conn = server.await.unwrap();
        assert_eq!(server_conn.local_addr(), Some(addr));
        client.close().await;
        server_conn.close().await;
    }

    #[tokio::test]
    async fn test_serve_keeps_going_after_accept_errors() {
        // ---
        let dispatcher = Arc::new(Dispatcher::new());
        dispatcher.register_typed("upper", |s: String| async move {
            Ok::<_, HandlerError>(s.to_uppercase())
        });

        let (near, far) = tokio::io::duplex(4096);
        let incoming = futures::stream::iter(vec![
            Err(io::Error::from(io::ErrorKind::ConnectionAborted)),
            Err(io::Error::other("too many open files")),
            Ok(far),
        ])
        .chain(futures::stream::pending());
        let server = tokio::spawn(serve_incoming(incoming, RpcConfig::default(), dispatcher));

        let client = Connection::new(near, RpcConfig::default());
        client.start().unwrap();
        let reply: String = client.request("upper", "abc").await.unwrap();
        assert_eq!(reply, "ABC");

        assert!(!server.is_finished());
        server.abort();
        client.close().await;
    }
}
