// src/domain/stream.rs

//! Byte-stream collaborator interfaces.
//!
//! The runtime never opens sockets on its own. It consumes:
//!
//! - a [`Stream`]: any ordered, reliable duplex byte stream (TCP, TLS over
//!   TCP, an in-memory pipe, ...) with optional address accessors
//! - a [`Dialer`]: something that can produce a fresh [`Stream`] on demand,
//!   used by client-role connections to (re)connect
//!
//! Concrete implementations live under `src/transport/`.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

/// Duplex byte stream carrying frames.
///
/// Address accessors default to `None` for streams that have no notion of
/// a network address.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Address of the remote end, if any.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Address of the local end, if any.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Type-erased stream owned by a connection.
pub type BoxStream = Box<dyn Stream>;

impl Stream for TcpStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        TcpStream::local_addr(self).ok()
    }
}

impl Stream for DuplexStream {}

impl Stream for BoxStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        (**self).peer_addr()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        (**self).local_addr()
    }
}

/// Produces a new stream each time a client-role connection (re)connects.
///
/// Any `Fn() -> impl Future<Output = io::Result<S>>` with `S: Stream` is a
/// dialer:
///
/// ```no_run
/// use framed_rpc::{Connection, RpcConfig};
/// use tokio::net::TcpStream;
///
/// let conn = Connection::with_dialer(|| TcpStream::connect("127.0.0.1:8888"), RpcConfig::default());
/// ```
///
/// # Notes
///
/// This trait uses `async_trait`; implementors write a normal `async fn`.
#[async_trait::async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Open a new stream.
    async fn dial(&self) -> io::Result<BoxStream>;
}

#[async_trait::async_trait]
impl<F, Fut, S> Dialer for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<S>> + Send,
    S: Stream,
{
    async fn dial(&self) -> io::Result<BoxStream> {
        let stream = (self)().await?;
        Ok(Box::new(stream))
    }
}
