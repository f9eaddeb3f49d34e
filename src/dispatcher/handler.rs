//! Request handler abstractions.

use std::future::Future;
use std::marker::PhantomData;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::status;
use crate::{Connection, Envelope, RpcError};

/// Serves one method.
///
/// A handler receives the connection the request arrived on and the
/// request envelope, and resolves to the reply to send back, or `None` for
/// no reply. The dispatcher fixes up the reply's sequence, reply flag and
/// timing, so handlers typically start from [`Envelope::reply`].
///
/// Any `Fn(Connection, Envelope) -> impl Future<Output = Option<Envelope>>`
/// is a handler:
///
/// ```
/// use framed_rpc::{Connection, Dispatcher, Envelope};
///
/// let dispatcher = Dispatcher::new();
/// dispatcher.register("ping", |_conn: Connection, req: Envelope| async move {
///     Some(req.reply())
/// });
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Handle one request.
    fn call(&self, conn: Connection, request: Envelope) -> BoxFuture<'static, Option<Envelope>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Connection, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Envelope>> + Send + 'static,
{
    fn call(&self, conn: Connection, request: Envelope) -> BoxFuture<'static, Option<Envelope>> {
        Box::pin((self)(conn, request))
    }
}

/// Error returned by typed handlers; becomes the reply's status fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("handler error (code {code}): {message}")]
pub struct HandlerError {
    pub code: u8,
    pub message: String,
}

impl HandlerError {
    pub fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error with [`status::STANDARD`].
    pub fn standard(message: impl Into<String>) -> Self {
        Self::new(status::STANDARD, message)
    }
}

impl From<RpcError> for HandlerError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::MethodNotFound => Self::new(status::METHOD_NOT_FOUND, "method is not found"),
            RpcError::Remote { code, message } => Self::new(code, message),
            other => Self::new(status::INTERNAL_ERROR, other.to_string()),
        }
    }
}

/// Adapter turning `Fn(Req) -> Future<Output = Result<Resp, HandlerError>>`
/// into a [`Handler`].
pub(crate) struct Typed<F, Fut, Req, Resp>
where
    F: Fn(Req) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resp, HandlerError>> + Send,
    Req: DeserializeOwned,
    Resp: Serialize,
{
    func: F,
    _phantom: PhantomData<fn(Req, Resp, Fut)>,
}

impl<F, Fut, Req, Resp> Typed<F, Fut, Req, Resp>
where
    F: Fn(Req) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resp, HandlerError>> + Send,
    Req: DeserializeOwned,
    Resp: Serialize,
{
    pub(crate) fn new(func: F) -> Self {
        Self {
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut, Req, Resp> Handler for Typed<F, Fut, Req, Resp>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, HandlerError>> + Send + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    fn call(&self, _conn: Connection, request: Envelope) -> BoxFuture<'static, Option<Envelope>> {
        // Decode request
        let req: Req = match request.read_payload() {
            Ok(r) => r,
            Err(e) => {
                let reply =
                    request.error_reply(status::STANDARD, format!("invalid request payload: {e}"));
                return Box::pin(async move { Some(reply) });
            }
        };

        // Call handler
        let fut = (self.func)(req);

        Box::pin(async move {
            let reply = match fut.await {
                Ok(resp) => request
                    .reply()
                    .with_payload(&resp)
                    .unwrap_or_else(|e| request.error_reply(status::INTERNAL_ERROR, e.to_string())),
                Err(err) => request.error_reply(err.code, err.message),
            };
            Some(reply)
        })
    }
}
