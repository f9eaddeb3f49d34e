//! Lifecycle observers.
//!
//! Hooks are optional and can be replaced at any time. They run on the
//! connection's background task, so they must not block:
//!
//! - `on_connect` is async and spawned on its own task, so it may issue
//!   calls over the fresh connection
//! - `on_disconnect` and `on_error` are plain callbacks

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::{Connection, RpcError};

pub(crate) type ConnectHook = Arc<dyn Fn(Connection) -> BoxFuture<'static, ()> + Send + Sync>;
pub(crate) type DisconnectHook = Arc<dyn Fn(&Connection) + Send + Sync>;
pub(crate) type ErrorHook = Arc<dyn Fn(&RpcError) + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub(crate) on_connect: Option<ConnectHook>,
    pub(crate) on_disconnect: Option<DisconnectHook>,
    pub(crate) on_error: Option<ErrorHook>,
}

impl Hooks {
    pub(crate) fn connect_hook<F, Fut>(f: F) -> ConnectHook
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Arc::new(move |conn| f(conn).boxed())
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
