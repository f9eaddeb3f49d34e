#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use framed_rpc::transport::MemoryHub;
use framed_rpc::{Connection, Dispatcher, Envelope, HandlerError, RpcConfig};

pub fn init_logging() {
    // ---
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Poll `cond` until it holds, panicking after two seconds.
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    // ---
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Dispatcher with the methods used across the integration tests.
pub fn math_dispatcher() -> Arc<Dispatcher> {
    // ---
    let dispatcher = Arc::new(Dispatcher::new());

    dispatcher.register_typed("add", |(a, b): (i64, i64)| async move {
        Ok::<_, HandlerError>(a + b)
    });

    dispatcher.register_typed("echo", |s: String| async move { Ok::<_, HandlerError>(s) });

    dispatcher.register("slow", |_conn: Connection, req: Envelope| async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Some(req.reply())
    });

    dispatcher
}

/// A started client/server pair joined through `hub` under `name`.
pub async fn connect_pair(
    hub: &MemoryHub,
    name: &str,
    dispatcher: Arc<Dispatcher>,
    config: RpcConfig,
) -> (Connection, Connection) {
    // ---
    let mut listener = hub.listen(name);

    let client = Connection::with_dialer(hub.dialer(name), config.clone());
    client.start().unwrap();

    let stream = listener.accept().await.expect("listener closed");
    let server = Connection::builder()
        .stream(stream)
        .config(config)
        .dispatcher(dispatcher)
        .build()
        .unwrap();
    server.start().unwrap();

    client.wait_online(Duration::from_secs(2)).await.unwrap();
    (client, server)
}
