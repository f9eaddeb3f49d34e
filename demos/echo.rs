//! TCP echo server and client in one process.
//!
//! ```text
//! RUST_LOG=framed_rpc=debug cargo run --example echo
//! ```

use std::sync::Arc;
use std::time::Duration;

use framed_rpc::transport::{RpcListener, TcpDialer};
use framed_rpc::{Codec, Connection, Dispatcher, HandlerError, Result, RpcConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Greeting {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Reply {
    message: String,
    length: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.register_typed("greet", |req: Greeting| async move {
        if req.name.is_empty() {
            return Err(HandlerError::standard("name must not be empty"));
        }
        Ok(Reply {
            length: req.name.len(),
            message: format!("hello, {}", req.name),
        })
    });

    let config = RpcConfig::default()
        .with_codec(Codec::Json)
        .with_reconnect(Duration::from_secs(1));

    let listener = RpcListener::bind("127.0.0.1:0", config.clone(), dispatcher).await?;
    let addr = listener.local_addr()?;
    tokio::spawn(listener.serve());

    let client = Connection::with_dialer(TcpDialer::new(addr.to_string()), config);
    client.start()?;
    client.wait_online(Duration::from_secs(5)).await?;

    for name in ["world", "framed-rpc", ""] {
        let greeting = Greeting {
            name: name.to_string(),
        };
        match client.request::<_, Reply>("greet", &greeting).await {
            Ok(reply) => println!("{} ({} chars)", reply.message, reply.length),
            Err(e) => println!("greet({name:?}) failed: {e}"),
        }
    }

    client.close().await;
    Ok(())
}
