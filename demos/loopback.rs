// ABOUTME: Loopback smoke demo: one listener and one client in a single process
// ABOUTME: Registers a PRINT method and performs a round trip over real TCP

//! # Loopback demo
//!
//! Starts a listener on an ephemeral (or chosen) port, connects a client to
//! it, and exchanges a `PRINT` request carrying a `MESSAGE` parameter plus a
//! binary payload.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --example loopback
//! cargo run --example loopback -- --port 7400 --message "hello there" -d
//! ```

use argh::FromArgs;
use bytes::Bytes;
use srfc::{Connection, Listener, Request, StatusCode};
use std::error::Error;
use std::sync::{Arc, Mutex};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

/// Loopback SRFC round trip
#[derive(FromArgs)]
struct CliArgs {
    /// whether or not to enable debugging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// the port to listen on (default: ephemeral)
    #[argh(option)]
    port: Option<u16>,

    /// the message to send (default: "hello, world")
    #[argh(option)]
    message: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: CliArgs = argh::from_env();

    let level = if args.debugging {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let port = args.port.unwrap_or(0);
    let message = args.message.unwrap_or_else(|| "hello, world".to_string());

    // Accepted connections must outlive the callback for their readers to
    // keep running.
    let connections: Arc<Mutex<Vec<Connection>>> = Arc::new(Mutex::new(Vec::new()));
    let keep = Arc::clone(&connections);

    let mut listener = Listener::new();
    listener.add_method("PRINT", |params, payload| {
        for (name, value) in params {
            info!(%name, %value, "parameter received");
        }
        info!(payload_len = payload.len(), "request payload");
        (StatusCode::Ok, payload.clone())
    });
    listener.on_connection(move |mut connection| {
        if connection.invoke_deferred().is_ok() {
            keep.lock().unwrap().push(connection);
        }
    });
    listener.listen(("127.0.0.1", port), false).await?;

    let addr = listener
        .local_addr()
        .ok_or("listener lost its bound address")?;
    info!(%addr, "listening");

    let mut client = Connection::new();
    client.connect(addr, false).await?;

    let mut request = Request::new("PRINT");
    request.add_param("MESSAGE", message.as_str());
    request.set_payload(Bytes::from(message.clone().into_bytes()));

    let response = client.send_request(&request)?.await;
    info!(
        id = response.id(),
        status = ?response.status(),
        echoed = %String::from_utf8_lossy(response.payload()),
        "response received"
    );

    client.shutdown().await?;
    listener.shutdown().await?;
    Ok(())
}
