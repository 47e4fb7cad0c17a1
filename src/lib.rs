//! Symmetric, bidirectional RPC over TCP byte streams, wire protocol SRFCv1.
//!
//! Each peer of an established connection may originate requests and must
//! answer requests addressed to it. A [`Listener`] accepts inbound
//! connections and hands each one to a user callback as a deferred
//! [`Connection`]; a [`Connection`] dials out, dispatches incoming requests
//! to registered handlers, and correlates responses with the requests that
//! are awaiting them.
//!
//! # Examples
//!
//! A server registering an echo method:
//!
//! ```rust,no_run
//! use srfc::{Listener, StatusCode};
//! use std::sync::{Arc, Mutex};
//!
//! # async fn example() -> srfc::Result<()> {
//! let connections = Arc::new(Mutex::new(Vec::new()));
//! let keep = Arc::clone(&connections);
//!
//! let mut listener = Listener::new();
//! listener.add_method("ECHO", |_params, payload| (StatusCode::Ok, payload.clone()));
//! listener.on_connection(move |mut connection| {
//!     // the callback owns the deferred connection; start its reader and
//!     // keep it alive
//!     if connection.invoke_deferred().is_ok() {
//!         keep.lock().unwrap().push(connection);
//!     }
//! });
//! listener.listen("0.0.0.0:7400", false).await?;
//! # Ok(())
//! # }
//! ```
//!
//! A client calling it:
//!
//! ```rust,no_run
//! use srfc::{Connection, Request};
//! use bytes::Bytes;
//!
//! # async fn example() -> srfc::Result<()> {
//! let mut connection = Connection::new();
//! connection.connect("127.0.0.1:7400", false).await?;
//!
//! let mut request = Request::new("ECHO");
//! request.set_payload(Bytes::from_static(b"hello"));
//! let response = connection.send_request(&request)?.await;
//! assert_eq!(response.id(), request.id());
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod frame;
pub mod listener;
pub mod message;
pub mod registry;

mod correlator;
mod shutdown;
mod transport;


// Re-export the main API for easy access
pub use codec::Encodable;
pub use connection::{Connection, ResponseFuture, SendFuture};
pub use error::Error;
pub use frame::{Frame, FrameError};
pub use listener::{ConnectionCallback, Listener};
pub use message::{Request, Response, StatusCode, next_request_id};
pub use registry::{Handler, MethodRegistry};

/// A specialized `Result` type for SRFC operations.
///
/// Defined as a convenience; reader-side failures never appear here (they
/// resolve inside the reader loop, see [`error::Error`]).
pub type Result<T> = std::result::Result<T, Error>;
