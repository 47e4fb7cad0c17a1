// ABOUTME: Public error type for connection and listener operations
// ABOUTME: Lifecycle misuse surfaces as InvalidState, transport failures wrap io::Error

use crate::frame::FrameError;
use std::io;
use thiserror::Error;

/// Error returned by the connection and listener engines.
///
/// Reader-side problems (malformed frames, read failures, peer close) never
/// surface here; they are resolved inside the reader loop and, where a caller
/// is waiting, delivered as a synthetic `connection_error` response. This
/// type covers the caller-facing surface: API misuse and write-path I/O.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O failure while establishing, writing to, or closing a transport.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Structurally invalid frame data.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Operation is not valid in the current lifecycle state, e.g. sending
    /// on an unconnected connection or shutting down an unbound listener.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The connection went down before a queued write was attempted.
    #[error("connection closed")]
    ConnectionClosed,
}

impl Error {
    pub(crate) fn invalid_state(msg: impl Into<String>) -> Error {
        Error::InvalidState(msg.into())
    }
}
