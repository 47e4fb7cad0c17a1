//! Request message type and the process-wide request id factory.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};

// Request ids are unique within the process lifetime, shared by every
// connection. Starts at 1; 0 never appears on a constructed request.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Draw the next request id from the process-wide counter.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// An outgoing or received SRFC request.
///
/// The id is assigned at construction and fixed for the lifetime of the
/// value; clones carry the same id and share the payload. Parameters are an
/// ordered list of `(name, value)` pairs; duplicate names are permitted and
/// order is preserved through serialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    id: u64,
    method: String,
    params: Vec<(String, String)>,
    payload: Bytes,
}

impl Request {
    /// Create a request for `method` with a fresh process-unique id.
    pub fn new(method: impl Into<String>) -> Request {
        Request {
            id: next_request_id(),
            method: method.into(),
            params: Vec::new(),
            payload: Bytes::new(),
        }
    }

    /// Reassemble a request parsed off the wire, keeping the sender's id.
    pub(crate) fn from_parts(
        id: u64,
        method: String,
        params: Vec<(String, String)>,
        payload: Bytes,
    ) -> Request {
        Request {
            id,
            method,
            params,
            payload,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn set_method(&mut self, method: impl Into<String>) {
        self.method = method.into();
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Append a parameter. Names need not be unique.
    pub fn add_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.push((name.into(), value.into()));
    }

    /// Remove the first parameter with the given name. Returns whether a
    /// parameter was removed.
    pub fn remove_param(&mut self, name: &str) -> bool {
        match self.params.iter().position(|(n, _)| n == name) {
            Some(pos) => {
                self.params.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Value of the first parameter with the given name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: Bytes) {
        self.payload = payload;
    }
}
