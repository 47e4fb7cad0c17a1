// ABOUTME: Method registry mapping request method names to user handlers
// ABOUTME: Mutated only while deferred; the reader takes an immutable snapshot

use crate::message::StatusCode;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A user handler for one registered method.
///
/// Receives the request's parameter list (read-only) and payload, and
/// returns the response status and payload. Handlers run concurrently with
/// each other and with the reader loop, so they must be callable from any
/// worker context. A non-success status still produces a response frame; a
/// panic is translated to `unhandled_exception` by the dispatch pipeline.
pub type Handler = Arc<dyn Fn(&[(String, String)], &Bytes) -> (StatusCode, Bytes) + Send + Sync>;

/// Name → handler map for one endpoint.
///
/// Registration is not synchronized against concurrent dispatch: install
/// handlers before the reader starts (the deferred pattern). A listener
/// clones its registry into every accepted connection.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Handler>,
}

impl MethodRegistry {
    pub fn new() -> MethodRegistry {
        MethodRegistry::default()
    }

    /// Register a handler, replacing any previous handler for the name.
    pub fn add_method<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&[(String, String)], &Bytes) -> (StatusCode, Bytes) + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(handler));
    }

    /// Remove a handler. Returns whether one was registered.
    pub fn remove_method(&mut self, name: &str) -> bool {
        self.methods.remove(name).is_some()
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub(crate) fn get(&self, name: &str) -> Option<Handler> {
        self.methods.get(name).cloned()
    }

    pub fn clear(&mut self) {
        self.methods.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}
