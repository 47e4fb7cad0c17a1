// ABOUTME: Listener engine: bind, accept loop, per-connection onboarding
// ABOUTME: Each accepted stream becomes a deferred Connection handed to the user callback

use crate::connection::Connection;
use crate::error::Error;
use crate::message::StatusCode;
use crate::registry::MethodRegistry;
use crate::shutdown::Shutdown;
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, warn};

/// Called once per accepted connection with ownership of a deferred
/// [`Connection`]. The callee must eventually call
/// [`invoke_deferred`](Connection::invoke_deferred) for the reader to start.
pub type ConnectionCallback = Arc<dyn Fn(Connection) + Send + Sync>;

/// Accepts inbound connections and onboards each as a fully configured,
/// deferred [`Connection`].
///
/// Lifecycle mirrors the connection engine: *bound* once a socket is
/// attached, *listening* once the accept loop runs. Handlers registered here
/// are copied into every accepted connection; install them, and the
/// connection callback, before the accept loop starts.
pub struct Listener {
    registry: MethodRegistry,
    callback: Option<ConnectionCallback>,

    /// Bound socket, accept loop not yet started (the deferred phase).
    socket: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
    notify_shutdown: Option<broadcast::Sender<()>>,

    bound: bool,
    listening: Arc<AtomicBool>,
}

impl Listener {
    pub fn new() -> Listener {
        Listener {
            registry: MethodRegistry::new(),
            callback: None,
            socket: None,
            local_addr: None,
            accept_task: None,
            notify_shutdown: None,
            bound: false,
            listening: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bind to `addr` and, unless `deferred`, start the accept loop.
    ///
    /// Fails with `InvalidState` if already bound or listening; call
    /// [`shutdown`](Listener::shutdown) first to change the address.
    pub async fn listen<T: ToSocketAddrs>(&mut self, addr: T, deferred: bool) -> crate::Result<()> {
        if self.is_listening() {
            return Err(Error::invalid_state("already listening"));
        }
        if self.bound {
            return Err(Error::invalid_state("already bound"));
        }
        let socket = TcpListener::bind(addr).await?;
        self.adopt(socket, deferred)
    }

    /// Adopt an already-bound socket. Same semantics as
    /// [`listen`](Listener::listen).
    pub fn adopt(&mut self, socket: TcpListener, deferred: bool) -> crate::Result<()> {
        if self.is_listening() {
            return Err(Error::invalid_state("already listening"));
        }
        if self.bound {
            return Err(Error::invalid_state("already bound"));
        }

        self.local_addr = socket.local_addr().ok();
        self.socket = Some(socket);
        self.bound = true;

        if !deferred {
            self.invoke_deferred()?;
        }
        Ok(())
    }

    /// Start the accept loop on the bound socket.
    pub fn invoke_deferred(&mut self) -> crate::Result<()> {
        if self.is_listening() {
            return Err(Error::invalid_state("already listening"));
        }
        let Some(socket) = self.socket.take() else {
            return Err(Error::invalid_state("not bound; call listen first"));
        };

        let (notify_tx, notify_rx) = broadcast::channel(1);
        self.listening.store(true, Ordering::SeqCst);
        self.accept_task = Some(tokio::spawn(run_accept(
            socket,
            Arc::new(self.registry.clone()),
            self.callback.clone(),
            Shutdown::new(notify_rx),
            Arc::clone(&self.listening),
        )));
        self.notify_shutdown = Some(notify_tx);
        Ok(())
    }

    /// Install the per-connection callback.
    pub fn on_connection<F>(&mut self, callback: F)
    where
        F: Fn(Connection) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
    }

    /// Register a handler copied into every connection accepted from now on.
    pub fn add_method<F>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(&[(String, String)], &Bytes) -> (StatusCode, Bytes) + Send + Sync + 'static,
    {
        self.registry.add_method(method, handler);
    }

    pub fn remove_method(&mut self, method: &str) -> bool {
        self.registry.remove_method(method)
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.registry.has_method(method)
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Address the listener is bound to, once bound. Useful when binding to
    /// port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop listening and release the bound socket. Fails with
    /// `InvalidState` if not bound.
    pub async fn shutdown(&mut self) -> crate::Result<()> {
        if !self.bound {
            return Err(Error::invalid_state("not bound"));
        }

        self.bound = false;
        self.listening.store(false, Ordering::SeqCst);
        self.socket = None;
        self.local_addr = None;
        if let Some(notify) = self.notify_shutdown.take() {
            let _ = notify.send(());
        }
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        Ok(())
    }

    /// Shutdown if bound, then drop the registry and the connection
    /// callback.
    pub async fn reset(&mut self) -> crate::Result<()> {
        if self.bound {
            self.shutdown().await?;
        }
        self.registry.clear();
        self.callback = None;
        Ok(())
    }
}

impl Default for Listener {
    fn default() -> Listener {
        Listener::new()
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("registry", &self.registry)
            .field("local_addr", &self.local_addr)
            .field("bound", &self.bound)
            .field("listening", &self.is_listening())
            .finish()
    }
}

/// The accept loop. Transient accept failures back off exponentially; past
/// 64 seconds the loop gives up and stops listening.
async fn run_accept(
    socket: TcpListener,
    registry: Arc<MethodRegistry>,
    callback: Option<ConnectionCallback>,
    mut shutdown: Shutdown,
    listening: Arc<AtomicBool>,
) {
    let mut backoff = 1;

    while !shutdown.is_shutdown() {
        let stream = tokio::select! {
            _ = shutdown.recv() => return,
            accepted = socket.accept() => match accepted {
                Ok((stream, peer)) => {
                    backoff = 1;
                    debug!(%peer, "connection accepted");
                    stream
                }
                Err(err) => {
                    if backoff > 64 {
                        error!(%err, "accept failed repeatedly, giving up");
                        listening.store(false, Ordering::SeqCst);
                        return;
                    }
                    warn!(%err, backoff, "accept failed, backing off");
                    time::sleep(Duration::from_secs(backoff)).await;
                    backoff *= 2;
                    continue;
                }
            },
        };

        let mut connection = Connection::new();
        connection.install_registry((*registry).clone());
        if let Err(err) = connection.adopt(stream, true) {
            // a freshly constructed connection cannot be connected already
            warn!(%err, "failed to onboard accepted connection");
            continue;
        }

        match &callback {
            Some(callback) => {
                let callback = Arc::clone(callback);
                tokio::spawn(async move { callback(connection) });
            }
            None => debug!("no connection callback installed, dropping accepted connection"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_requires_bound() {
        let mut listener = Listener::new();
        assert!(matches!(
            listener.shutdown().await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn invoke_deferred_requires_bound() {
        let mut listener = Listener::new();
        assert!(matches!(
            listener.invoke_deferred(),
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn deferred_listen_then_invoke() {
        let mut listener = Listener::new();
        listener.listen("127.0.0.1:0", true).await.unwrap();
        assert!(!listener.is_listening());
        assert!(listener.local_addr().is_some());

        assert!(matches!(
            listener.listen("127.0.0.1:0", true).await,
            Err(Error::InvalidState(_))
        ));

        listener.invoke_deferred().unwrap();
        assert!(listener.is_listening());

        listener.shutdown().await.unwrap();
        assert!(!listener.is_listening());
    }

    #[tokio::test]
    async fn rebind_after_shutdown() {
        let mut listener = Listener::new();
        listener.listen("127.0.0.1:0", false).await.unwrap();
        assert!(listener.is_listening());
        listener.shutdown().await.unwrap();
        listener.listen("127.0.0.1:0", false).await.unwrap();
        assert!(listener.is_listening());
        listener.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn reset_clears_registry_and_callback() {
        let mut listener = Listener::new();
        listener.add_method("PING", |_, _| (StatusCode::Ok, Bytes::new()));
        listener.on_connection(|_connection| {});
        listener.reset().await.unwrap();
        assert!(!listener.has_method("PING"));
    }
}
