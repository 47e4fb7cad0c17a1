//! Listens for a shutdown signal broadcast by the owning handle.

use tokio::sync::broadcast;

/// Wraps one subscriber end of the shutdown broadcast channel.
///
/// The reader, writer, and accept loops each hold one of these and select on
/// `recv()` at their park point. The signal fires either explicitly (a
/// `shutdown()` call sends on the channel) or implicitly when the owning
/// handle is dropped and the sender goes with it; both mean "stop".
#[derive(Debug)]
pub(crate) struct Shutdown {
    /// `true` once the signal has been observed.
    is_shutdown: bool,

    /// The channel used to listen for the signal.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub(crate) fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Wait for the shutdown signal. Returns immediately if it was already
    /// observed.
    pub(crate) async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }

        // A lagged or closed channel both mean the signal fired.
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}
