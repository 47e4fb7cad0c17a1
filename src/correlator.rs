// ABOUTME: Matches incoming responses to waiting senders by request id
// ABOUTME: One oneshot channel per outstanding id; disconnect releases everyone

use crate::message::{Response, StatusCode};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Parks request senders until the response with their id arrives or the
/// connection goes down.
///
/// Responses that arrive before anyone subscribed for their id queue up in
/// `arrivals` and are handed over at subscribe time, so a deposit can never
/// be lost to timing. Responses whose id is never claimed accumulate there
/// until `disconnect` clears them.
///
/// The mutex is a plain `std` mutex: it is never held across an await point.
#[derive(Debug, Default)]
pub(crate) struct Correlator {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    connected: bool,
    waiters: HashMap<u64, oneshot::Sender<Response>>,
    arrivals: Vec<Response>,
}

impl Correlator {
    pub(crate) fn new() -> Correlator {
        Correlator::default()
    }

    /// Re-arm after a shutdown → connect cycle.
    pub(crate) fn reconnect(&self) {
        let mut state = self.state.lock().unwrap();
        state.connected = true;
    }

    /// Register interest in the response for `id`.
    ///
    /// The returned receiver resolves with the matching response, or with a
    /// synthetic `connection_error` response if the connection is (or goes)
    /// down first. Multiple concurrent subscriptions for one id are
    /// unsupported; a later one replaces the earlier.
    pub(crate) fn subscribe(&self, id: u64) -> oneshot::Receiver<Response> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().unwrap();

        if let Some(pos) = state.arrivals.iter().position(|r| r.id() == id) {
            let response = state.arrivals.remove(pos);
            let _ = tx.send(response);
        } else if !state.connected {
            let _ = tx.send(Response::with_status(id, StatusCode::ConnectionError));
        } else {
            state.waiters.insert(id, tx);
        }
        rx
    }

    /// Hand a received response to its waiter, or queue it for a subscriber
    /// that has not parked yet. Dropped when disconnected.
    pub(crate) fn deposit(&self, response: Response) {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return;
        }
        match state.waiters.remove(&response.id()) {
            // the waiter may have timed out and dropped its receiver; the
            // response is discarded with it
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => state.arrivals.push(response),
        }
    }

    /// Drop a subscription that no longer has a listener (timeout path).
    pub(crate) fn forget(&self, id: u64) {
        let mut state = self.state.lock().unwrap();
        state.waiters.remove(&id);
    }

    /// Release every waiter with a `connection_error` response carrying its
    /// own id, and discard unclaimed arrivals.
    pub(crate) fn disconnect(&self) {
        let mut state = self.state.lock().unwrap();
        state.connected = false;
        for (id, tx) in state.waiters.drain() {
            let _ = tx.send(Response::with_status(id, StatusCode::ConnectionError));
        }
        state.arrivals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn connected() -> Correlator {
        let correlator = Correlator::new();
        correlator.reconnect();
        correlator
    }

    #[tokio::test]
    async fn subscribe_then_deposit() {
        let correlator = connected();
        let rx = correlator.subscribe(1);
        correlator.deposit(Response::new(1));
        assert_eq!(rx.await.unwrap().id(), 1);
    }

    #[tokio::test]
    async fn deposit_then_subscribe() {
        let correlator = connected();
        let mut early = Response::new(5);
        early.set_payload(Bytes::from_static(b"kept"));
        correlator.deposit(early);

        let resp = correlator.subscribe(5).await.unwrap();
        assert_eq!(resp.id(), 5);
        assert_eq!(resp.payload(), &Bytes::from_static(b"kept"));
    }

    #[tokio::test]
    async fn responses_in_any_permutation_reach_their_senders() {
        let correlator = connected();
        let rx1 = correlator.subscribe(10);
        let rx2 = correlator.subscribe(11);
        let rx3 = correlator.subscribe(12);

        correlator.deposit(Response::with_status(12, StatusCode::NoContent));
        correlator.deposit(Response::with_status(10, StatusCode::Ok));
        correlator.deposit(Response::with_status(11, StatusCode::Forbidden));

        assert_eq!(rx1.await.unwrap().status(), StatusCode::Ok);
        assert_eq!(rx2.await.unwrap().status(), StatusCode::Forbidden);
        assert_eq!(rx3.await.unwrap().status(), StatusCode::NoContent);
    }

    #[tokio::test]
    async fn disconnect_releases_all_waiters() {
        let correlator = connected();
        let rx1 = correlator.subscribe(1);
        let rx2 = correlator.subscribe(2);

        correlator.disconnect();

        let r1 = rx1.await.unwrap();
        let r2 = rx2.await.unwrap();
        assert_eq!(r1.id(), 1);
        assert_eq!(r1.status(), StatusCode::ConnectionError);
        assert_eq!(r2.id(), 2);
        assert_eq!(r2.status(), StatusCode::ConnectionError);
    }

    #[tokio::test]
    async fn subscribe_while_disconnected_resolves_immediately() {
        let correlator = Correlator::new();
        let resp = correlator.subscribe(9).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ConnectionError);
    }

    #[tokio::test]
    async fn unclaimed_arrivals_are_cleared_on_disconnect() {
        let correlator = connected();
        correlator.deposit(Response::new(77));
        correlator.disconnect();
        correlator.reconnect();

        // the queued response from the previous session must not leak into
        // the new one
        let rx = correlator.subscribe(77);
        correlator.disconnect();
        assert_eq!(rx.await.unwrap().status(), StatusCode::ConnectionError);
    }

    #[tokio::test]
    async fn deposits_while_disconnected_are_dropped() {
        let correlator = Correlator::new();
        correlator.deposit(Response::new(3));
        correlator.reconnect();
        let rx = correlator.subscribe(3);
        correlator.disconnect();
        assert_eq!(rx.await.unwrap().status(), StatusCode::ConnectionError);
    }
}
