use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Inbound channel capacity per connection. Backpressure beyond this is
/// applied to the router's payload forwarding.
const INBOUND_BUFFER: usize = 64;

/// Tracks established connections and their inbound byte channels.
///
/// Each registered connection's channel is closed exactly once — by
/// explicit close or by a transport disconnect, whichever comes first; the
/// second is a no-op.
#[derive(Default)]
pub(crate) struct ActiveConnectionTable {
    inner: Mutex<HashMap<String, mpsc::Sender<Bytes>>>,
}

impl ActiveConnectionTable {
    /// Registers a fresh inbound channel for `endpoint` and returns its
    /// receiving half. A leftover entry for the same endpoint is closed
    /// first — connection ids are unique among live entries.
    pub(crate) fn register(&self, endpoint: &str) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        if self
            .inner
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), tx)
            .is_some()
        {
            warn!(endpoint = %endpoint, "Replaced leftover inbound channel");
        }
        rx
    }

    /// Removes the entry for `endpoint`, closing its inbound channel by
    /// dropping the sender. Returns true when an entry existed.
    pub(crate) fn unregister_and_close(&self, endpoint: &str) -> bool {
        let removed = self.inner.lock().unwrap().remove(endpoint).is_some();
        if removed {
            debug!(endpoint = %endpoint, "Closed inbound channel");
        }
        removed
    }

    pub(crate) fn contains(&self, endpoint: &str) -> bool {
        self.inner.lock().unwrap().contains_key(endpoint)
    }

    /// Forwards inbound bytes to the connection's channel. Payloads for
    /// unknown endpoints are dropped with a log line.
    pub(crate) async fn forward(&self, endpoint: &str, payload: Bytes) {
        // Clone the sender out so the lock is not held across the await.
        let sender = self.inner.lock().unwrap().get(endpoint).cloned();
        match sender {
            Some(tx) => {
                if tx.send(payload).await.is_err() {
                    debug!(endpoint = %endpoint, "Inbound channel consumer gone, payload dropped");
                }
            }
            None => {
                debug!(endpoint = %endpoint, "Payload for unknown connection dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Given a registered connection, when forwarding a payload, then the receiver gets it.
    #[tokio::test]
    async fn given_registered_connection_when_forwarding_then_received() {
        let table = ActiveConnectionTable::default();
        let mut rx = table.register("E1");
        table.forward("E1", Bytes::from_static(b"hi")).await;
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"hi"));
    }

    /// Given an unknown endpoint, when forwarding, then the payload is dropped without panic.
    #[tokio::test]
    async fn given_unknown_endpoint_when_forwarding_then_dropped() {
        let table = ActiveConnectionTable::default();
        table.forward("E9", Bytes::from_static(b"hi")).await;
    }

    /// Given a registered connection, when unregistered, then the receiver completes.
    #[tokio::test]
    async fn given_registered_connection_when_unregistered_then_stream_completes() {
        let table = ActiveConnectionTable::default();
        let mut rx = table.register("E1");
        assert!(table.unregister_and_close("E1"));
        assert!(rx.recv().await.is_none());
    }

    /// Given a closed connection, when closing again, then the second close is a no-op.
    #[tokio::test]
    async fn given_closed_connection_when_closing_again_then_noop() {
        let table = ActiveConnectionTable::default();
        let _rx = table.register("E1");
        assert!(table.unregister_and_close("E1"));
        assert!(!table.unregister_and_close("E1"));
    }

    /// Given a replaced registration, when the old receiver is polled, then it completes while
    /// the new one still works.
    #[tokio::test]
    async fn given_replaced_registration_then_old_receiver_completes() {
        let table = ActiveConnectionTable::default();
        let mut old_rx = table.register("E1");
        let mut new_rx = table.register("E1");

        assert!(old_rx.recv().await.is_none());
        table.forward("E1", Bytes::from_static(b"fresh")).await;
        assert_eq!(new_rx.recv().await.unwrap(), Bytes::from_static(b"fresh"));
    }
}
