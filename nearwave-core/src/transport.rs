use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::device::Strategy;

/// Events emitted by the transport's single ordered subscription.
///
/// The transport delivers these in FIFO order per endpoint — for one
/// endpoint the sequence is `ConnectionInitiated → ConnectionResult →
/// Disconnected`; events for different endpoints may interleave
/// arbitrarily. External callbacks only enqueue events onto this channel
/// and never mutate engine state directly.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Discovery found a remote endpoint advertising the service.
    EndpointFound { endpoint: String, name: String },
    /// A previously found endpoint stopped being reachable.
    EndpointLost { endpoint: String },
    /// A connection handshake started. `is_incoming` is true when the
    /// remote party initiated it. The authentication digits are the shared
    /// human-verifiable code for this handshake.
    ConnectionInitiated {
        endpoint: String,
        name: String,
        is_incoming: bool,
        auth_digits: String,
    },
    /// Terminal outcome of a handshake for this endpoint.
    ConnectionResult {
        endpoint: String,
        success: bool,
        message: String,
    },
    /// An established connection went away.
    Disconnected { endpoint: String },
    /// Bytes arrived on an established connection.
    PayloadReceived { endpoint: String, payload: Bytes },
}

/// The radio transport collaborator.
///
/// Implementations own advertising, discovery, the low-level handshake and
/// payload transmission; the engine only sequences and guards the state
/// transitions around these primitives. All methods are callable
/// concurrently from multiple tasks.
#[async_trait]
pub trait NearbyTransport: Send + Sync {
    /// Starts broadcasting local presence under `name` for `service_id`.
    async fn start_advertising(
        &self,
        name: &str,
        service_id: &str,
        strategy: Strategy,
    ) -> anyhow::Result<()>;

    /// Stops broadcasting local presence.
    async fn stop_advertising(&self);

    /// Starts scanning for devices advertising `service_id`.
    async fn start_discovery(&self, service_id: &str, strategy: Strategy) -> anyhow::Result<()>;

    /// Stops scanning.
    async fn stop_discovery(&self);

    /// Initiates an outgoing handshake with `endpoint`, presenting
    /// `local_name` to the remote device.
    async fn request_connection(&self, local_name: &str, endpoint: &str) -> anyhow::Result<()>;

    /// Accepts the local half of a handshake with `endpoint`.
    async fn accept_connection(&self, endpoint: &str) -> anyhow::Result<()>;

    /// Rejects the handshake with `endpoint`. Best-effort: rejection
    /// failures are logged by implementations, not surfaced.
    async fn reject_connection(&self, endpoint: &str);

    /// Tears down the established connection with `endpoint`.
    async fn disconnect(&self, endpoint: &str);

    /// Sends `payload` to `endpoint`, resolving once the transport has
    /// acknowledged it.
    async fn send_payload(&self, endpoint: &str, payload: Bytes) -> anyhow::Result<()>;
}

/// One recorded call on the [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    StartAdvertising {
        name: String,
        service_id: String,
        strategy: Strategy,
    },
    StopAdvertising,
    StartDiscovery {
        service_id: String,
        strategy: Strategy,
    },
    StopDiscovery,
    RequestConnection {
        local_name: String,
        endpoint: String,
    },
    AcceptConnection {
        endpoint: String,
    },
    RejectConnection {
        endpoint: String,
    },
    Disconnect {
        endpoint: String,
    },
    SendPayload {
        endpoint: String,
        payload: Bytes,
    },
}

/// Mock transport for testing: records every call and fails the
/// operations it has been told to fail.
///
/// Tests drive engine behavior by pushing [`TransportEvent`]s into the
/// event channel they hand to the engine; the mock itself never emits
/// events.
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<TransportCall>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the named operation fail from now on. Operation names match
    /// the trait method names, e.g. `"start_advertising"`.
    pub fn fail_on(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    /// Drains and returns the calls recorded so far.
    pub fn take_calls(&self) -> Vec<TransportCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// Counts recorded calls matching `predicate` without draining.
    pub fn count_calls(&self, predicate: impl Fn(&TransportCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn result_for(&self, op: &'static str) -> anyhow::Result<()> {
        if self.failing.lock().unwrap().contains(op) {
            anyhow::bail!("{op} failed (mock)");
        }
        Ok(())
    }
}

#[async_trait]
impl NearbyTransport for MockTransport {
    async fn start_advertising(
        &self,
        name: &str,
        service_id: &str,
        strategy: Strategy,
    ) -> anyhow::Result<()> {
        self.record(TransportCall::StartAdvertising {
            name: name.to_string(),
            service_id: service_id.to_string(),
            strategy,
        });
        self.result_for("start_advertising")
    }

    async fn stop_advertising(&self) {
        self.record(TransportCall::StopAdvertising);
    }

    async fn start_discovery(&self, service_id: &str, strategy: Strategy) -> anyhow::Result<()> {
        self.record(TransportCall::StartDiscovery {
            service_id: service_id.to_string(),
            strategy,
        });
        self.result_for("start_discovery")
    }

    async fn stop_discovery(&self) {
        self.record(TransportCall::StopDiscovery);
    }

    async fn request_connection(&self, local_name: &str, endpoint: &str) -> anyhow::Result<()> {
        self.record(TransportCall::RequestConnection {
            local_name: local_name.to_string(),
            endpoint: endpoint.to_string(),
        });
        self.result_for("request_connection")
    }

    async fn accept_connection(&self, endpoint: &str) -> anyhow::Result<()> {
        self.record(TransportCall::AcceptConnection {
            endpoint: endpoint.to_string(),
        });
        self.result_for("accept_connection")
    }

    async fn reject_connection(&self, endpoint: &str) {
        self.record(TransportCall::RejectConnection {
            endpoint: endpoint.to_string(),
        });
    }

    async fn disconnect(&self, endpoint: &str) {
        self.record(TransportCall::Disconnect {
            endpoint: endpoint.to_string(),
        });
    }

    async fn send_payload(&self, endpoint: &str, payload: Bytes) -> anyhow::Result<()> {
        self.record(TransportCall::SendPayload {
            endpoint: endpoint.to_string(),
            payload,
        });
        self.result_for("send_payload")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Given a mock transport, when calls are made, then they are recorded in order.
    #[tokio::test]
    async fn given_mock_when_called_then_records_in_order() {
        let mock = MockTransport::new();
        mock.start_discovery("svc", Strategy::Cluster).await.unwrap();
        mock.request_connection("Bob", "E1").await.unwrap();
        mock.disconnect("E1").await;

        let calls = mock.take_calls();
        assert_eq!(
            calls,
            vec![
                TransportCall::StartDiscovery {
                    service_id: "svc".into(),
                    strategy: Strategy::Cluster,
                },
                TransportCall::RequestConnection {
                    local_name: "Bob".into(),
                    endpoint: "E1".into(),
                },
                TransportCall::Disconnect {
                    endpoint: "E1".into()
                },
            ]
        );
    }

    /// Given a failing operation, when invoked, then an error is returned but the call is still recorded.
    #[tokio::test]
    async fn given_failing_op_when_invoked_then_errors_and_records() {
        let mock = MockTransport::new();
        mock.fail_on("start_advertising");

        let result = mock.start_advertising("Alice", "svc", Strategy::Star).await;
        assert!(result.is_err());
        assert_eq!(
            mock.count_calls(|c| matches!(c, TransportCall::StartAdvertising { .. })),
            1
        );
    }

    /// Given recorded calls, when taken, then a second take returns nothing.
    #[tokio::test]
    async fn given_taken_calls_when_taken_again_then_empty() {
        let mock = MockTransport::new();
        mock.stop_discovery().await;
        assert_eq!(mock.take_calls().len(), 1);
        assert!(mock.take_calls().is_empty());
    }
}
