use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use nearwave_core::error::NearbyError;

use crate::engine::EngineShared;

/// An established, bidirectional connection to a remote endpoint.
///
/// Created only through a successful connect, never directly. Inbound
/// payloads arrive on the connection's stream; the stream completes when
/// the connection is closed, locally or by the remote side. Identity is
/// the endpoint id.
pub struct Connection {
    handle: ConnectionHandle,
    inbound: mpsc::Receiver<Bytes>,
}

impl Connection {
    pub(crate) fn new(
        id: String,
        name: String,
        inbound: mpsc::Receiver<Bytes>,
        shared: Arc<EngineShared>,
    ) -> Self {
        Self {
            handle: ConnectionHandle { id, name, shared },
            inbound,
        }
    }

    /// Endpoint id of the remote device.
    pub fn id(&self) -> &str {
        &self.handle.id
    }

    /// Human-readable name of the remote device.
    pub fn name(&self) -> &str {
        &self.handle.name
    }

    /// Receives the next inbound payload. Returns `None` once the
    /// connection has been closed and all buffered payloads were drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbound.recv().await
    }

    /// Sends `payload` to the remote device.
    pub async fn send_payload(&self, payload: Bytes) -> Result<(), NearbyError> {
        self.handle.send_payload(payload).await
    }

    /// Closes the connection. Idempotent — closing twice, or closing after
    /// a transport disconnect, is a no-op.
    pub async fn close(&self) {
        self.handle.close().await;
    }

    /// Splits into a cloneable command handle and the inbound payload
    /// stream, so sending and receiving can live on different tasks.
    pub fn split(self) -> (ConnectionHandle, mpsc::Receiver<Bytes>) {
        (self.handle, self.inbound)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.handle.id)
            .field("name", &self.handle.name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.handle.id == other.handle.id
    }
}

/// Cloneable sending/closing half of a [`Connection`].
#[derive(Clone)]
pub struct ConnectionHandle {
    id: String,
    name: String,
    shared: Arc<EngineShared>,
}

impl ConnectionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends `payload` to the remote device. Fails with
    /// [`NearbyError::NotConnected`] once the connection is gone.
    pub async fn send_payload(&self, payload: Bytes) -> Result<(), NearbyError> {
        self.shared.send_payload(&self.id, payload).await
    }

    /// Closes the connection. Idempotent.
    pub async fn close(&self) {
        self.shared.close_connection(&self.id).await;
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
