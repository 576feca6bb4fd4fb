use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

use nearwave_core::auth::{AcceptAll, AuthValidator};
use nearwave_core::candidate::{CandidateEvent, ConnectionCandidate};
use nearwave_core::device::DeviceInfo;
use nearwave_core::error::NearbyError;
use nearwave_core::permissions::PermissionsGate;
use nearwave_core::transport::{NearbyTransport, TransportEvent};

use crate::active::ActiveConnectionTable;
use crate::auth::AuthenticationCoordinator;
use crate::candidates::CandidateRegistry;
use crate::connection::Connection;
use crate::pending::{PendingConnection, PendingConnectionTable, PendingGuard};
use crate::router;
use crate::session::SessionGuard;

/// Broadcast capacity for candidate lifecycle events.
const CANDIDATE_EVENT_BUFFER: usize = 128;

/// State shared between the facade, the event router task and live
/// connection handles.
///
/// Each table is independently synchronized; no handler locks two of them
/// in one critical section, and no lock is held across an await.
pub(crate) struct EngineShared {
    pub(crate) transport: Arc<dyn NearbyTransport>,
    pub(crate) candidates: CandidateRegistry,
    pub(crate) pending: PendingConnectionTable,
    pub(crate) active: ActiveConnectionTable,
    pub(crate) auth: AuthenticationCoordinator,
    candidate_events: broadcast::Sender<CandidateEvent>,
}

impl EngineShared {
    pub(crate) fn new(transport: Arc<dyn NearbyTransport>) -> Arc<Self> {
        let (candidate_events, _) = broadcast::channel(CANDIDATE_EVENT_BUFFER);
        Arc::new(Self {
            transport,
            candidates: CandidateRegistry::default(),
            pending: PendingConnectionTable::default(),
            active: ActiveConnectionTable::default(),
            auth: AuthenticationCoordinator::default(),
            candidate_events,
        })
    }

    /// Publishes a candidate lifecycle event to all current subscribers.
    pub(crate) fn publish(&self, event: CandidateEvent) {
        // No subscribers is fine — events are informational.
        let _ = self.candidate_events.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<CandidateEvent> {
        self.candidate_events.subscribe()
    }

    /// Resolves and removes the pending attempt for `endpoint`. A missing
    /// entry means the attempt was cancelled or never existed; an established
    /// connection that cannot be delivered is torn down so the transport does
    /// not keep a link nobody owns.
    pub(crate) fn resolve_pending(
        self: &Arc<Self>,
        endpoint: &str,
        result: Result<Connection, NearbyError>,
    ) {
        let undelivered = match self.pending.remove(endpoint) {
            Some(entry) => entry.completion.send(result).err(),
            None => {
                debug!(endpoint = %endpoint, "Stale connection event, no pending attempt");
                Some(result)
            }
        };
        if let Some(Ok(_connection)) = undelivered {
            debug!(endpoint = %endpoint, "Established connection has no owner, tearing down");
            let shared = Arc::clone(self);
            let endpoint = endpoint.to_string();
            tokio::spawn(async move {
                shared.close_connection(&endpoint).await;
            });
        }
    }

    pub(crate) async fn send_payload(&self, endpoint: &str, payload: Bytes) -> Result<(), NearbyError> {
        if !self.active.contains(endpoint) {
            return Err(NearbyError::NotConnected {
                endpoint: endpoint.to_string(),
            });
        }
        debug!(endpoint = %endpoint, len = payload.len(), "Sending payload");
        self.transport
            .send_payload(endpoint, payload)
            .await
            .map_err(NearbyError::Transport)
    }

    pub(crate) async fn close_connection(&self, endpoint: &str) {
        if self.active.unregister_and_close(endpoint) {
            info!(endpoint = %endpoint, "Disconnecting");
            self.transport.disconnect(endpoint).await;
        }
    }
}

/// The nearwave engine facade.
///
/// Wires the transport collaborator, the permissions gate and the
/// connection lifecycle tables together by explicit construction — no
/// hidden globals. Dropping the transport-side event sender stops the
/// internal router task.
///
/// All methods are callable concurrently from multiple tasks.
pub struct Nearby {
    shared: Arc<EngineShared>,
    permissions: Arc<dyn PermissionsGate>,
    advertise_guard: SessionGuard,
    discover_guard: SessionGuard,
}

impl Nearby {
    /// Creates the engine and spawns its event router over `events`, the
    /// transport's ordered event subscription.
    pub fn new(
        transport: Arc<dyn NearbyTransport>,
        permissions: Arc<dyn PermissionsGate>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        let shared = EngineShared::new(transport);
        info!("Spawning connection event router");
        tokio::spawn(router::run(Arc::clone(&shared), events));
        Self {
            shared,
            permissions,
            advertise_guard: SessionGuard::new("advertise"),
            discover_guard: SessionGuard::new("discover"),
        }
    }

    /// Starts broadcasting local presence. Returns the candidate event
    /// stream on success.
    ///
    /// # Errors
    ///
    /// `AlreadyActive` when an advertise session is running,
    /// `PermissionsDenied` when the gate reports missing permissions,
    /// `Transport` when the radio layer refuses to start. The session
    /// latch is released on every failure except `AlreadyActive`.
    pub async fn start_advertising(
        &self,
        info: &DeviceInfo,
    ) -> Result<broadcast::Receiver<CandidateEvent>, NearbyError> {
        self.advertise_guard.try_begin(self.permissions.as_ref())?;
        debug!(device = %info.name, service = %info.service_id, "Starting advertising");
        match self
            .shared
            .transport
            .start_advertising(&info.name, &info.service_id, info.strategy)
            .await
        {
            Ok(()) => Ok(self.shared.subscribe()),
            Err(e) => {
                self.advertise_guard.abort();
                Err(NearbyError::Transport(e))
            }
        }
    }

    /// Stops advertising. A no-op when no advertise session is active.
    pub async fn stop_advertising(&self) {
        if self.advertise_guard.end() {
            debug!("Stopping advertising");
            self.shared.transport.stop_advertising().await;
        }
    }

    /// Starts scanning for advertised devices. Returns the candidate
    /// event stream on success.
    ///
    /// # Errors
    ///
    /// Same failure surface as [`start_advertising`](Self::start_advertising).
    pub async fn start_discovery(
        &self,
        info: &DeviceInfo,
    ) -> Result<broadcast::Receiver<CandidateEvent>, NearbyError> {
        self.discover_guard.try_begin(self.permissions.as_ref())?;
        debug!(service = %info.service_id, "Starting discovery");
        match self
            .shared
            .transport
            .start_discovery(&info.service_id, info.strategy)
            .await
        {
            Ok(()) => Ok(self.shared.subscribe()),
            Err(e) => {
                self.discover_guard.abort();
                Err(NearbyError::Transport(e))
            }
        }
    }

    /// Stops discovery. A no-op when no discovery session is active.
    pub async fn stop_discovery(&self) {
        if self.discover_guard.end() {
            debug!("Stopping discovery");
            self.shared.transport.stop_discovery().await;
        }
    }

    /// The currently known candidates, in unspecified order.
    pub fn candidates(&self) -> Vec<ConnectionCandidate> {
        self.shared.candidates.snapshot()
    }

    /// Connects to `candidate`, accepting every authentication handshake.
    pub async fn connect(
        &self,
        candidate: &ConnectionCandidate,
        local_name: &str,
    ) -> Result<Connection, NearbyError> {
        self.connect_with(candidate, local_name, Arc::new(AcceptAll))
            .await
    }

    /// Connects to `candidate`, consulting `validator` with the shared
    /// authentication digits before completing the handshake.
    ///
    /// For an incoming candidate the digits are already known and the
    /// validator runs immediately; declining rejects the handshake without
    /// recording a pending attempt. For an outgoing candidate the attempt
    /// is recorded first and the validator runs once the transport
    /// surfaces the handshake.
    ///
    /// Cancelling the returned future deterministically evicts the
    /// pending attempt, so a later transport event for this endpoint is
    /// dropped as stale.
    pub async fn connect_with(
        &self,
        candidate: &ConnectionCandidate,
        local_name: &str,
        validator: Arc<dyn AuthValidator>,
    ) -> Result<Connection, NearbyError> {
        let endpoint = candidate.id.clone();
        debug!(
            endpoint = %endpoint,
            incoming = candidate.is_incoming,
            "Connecting"
        );

        if candidate.is_incoming {
            let digits = candidate.auth_digits.clone().unwrap_or_default();
            if !validator.validate(&digits).await {
                if self.shared.auth.reject(&endpoint) {
                    self.shared.transport.reject_connection(&endpoint).await;
                    debug!(endpoint = %endpoint, "Incoming connection rejected by validator");
                }
                return Err(NearbyError::AuthenticationRejected { endpoint });
            }

            let (completion, guard) = self.insert_pending(candidate, validator)?;
            if !self.shared.auth.accept(&endpoint) {
                // A previous round already rejected this handshake.
                drop(guard);
                return Err(NearbyError::AuthenticationRejected { endpoint });
            }
            if let Err(e) = self.shared.transport.accept_connection(&endpoint).await {
                drop(guard);
                return Err(NearbyError::Transport(e));
            }
            Self::await_completion(completion, guard).await
        } else {
            let (completion, guard) = self.insert_pending(candidate, validator)?;
            if let Err(e) = self
                .shared
                .transport
                .request_connection(local_name, &endpoint)
                .await
            {
                drop(guard);
                return Err(NearbyError::Transport(e));
            }
            Self::await_completion(completion, guard).await
        }
    }

    fn insert_pending(
        &self,
        candidate: &ConnectionCandidate,
        validator: Arc<dyn AuthValidator>,
    ) -> Result<
        (
            oneshot::Receiver<Result<Connection, NearbyError>>,
            PendingGuard,
        ),
        NearbyError,
    > {
        let (tx, rx) = oneshot::channel();
        let guard = self.shared.pending.insert(PendingConnection {
            endpoint: candidate.id.clone(),
            remote_name: candidate.name.clone(),
            completion: tx,
            validator,
        })?;
        Ok((rx, guard))
    }

    async fn await_completion(
        completion: oneshot::Receiver<Result<Connection, NearbyError>>,
        guard: PendingGuard,
    ) -> Result<Connection, NearbyError> {
        let result = match completion.await {
            Ok(result) => result,
            // The engine dropped the entry without resolving it — only
            // possible when the router stopped underneath us.
            Err(_) => Err(NearbyError::Transport(anyhow::anyhow!(
                "connection attempt abandoned: engine stopped"
            ))),
        };
        // The entry is gone by now; dropping the guard is a no-op. Holding
        // it across the await is what makes cancellation evict the entry.
        drop(guard);
        result
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use nearwave_core::auth::RejectAll;
    use nearwave_core::device::Strategy;
    use nearwave_core::permissions::{AllGranted, MissingPermissions};
    use nearwave_core::transport::{MockTransport, TransportCall};

    use super::*;

    const EVENT_BUFFER: usize = 32;

    /// Helper: an engine over a mock transport, plus the sender the test
    /// uses to play the transport's part.
    fn start_engine() -> (Arc<Nearby>, Arc<MockTransport>, mpsc::Sender<TransportEvent>) {
        start_engine_with(Arc::new(AllGranted))
    }

    fn start_engine_with(
        permissions: Arc<dyn PermissionsGate>,
    ) -> (Arc<Nearby>, Arc<MockTransport>, mpsc::Sender<TransportEvent>) {
        let transport = Arc::new(MockTransport::new());
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let nearby = Arc::new(Nearby::new(Arc::clone(&transport) as _, permissions, events_rx));
        (nearby, transport, events_tx)
    }

    fn test_device() -> DeviceInfo {
        DeviceInfo::new("Alice", "test.svc", Strategy::Star)
    }

    /// Helper: wait for a specific candidate event, with a timeout.
    async fn wait_for_event(
        rx: &mut broadcast::Receiver<CandidateEvent>,
        matches_fn: impl Fn(&CandidateEvent) -> bool,
    ) -> CandidateEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(ev) if matches_fn(&ev) => return ev,
                    Ok(_) => {}
                    Err(e) => panic!("event channel error: {e}"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Helper: wait until a condition on the mock's recorded calls holds.
    async fn wait_until_calls(transport: &MockTransport, check: impl Fn(&MockTransport) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check(transport) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for transport call")
    }

    /// Helper: drive a full outgoing handshake with the first known
    /// candidate to an established connection.
    async fn establish(
        nearby: &Arc<Nearby>,
        transport: &MockTransport,
        events: &mpsc::Sender<TransportEvent>,
    ) -> Connection {
        let candidate = nearby.candidates().remove(0);
        let endpoint = candidate.id.clone();
        let task = tokio::spawn({
            let nearby = Arc::clone(nearby);
            async move { nearby.connect(&candidate, "Alice").await }
        });
        wait_until_calls(transport, |t| {
            t.count_calls(|c| matches!(c, TransportCall::RequestConnection { .. })) == 1
        })
        .await;
        events.send(initiated(&endpoint, false)).await.unwrap();
        wait_until_calls(transport, |t| {
            t.count_calls(|c| matches!(c, TransportCall::AcceptConnection { .. })) == 1
        })
        .await;
        events.send(result_ok(&endpoint)).await.unwrap();
        task.await.unwrap().unwrap()
    }

    fn found(endpoint: &str, name: &str) -> TransportEvent {
        TransportEvent::EndpointFound {
            endpoint: endpoint.into(),
            name: name.into(),
        }
    }

    fn initiated(endpoint: &str, is_incoming: bool) -> TransportEvent {
        TransportEvent::ConnectionInitiated {
            endpoint: endpoint.into(),
            name: "Bob".into(),
            is_incoming,
            auth_digits: "4821".into(),
        }
    }

    fn result_ok(endpoint: &str) -> TransportEvent {
        TransportEvent::ConnectionResult {
            endpoint: endpoint.into(),
            success: true,
            message: "ok".into(),
        }
    }

    fn result_err(endpoint: &str) -> TransportEvent {
        TransportEvent::ConnectionResult {
            endpoint: endpoint.into(),
            success: false,
            message: "refused".into(),
        }
    }

    #[tokio::test]
    async fn when_start_advertising_expect_transport_started() {
        let (nearby, transport, _events) = start_engine();

        nearby.start_advertising(&test_device()).await.unwrap();

        assert_eq!(
            transport.take_calls(),
            vec![TransportCall::StartAdvertising {
                name: "Alice".into(),
                service_id: "test.svc".into(),
                strategy: Strategy::Star,
            }]
        );
    }

    #[tokio::test]
    async fn given_active_session_when_starting_again_expect_already_active() {
        let (nearby, transport, _events) = start_engine();

        nearby.start_discovery(&test_device()).await.unwrap();
        let err = nearby.start_discovery(&test_device()).await.unwrap_err();

        assert!(matches!(err, NearbyError::AlreadyActive));
        assert_eq!(
            transport.count_calls(|c| matches!(c, TransportCall::StartDiscovery { .. })),
            1
        );
    }

    #[tokio::test]
    async fn given_missing_permissions_when_starting_expect_denied() {
        let permissions = MissingPermissions(vec!["BLUETOOTH_SCAN".into()]);
        let (nearby, transport, _events) = start_engine_with(Arc::new(permissions));

        let err = nearby.start_discovery(&test_device()).await.unwrap_err();

        assert!(matches!(err, NearbyError::PermissionsDenied { missing } if missing == ["BLUETOOTH_SCAN"]));
        // The latch must release on denial, so a retry is not AlreadyActive.
        let err = nearby.start_discovery(&test_device()).await.unwrap_err();
        assert!(matches!(err, NearbyError::PermissionsDenied { .. }));
        assert!(transport.take_calls().is_empty());
    }

    #[tokio::test]
    async fn given_transport_failure_when_starting_expect_latch_released() {
        let (nearby, transport, _events) = start_engine();
        transport.fail_on("start_advertising");

        let err = nearby.start_advertising(&test_device()).await.unwrap_err();
        assert!(matches!(err, NearbyError::Transport(_)));

        // Not AlreadyActive: the failed start left no session behind.
        let err = nearby.start_advertising(&test_device()).await.unwrap_err();
        assert!(matches!(err, NearbyError::Transport(_)));
    }

    #[tokio::test]
    async fn given_active_session_when_stopping_twice_expect_one_transport_stop() {
        let (nearby, transport, _events) = start_engine();

        nearby.start_advertising(&test_device()).await.unwrap();
        nearby.stop_advertising().await;
        nearby.stop_advertising().await;

        assert_eq!(
            transport.count_calls(|c| matches!(c, TransportCall::StopAdvertising)),
            1
        );
    }

    #[tokio::test]
    async fn when_stopping_without_session_expect_no_transport_call() {
        let (nearby, transport, _events) = start_engine();
        nearby.stop_discovery().await;
        assert!(transport.take_calls().is_empty());
    }

    #[tokio::test]
    async fn given_duplicate_found_events_expect_one_discovered() {
        let (nearby, _transport, events) = start_engine();
        let mut rx = nearby.start_discovery(&test_device()).await.unwrap();

        events.send(found("E1", "Bob")).await.unwrap();
        events.send(found("E1", "Bob")).await.unwrap();
        events.send(found("E2", "Carol")).await.unwrap();

        let first = wait_for_event(&mut rx, |e| matches!(e, CandidateEvent::Discovered(_))).await;
        assert_eq!(first.candidate().id, "E1");
        // The next Discovered must be E2 — the duplicate E1 was suppressed.
        let second = wait_for_event(&mut rx, |e| matches!(e, CandidateEvent::Discovered(_))).await;
        assert_eq!(second.candidate().id, "E2");
        assert_eq!(nearby.candidates().len(), 2);
    }

    #[tokio::test]
    async fn given_known_candidate_when_lost_expect_lost_once() {
        let (nearby, _transport, events) = start_engine();
        let mut rx = nearby.start_discovery(&test_device()).await.unwrap();

        events.send(found("E1", "Bob")).await.unwrap();
        wait_for_event(&mut rx, |e| matches!(e, CandidateEvent::Discovered(_))).await;

        events
            .send(TransportEvent::EndpointLost { endpoint: "E1".into() })
            .await
            .unwrap();
        events
            .send(TransportEvent::EndpointLost { endpoint: "E1".into() })
            .await
            .unwrap();
        events.send(found("E2", "Carol")).await.unwrap();

        let lost = wait_for_event(&mut rx, |e| matches!(e, CandidateEvent::Lost(_))).await;
        assert_eq!(lost.candidate().id, "E1");
        // The second Lost for E1 must have been dropped, so the next event is
        // E2's Discovered.
        let next = wait_for_event(&mut rx, |e| e.candidate().id == "E2").await;
        assert!(matches!(next, CandidateEvent::Discovered(_)));
        let remaining = nearby.candidates();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "E2");
    }

    #[tokio::test]
    async fn when_outgoing_connect_completes_expect_connection() {
        let (nearby, transport, events) = start_engine();
        let mut rx = nearby.start_discovery(&test_device()).await.unwrap();

        events.send(found("E1", "Bob")).await.unwrap();
        wait_for_event(&mut rx, |e| matches!(e, CandidateEvent::Discovered(_))).await;
        let candidate = nearby.candidates().remove(0);

        let task = tokio::spawn({
            let nearby = Arc::clone(&nearby);
            async move { nearby.connect(&candidate, "Alice").await }
        });

        // Drive the handshake while the connect attempt is in flight.
        wait_until_calls(&transport, |t| {
            t.count_calls(|c| matches!(c, TransportCall::RequestConnection { .. })) == 1
        })
        .await;
        events.send(initiated("E1", false)).await.unwrap();
        wait_until_calls(&transport, |t| {
            t.count_calls(|c| matches!(c, TransportCall::AcceptConnection { .. })) == 1
        })
        .await;
        events.send(result_ok("E1")).await.unwrap();

        let connection = task.await.unwrap().unwrap();
        assert_eq!(connection.id(), "E1");
        assert_eq!(connection.name(), "Bob");
        // Promotion removes the candidate without a Lost event.
        assert!(nearby.candidates().is_empty());
    }

    #[tokio::test]
    async fn given_rejecting_validator_when_connecting_expect_rejected() {
        let (nearby, transport, events) = start_engine();
        let mut rx = nearby.start_discovery(&test_device()).await.unwrap();

        events.send(found("E1", "Bob")).await.unwrap();
        wait_for_event(&mut rx, |e| matches!(e, CandidateEvent::Discovered(_))).await;
        let candidate = nearby.candidates().remove(0);

        let task = tokio::spawn({
            let nearby = Arc::clone(&nearby);
            async move {
                nearby
                    .connect_with(&candidate, "Alice", Arc::new(RejectAll))
                    .await
            }
        });

        wait_until_calls(&transport, |t| {
            t.count_calls(|c| matches!(c, TransportCall::RequestConnection { .. })) == 1
        })
        .await;
        events.send(initiated("E1", false)).await.unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, NearbyError::AuthenticationRejected { endpoint } if endpoint == "E1"));
        wait_until_calls(&transport, |t| {
            t.count_calls(|c| matches!(c, TransportCall::RejectConnection { .. })) == 1
        })
        .await;
    }

    #[tokio::test]
    async fn given_failed_result_when_connecting_expect_error_and_lost() {
        let (nearby, transport, events) = start_engine();
        let mut rx = nearby.start_discovery(&test_device()).await.unwrap();

        events.send(found("E1", "Bob")).await.unwrap();
        wait_for_event(&mut rx, |e| matches!(e, CandidateEvent::Discovered(_))).await;
        let candidate = nearby.candidates().remove(0);

        let task = tokio::spawn({
            let nearby = Arc::clone(&nearby);
            async move { nearby.connect(&candidate, "Alice").await }
        });

        wait_until_calls(&transport, |t| {
            t.count_calls(|c| matches!(c, TransportCall::RequestConnection { .. })) == 1
        })
        .await;
        events.send(result_err("E1")).await.unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, NearbyError::Transport(_)));
        let lost = wait_for_event(&mut rx, |e| matches!(e, CandidateEvent::Lost(_))).await;
        assert_eq!(lost.candidate().id, "E1");
        assert!(nearby.candidates().is_empty());
    }

    #[tokio::test]
    async fn given_duplicate_connect_when_first_pending_expect_duplicate_pending() {
        let (nearby, _transport, events) = start_engine();
        let mut rx = nearby.start_discovery(&test_device()).await.unwrap();

        events.send(found("E1", "Bob")).await.unwrap();
        wait_for_event(&mut rx, |e| matches!(e, CandidateEvent::Discovered(_))).await;
        let candidate = nearby.candidates().remove(0);

        let first = nearby.connect(&candidate, "Alice");
        tokio::pin!(first);
        // Poll the first attempt far enough to register as pending.
        tokio::select! {
            _ = &mut first => panic!("connect resolved without transport events"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }

        let err = nearby.connect(&candidate, "Alice").await.unwrap_err();
        assert!(matches!(err, NearbyError::DuplicatePending { endpoint } if endpoint == "E1"));
    }

    /// Cancelling a connect attempt must evict its pending entry so a late
    /// transport result is treated as stale and the link torn down.
    #[tokio::test]
    async fn given_cancelled_connect_when_late_result_arrives_expect_teardown() {
        let (nearby, transport, events) = start_engine();
        let mut rx = nearby.start_discovery(&test_device()).await.unwrap();

        events.send(found("E1", "Bob")).await.unwrap();
        wait_for_event(&mut rx, |e| matches!(e, CandidateEvent::Discovered(_))).await;
        let candidate = nearby.candidates().remove(0);

        let task = tokio::spawn({
            let nearby = Arc::clone(&nearby);
            async move { nearby.connect(&candidate, "Alice").await }
        });
        wait_until_calls(&transport, |t| {
            t.count_calls(|c| matches!(c, TransportCall::RequestConnection { .. })) == 1
        })
        .await;

        task.abort();
        let _ = task.await;

        // The late success resolves nothing and the engine disconnects the
        // ownerless link.
        events.send(initiated("E1", false)).await.unwrap();
        events.send(result_ok("E1")).await.unwrap();
        wait_until_calls(&transport, |t| {
            t.count_calls(|c| matches!(c, TransportCall::Disconnect { .. })) == 1
        })
        .await;
    }

    #[tokio::test]
    async fn given_incoming_candidate_when_connecting_expect_accept_and_connection() {
        let (nearby, transport, events) = start_engine();
        let mut rx = nearby.start_advertising(&test_device()).await.unwrap();

        events.send(initiated("E1", true)).await.unwrap();
        let offered = wait_for_event(&mut rx, |e| matches!(e, CandidateEvent::Discovered(_))).await;
        let candidate = offered.candidate().clone();
        assert!(candidate.is_incoming);
        assert_eq!(candidate.auth_digits.as_deref(), Some("4821"));

        let task = tokio::spawn({
            let nearby = Arc::clone(&nearby);
            async move { nearby.connect(&candidate, "Alice").await }
        });

        wait_until_calls(&transport, |t| {
            t.count_calls(|c| matches!(c, TransportCall::AcceptConnection { .. })) == 1
        })
        .await;
        events.send(result_ok("E1")).await.unwrap();

        let connection = task.await.unwrap().unwrap();
        assert_eq!(connection.id(), "E1");
        assert!(nearby.candidates().is_empty());
    }

    #[tokio::test]
    async fn given_incoming_candidate_when_validator_declines_expect_reject() {
        let (nearby, transport, events) = start_engine();
        let mut rx = nearby.start_advertising(&test_device()).await.unwrap();

        events.send(initiated("E1", true)).await.unwrap();
        let offered = wait_for_event(&mut rx, |e| matches!(e, CandidateEvent::Discovered(_))).await;
        let candidate = offered.candidate().clone();

        let err = nearby
            .connect_with(&candidate, "Alice", Arc::new(RejectAll))
            .await
            .unwrap_err();

        assert!(matches!(err, NearbyError::AuthenticationRejected { endpoint } if endpoint == "E1"));
        assert_eq!(
            transport.count_calls(|c| matches!(c, TransportCall::RejectConnection { .. })),
            1
        );
        assert_eq!(
            transport.count_calls(|c| matches!(c, TransportCall::AcceptConnection { .. })),
            0
        );
    }

    /// The validator must see the digits the transport reported.
    #[tokio::test]
    async fn when_connecting_expect_validator_sees_auth_digits() {
        use std::sync::Mutex;

        struct DigitRecorder(Mutex<Option<String>>);

        #[async_trait]
        impl AuthValidator for DigitRecorder {
            async fn validate(&self, digits: &str) -> bool {
                *self.0.lock().unwrap() = Some(digits.to_string());
                true
            }
        }

        let (nearby, transport, events) = start_engine();
        let mut rx = nearby.start_advertising(&test_device()).await.unwrap();

        events.send(initiated("E1", true)).await.unwrap();
        let offered = wait_for_event(&mut rx, |e| matches!(e, CandidateEvent::Discovered(_))).await;
        let candidate = offered.candidate().clone();

        let recorder = Arc::new(DigitRecorder(Mutex::new(None)));
        let task = tokio::spawn({
            let nearby = Arc::clone(&nearby);
            let validator = Arc::clone(&recorder) as Arc<dyn AuthValidator>;
            async move { nearby.connect_with(&candidate, "Alice", validator).await }
        });
        wait_until_calls(&transport, |t| {
            t.count_calls(|c| matches!(c, TransportCall::AcceptConnection { .. })) == 1
        })
        .await;
        events.send(result_ok("E1")).await.unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(recorder.0.lock().unwrap().as_deref(), Some("4821"));
    }

    #[tokio::test]
    async fn given_established_connection_when_payload_arrives_expect_recv() {
        let (nearby, transport, events) = start_engine();
        let mut rx = nearby.start_discovery(&test_device()).await.unwrap();

        events.send(found("E1", "Bob")).await.unwrap();
        wait_for_event(&mut rx, |e| matches!(e, CandidateEvent::Discovered(_))).await;
        let mut connection = establish(&nearby, &transport, &events).await;

        events
            .send(TransportEvent::PayloadReceived {
                endpoint: "E1".into(),
                payload: Bytes::from_static(b"hello"),
            })
            .await
            .unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(5), connection.recv())
            .await
            .expect("timed out waiting for payload")
            .expect("stream ended");
        assert_eq!(payload, Bytes::from_static(b"hello"));
    }

    /// A remote that walks away mid-handshake must take its offered
    /// candidate with it, so the pool only ever holds reachable peers.
    #[tokio::test]
    async fn given_incoming_candidate_when_remote_disconnects_expect_lost() {
        let (nearby, _transport, events) = start_engine();
        let mut rx = nearby.start_advertising(&test_device()).await.unwrap();

        events.send(initiated("E1", true)).await.unwrap();
        wait_for_event(&mut rx, |e| matches!(e, CandidateEvent::Discovered(_))).await;

        events
            .send(TransportEvent::Disconnected { endpoint: "E1".into() })
            .await
            .unwrap();

        let lost = wait_for_event(&mut rx, |e| matches!(e, CandidateEvent::Lost(_))).await;
        assert_eq!(lost.candidate().id, "E1");
        assert!(nearby.candidates().is_empty());
    }

    /// A handshake for an endpoint nobody asked to connect to is logged and
    /// dropped; the transport must see neither an accept nor a reject.
    #[tokio::test]
    async fn given_handshake_without_attempt_expect_ignored() {
        let (nearby, transport, events) = start_engine();
        let mut rx = nearby.start_discovery(&test_device()).await.unwrap();

        events.send(initiated("E1", false)).await.unwrap();
        // A later event landing proves the router processed the handshake.
        events.send(found("E2", "Carol")).await.unwrap();
        wait_for_event(&mut rx, |e| e.candidate().id == "E2").await;

        assert_eq!(
            transport.count_calls(|c| {
                matches!(
                    c,
                    TransportCall::AcceptConnection { .. } | TransportCall::RejectConnection { .. }
                )
            }),
            0
        );
    }

    /// Inbound payloads for one connection must arrive in transport order.
    #[tokio::test]
    async fn given_payload_burst_expect_in_order_delivery() {
        let (nearby, transport, events) = start_engine();
        let mut rx = nearby.start_discovery(&test_device()).await.unwrap();

        events.send(found("E1", "Bob")).await.unwrap();
        wait_for_event(&mut rx, |e| matches!(e, CandidateEvent::Discovered(_))).await;
        let mut connection = establish(&nearby, &transport, &events).await;

        let feeder = tokio::spawn({
            let events = events.clone();
            async move {
                for i in 0..200u32 {
                    events
                        .send(TransportEvent::PayloadReceived {
                            endpoint: "E1".into(),
                            payload: Bytes::from(format!("{i:05}")),
                        })
                        .await
                        .unwrap();
                }
            }
        });

        for i in 0..200u32 {
            let payload = tokio::time::timeout(Duration::from_secs(5), connection.recv())
                .await
                .expect("timed out waiting for payload")
                .expect("stream ended");
            assert_eq!(payload, Bytes::from(format!("{i:05}")));
        }
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn given_remote_disconnect_expect_stream_ends_and_state_cleared() {
        let (nearby, transport, events) = start_engine();
        let mut rx = nearby.start_discovery(&test_device()).await.unwrap();

        events.send(found("E1", "Bob")).await.unwrap();
        wait_for_event(&mut rx, |e| matches!(e, CandidateEvent::Discovered(_))).await;
        let mut connection = establish(&nearby, &transport, &events).await;

        events
            .send(TransportEvent::Disconnected { endpoint: "E1".into() })
            .await
            .unwrap();

        let end = tokio::time::timeout(Duration::from_secs(5), connection.recv())
            .await
            .expect("timed out waiting for stream end");
        assert!(end.is_none());
        // Sending after the remote side left fails without a transport call.
        let err = connection
            .send_payload(Bytes::from_static(b"late"))
            .await
            .unwrap_err();
        assert!(matches!(err, NearbyError::NotConnected { .. }));
        assert_eq!(
            transport.count_calls(|c| matches!(c, TransportCall::SendPayload { .. })),
            0
        );
    }
}
