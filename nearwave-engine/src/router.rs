//! The single consumer of the transport event stream.
//!
//! Every transport event funnels through one task, so the lifecycle
//! tables observe events in transport order and inbound payloads keep
//! their per-endpoint order. Anything that waits on user code
//! (authentication validators) is spawned off the loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use nearwave_core::candidate::{CandidateEvent, ConnectionCandidate};
use nearwave_core::error::NearbyError;
use nearwave_core::transport::TransportEvent;

use crate::connection::Connection;
use crate::engine::EngineShared;

pub(crate) async fn run(shared: Arc<EngineShared>, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        handle_event(&shared, event).await;
    }
    info!("Transport event stream closed, router exiting");
}

async fn handle_event(shared: &Arc<EngineShared>, event: TransportEvent) {
    match event {
        TransportEvent::EndpointFound { endpoint, name } => {
            on_endpoint_found(shared, endpoint, name);
        }
        TransportEvent::EndpointLost { endpoint } => {
            on_endpoint_lost(shared, &endpoint);
        }
        TransportEvent::ConnectionInitiated {
            endpoint,
            name,
            is_incoming,
            auth_digits,
        } => {
            on_connection_initiated(shared, endpoint, name, is_incoming, auth_digits);
        }
        TransportEvent::ConnectionResult {
            endpoint,
            success,
            message,
        } => {
            on_connection_result(shared, &endpoint, success, &message);
        }
        TransportEvent::Disconnected { endpoint } => {
            on_disconnected(shared, &endpoint);
        }
        TransportEvent::PayloadReceived { endpoint, payload } => {
            // Forwarded inline: a detached task per payload would race
            // payloads for the same endpoint against each other and
            // reorder the connection's inbound stream.
            shared.active.forward(&endpoint, payload).await;
        }
    }
}

fn on_endpoint_found(shared: &Arc<EngineShared>, endpoint: String, name: String) {
    let candidate = ConnectionCandidate::outgoing(endpoint, name);
    if shared.candidates.upsert_if_absent(candidate.clone()) {
        info!(endpoint = %candidate.id, name = %candidate.name, "Endpoint discovered");
        shared.publish(CandidateEvent::Discovered(candidate));
    } else {
        debug!(endpoint = %candidate.id, "Duplicate discovery suppressed");
    }
}

fn on_endpoint_lost(shared: &Arc<EngineShared>, endpoint: &str) {
    shared.auth.clear(endpoint);
    if let Some(candidate) = shared.candidates.remove(endpoint) {
        info!(endpoint = %endpoint, "Endpoint lost");
        shared.publish(CandidateEvent::Lost(candidate));
    } else {
        debug!(endpoint = %endpoint, "Lost event for unknown endpoint");
    }
}

fn on_connection_initiated(
    shared: &Arc<EngineShared>,
    endpoint: String,
    name: String,
    is_incoming: bool,
    auth_digits: String,
) {
    if !shared.auth.begin(&endpoint) {
        warn!(endpoint = %endpoint, "Handshake already in progress, ignoring");
        return;
    }

    if is_incoming {
        // An advertiser-side handshake surfaces as a candidate carrying
        // the digits; the caller decides through connect().
        let candidate = ConnectionCandidate::incoming(endpoint, name, auth_digits);
        if shared.candidates.upsert_if_absent(candidate.clone()) {
            info!(endpoint = %candidate.id, "Incoming connection offered");
            shared.publish(CandidateEvent::Discovered(candidate));
        }
        return;
    }

    // Discoverer side: the attempt is already pending; run its validator
    // off the router so an interactive validator cannot stall the stream.
    let Some(validator) = shared.pending.validator_of(&endpoint) else {
        warn!(endpoint = %endpoint, "Handshake without pending attempt, ignoring");
        shared.auth.clear(&endpoint);
        return;
    };

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        if validator.validate(&auth_digits).await {
            if shared.auth.accept(&endpoint) {
                if let Err(e) = shared.transport.accept_connection(&endpoint).await {
                    warn!(endpoint = %endpoint, error = %e, "Accept failed");
                    shared.resolve_pending(&endpoint, Err(NearbyError::Transport(e)));
                }
            }
        } else if shared.auth.reject(&endpoint) {
            shared.transport.reject_connection(&endpoint).await;
            shared.resolve_pending(
                &endpoint,
                Err(NearbyError::AuthenticationRejected {
                    endpoint: endpoint.clone(),
                }),
            );
        }
    });
}

fn on_connection_result(shared: &Arc<EngineShared>, endpoint: &str, success: bool, message: &str) {
    shared.auth.clear(endpoint);

    if success {
        // Promotion: the candidate leaves the pool without a Lost event.
        let name = shared
            .candidates
            .remove(endpoint)
            .map(|c| c.name)
            .or_else(|| shared.pending.remote_name_of(endpoint));
        let Some(name) = name else {
            debug!(endpoint = %endpoint, "Result for unknown endpoint");
            return;
        };
        info!(endpoint = %endpoint, "Connection established");
        let inbound = shared.active.register(endpoint);
        let connection = Connection::new(
            endpoint.to_string(),
            name,
            inbound,
            Arc::clone(shared),
        );
        shared.resolve_pending(endpoint, Ok(connection));
    } else {
        info!(endpoint = %endpoint, reason = %message, "Connection failed");
        if let Some(candidate) = shared.candidates.remove(endpoint) {
            shared.publish(CandidateEvent::Lost(candidate));
        }
        shared.resolve_pending(
            endpoint,
            Err(NearbyError::Transport(anyhow::anyhow!(
                "connection refused: {message}"
            ))),
        );
    }
}

fn on_disconnected(shared: &Arc<EngineShared>, endpoint: &str) {
    shared.auth.clear(endpoint);
    // A disconnect mid-handshake still has an offered candidate around;
    // it leaves the pool the same way a lost endpoint does.
    if let Some(candidate) = shared.candidates.remove(endpoint) {
        shared.publish(CandidateEvent::Lost(candidate));
    }
    if shared.active.unregister_and_close(endpoint) {
        info!(endpoint = %endpoint, "Remote disconnected");
    } else {
        debug!(endpoint = %endpoint, "Disconnect for unknown endpoint");
    }
}
