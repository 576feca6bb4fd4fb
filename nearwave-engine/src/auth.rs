use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

/// Per-endpoint authentication decision state.
///
/// Absent from the table means no authentication round has started for the
/// endpoint. `AwaitingDecision` is entered when a validator is running;
/// `Accepted` and `Rejected` are terminal and never revisited — a second
/// authentication event for the same endpoint after resolution is an
/// ignored duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthState {
    AwaitingDecision,
    Accepted,
    Rejected,
}

/// Drives the optional interactive accept/reject decision of a handshake.
#[derive(Default)]
pub(crate) struct AuthenticationCoordinator {
    inner: Mutex<HashMap<String, AuthState>>,
}

impl AuthenticationCoordinator {
    /// Marks the start of an authentication round. Returns false when a
    /// round is already in progress or resolved for this endpoint, in
    /// which case the caller must treat its event as a duplicate.
    pub(crate) fn begin(&self, endpoint: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.get(endpoint) {
            None => {
                inner.insert(endpoint.to_string(), AuthState::AwaitingDecision);
                true
            }
            Some(state) => {
                debug!(endpoint = %endpoint, ?state, "Duplicate authentication round ignored");
                false
            }
        }
    }

    /// Transitions to `Accepted`. Returns false when the endpoint already
    /// reached a terminal state.
    pub(crate) fn accept(&self, endpoint: &str) -> bool {
        self.transition(endpoint, AuthState::Accepted)
    }

    /// Transitions to `Rejected`. Returns false when the endpoint already
    /// reached a terminal state.
    pub(crate) fn reject(&self, endpoint: &str) -> bool {
        self.transition(endpoint, AuthState::Rejected)
    }

    /// Forgets the endpoint's state once its lifecycle ends, so a later
    /// fresh handshake can run a new round.
    pub(crate) fn clear(&self, endpoint: &str) {
        self.inner.lock().unwrap().remove(endpoint);
    }

    fn transition(&self, endpoint: &str, target: AuthState) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.get(endpoint) {
            Some(AuthState::Accepted) | Some(AuthState::Rejected) => {
                debug!(endpoint = %endpoint, "Authentication already resolved, decision ignored");
                false
            }
            _ => {
                inner.insert(endpoint.to_string(), target);
                true
            }
        }
    }
}
