use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::debug;

use nearwave_core::auth::AuthValidator;
use nearwave_core::error::NearbyError;

use crate::connection::Connection;

/// An in-flight connect or accept attempt for one endpoint.
///
/// Consumed exactly once — on terminal success, terminal failure, or
/// cancellation. The completion is a oneshot sender, so resolving it a
/// second time is impossible by construction.
pub(crate) struct PendingConnection {
    pub(crate) endpoint: String,
    pub(crate) remote_name: String,
    pub(crate) completion: oneshot::Sender<Result<Connection, NearbyError>>,
    pub(crate) validator: Arc<dyn AuthValidator>,
}

struct Entry {
    token: u64,
    pending: PendingConnection,
}

/// Table of in-flight connection attempts, keyed by endpoint id.
///
/// At most one entry per endpoint at any time. Each insert hands back a
/// [`PendingGuard`] that evicts the entry when the awaiting caller is
/// cancelled, so a later transport event finds no entry and is dropped as
/// stale instead of resuming a dead completion.
#[derive(Default)]
pub(crate) struct PendingConnectionTable {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
    next_token: AtomicU64,
}

impl PendingConnectionTable {
    /// Inserts an attempt for `pending.endpoint`. Fails with
    /// [`NearbyError::DuplicatePending`] when one is already in flight.
    pub(crate) fn insert(&self, pending: PendingConnection) -> Result<PendingGuard, NearbyError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.contains_key(&pending.endpoint) {
            return Err(NearbyError::DuplicatePending {
                endpoint: pending.endpoint.clone(),
            });
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let endpoint = pending.endpoint.clone();
        inner.insert(endpoint.clone(), Entry { token, pending });
        Ok(PendingGuard {
            inner: Arc::clone(&self.inner),
            endpoint,
            token,
        })
    }

    pub(crate) fn remove(&self, endpoint: &str) -> Option<PendingConnection> {
        self.inner
            .lock()
            .unwrap()
            .remove(endpoint)
            .map(|e| e.pending)
    }

    /// The validator of the in-flight attempt for `endpoint`, if any.
    pub(crate) fn validator_of(&self, endpoint: &str) -> Option<Arc<dyn AuthValidator>> {
        self.inner
            .lock()
            .unwrap()
            .get(endpoint)
            .map(|e| Arc::clone(&e.pending.validator))
    }

    /// The remote display name recorded for the in-flight attempt, if any.
    pub(crate) fn remote_name_of(&self, endpoint: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .get(endpoint)
            .map(|e| e.pending.remote_name.clone())
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, endpoint: &str) -> bool {
        self.inner.lock().unwrap().contains_key(endpoint)
    }
}

/// Cancellation hook for one pending entry.
///
/// Dropping the guard evicts the entry it was created for — and only that
/// one: if the entry was already resolved and a fresh attempt for the same
/// endpoint has taken its place, the token comparison leaves the new entry
/// alone.
pub(crate) struct PendingGuard {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
    endpoint: String,
    token: u64,
}

impl std::fmt::Debug for PendingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingGuard")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.get(&self.endpoint).is_some_and(|e| e.token == self.token) {
            inner.remove(&self.endpoint);
            debug!(endpoint = %self.endpoint, "Evicted pending connection on cancellation");
        }
    }
}
