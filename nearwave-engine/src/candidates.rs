use std::collections::HashMap;
use std::sync::Mutex;

use nearwave_core::candidate::ConnectionCandidate;

/// Tracks the currently known connection candidates, deduplicated by
/// endpoint id.
///
/// All mutation happens from the event-router task; caller commands only
/// read. The mutex keeps those reads consistent with router mutation and
/// is never held across an await.
#[derive(Default)]
pub(crate) struct CandidateRegistry {
    inner: Mutex<HashMap<String, ConnectionCandidate>>,
}

impl CandidateRegistry {
    /// Inserts `candidate` unless one with the same id is already
    /// registered. Returns true when inserted.
    pub(crate) fn upsert_if_absent(&self, candidate: ConnectionCandidate) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.contains_key(&candidate.id) {
            return false;
        }
        inner.insert(candidate.id.clone(), candidate);
        true
    }

    pub(crate) fn remove(&self, id: &str) -> Option<ConnectionCandidate> {
        self.inner.lock().unwrap().remove(id)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, id: &str) -> Option<ConnectionCandidate> {
        self.inner.lock().unwrap().get(id).cloned()
    }

    /// Current candidates in unspecified order.
    pub(crate) fn snapshot(&self) -> Vec<ConnectionCandidate> {
        self.inner.lock().unwrap().values().cloned().collect()
    }
}
