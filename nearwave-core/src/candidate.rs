use std::hash::{Hash, Hasher};

/// A known-but-not-yet-connected remote endpoint.
///
/// Candidates arise either from discovery (`EndpointFound`) or from an
/// incoming connection initiation while advertising. Identity is the
/// endpoint id alone — the name and authentication digits carry no weight
/// in equality or hashing.
#[derive(Debug, Clone)]
pub struct ConnectionCandidate {
    /// Transport-assigned endpoint identifier, stable for the duration of
    /// the discovery/connection session.
    pub id: String,
    /// Human-readable name advertised by the remote device.
    pub name: String,
    /// True when the remote party initiated the connection.
    pub is_incoming: bool,
    /// Short human-verifiable code surfaced during an incoming handshake.
    /// Present exactly when [`is_incoming`](Self::is_incoming) is true.
    pub auth_digits: Option<String>,
}

impl ConnectionCandidate {
    /// A candidate discovered by scanning — the local device would be the
    /// initiator, so no authentication digits are available yet.
    pub fn outgoing(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_incoming: false,
            auth_digits: None,
        }
    }

    /// A candidate created by a remote-initiated handshake, which carries
    /// the shared authentication digits up front.
    pub fn incoming(
        id: impl Into<String>,
        name: impl Into<String>,
        auth_digits: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_incoming: true,
            auth_digits: Some(auth_digits.into()),
        }
    }
}

impl PartialEq for ConnectionCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionCandidate {}

impl Hash for ConnectionCandidate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// The only externally observable notification of candidate lifecycle
/// change, delivered on the broadcast stream returned by the advertise
/// and discovery start calls.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateEvent {
    /// A new candidate became available for connection.
    Discovered(ConnectionCandidate),
    /// A candidate went away: endpoint lost, disconnected, or its
    /// connection attempt failed terminally.
    Lost(ConnectionCandidate),
}

impl CandidateEvent {
    /// The candidate this event refers to.
    pub fn candidate(&self) -> &ConnectionCandidate {
        match self {
            Self::Discovered(c) | Self::Lost(c) => c,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Given two candidates with the same id but different names, when compared, then they are equal.
    #[test]
    fn given_same_id_when_compared_then_equal() {
        let a = ConnectionCandidate::outgoing("E1", "Alice");
        let b = ConnectionCandidate::incoming("E1", "Someone Else", "1234");
        assert_eq!(a, b);
    }

    /// Given two candidates with different ids, when compared, then they differ.
    #[test]
    fn given_different_ids_when_compared_then_not_equal() {
        let a = ConnectionCandidate::outgoing("E1", "Alice");
        let b = ConnectionCandidate::outgoing("E2", "Alice");
        assert_ne!(a, b);
    }

    /// Given an incoming candidate, then digits are present and the flag is set.
    #[test]
    fn given_incoming_candidate_then_digits_present() {
        let c = ConnectionCandidate::incoming("E1", "Alice", "4242");
        assert!(c.is_incoming);
        assert_eq!(c.auth_digits.as_deref(), Some("4242"));
    }

    /// Given an outgoing candidate, then digits are absent and the flag is clear.
    #[test]
    fn given_outgoing_candidate_then_digits_absent() {
        let c = ConnectionCandidate::outgoing("E1", "Alice");
        assert!(!c.is_incoming);
        assert!(c.auth_digits.is_none());
    }

    /// Given a candidate event, when querying the candidate, then the wrapped value is returned.
    #[test]
    fn given_event_when_querying_candidate_then_returns_inner() {
        let c = ConnectionCandidate::outgoing("E1", "Alice");
        assert_eq!(CandidateEvent::Discovered(c.clone()).candidate(), &c);
        assert_eq!(CandidateEvent::Lost(c.clone()).candidate(), &c);
    }
}
