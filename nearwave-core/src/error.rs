use thiserror::Error;

/// Typed failure surface for every engine operation.
///
/// Per-endpoint outcomes are always delivered through the operation's own
/// completion (or the candidate event stream) — nothing is thrown across
/// the event-router boundary. Stale events and duplicate discoveries are
/// logged and dropped inside the router and never reach this type.
#[derive(Debug, Error)]
pub enum NearbyError {
    /// An advertise or discovery session is already active. Recoverable:
    /// the caller may retry after stopping the session.
    #[error("session already active")]
    AlreadyActive,

    /// Required radio permissions are missing. Surfaced to the caller,
    /// never retried internally.
    #[error("permissions not granted: {}", missing.join(", "))]
    PermissionsDenied {
        /// The permissions the gate reported as missing.
        missing: Vec<String>,
    },

    /// The underlying transport reported a failure, surfaced verbatim.
    #[error("transport failure")]
    Transport(#[source] anyhow::Error),

    /// The local or remote authentication validator declined the
    /// handshake. Fatal to the connection attempt, not to the session.
    #[error("authentication rejected for endpoint {endpoint}")]
    AuthenticationRejected { endpoint: String },

    /// A payload was addressed to an endpoint with no established
    /// connection.
    #[error("no established connection to endpoint {endpoint}")]
    NotConnected { endpoint: String },

    /// A connect or accept attempt is already in flight for this endpoint.
    #[error("a connection attempt is already pending for endpoint {endpoint}")]
    DuplicatePending { endpoint: String },
}
