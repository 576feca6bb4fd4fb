use async_trait::async_trait;

/// Capability for deciding whether a connection handshake should proceed.
///
/// The engine calls [`validate`](AuthValidator::validate) with the shared
/// authentication digits surfaced during the handshake. Implementations
/// may suspend — for example while waiting for a user to compare the code
/// on both screens — and the engine tolerates that suspension without
/// stalling events for other endpoints.
#[async_trait]
pub trait AuthValidator: Send + Sync {
    /// Returns true to accept the handshake, false to reject it.
    async fn validate(&self, digits: &str) -> bool;
}

/// Default validator that accepts every handshake.
///
/// Used when no interactive confirmation is wired in.
pub struct AcceptAll;

#[async_trait]
impl AuthValidator for AcceptAll {
    async fn validate(&self, _digits: &str) -> bool {
        true
    }
}

/// Validator that rejects every handshake. Mostly useful in tests.
pub struct RejectAll;

#[async_trait]
impl AuthValidator for RejectAll {
    async fn validate(&self, _digits: &str) -> bool {
        false
    }
}
