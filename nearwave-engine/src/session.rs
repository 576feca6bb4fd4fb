use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use nearwave_core::error::NearbyError;
use nearwave_core::permissions::PermissionsGate;

/// Thread-safe start/stop latch for one session kind (advertise or
/// discovery), guaranteeing at most one active session process-wide.
///
/// Under N concurrent `try_begin` callers exactly one wins; the rest
/// observe [`NearbyError::AlreadyActive`]. Symmetrically, `end` reports
/// true to exactly one of N concurrent callers, so the transport's stop
/// primitive runs exactly once.
pub(crate) struct SessionGuard {
    kind: &'static str,
    active: AtomicBool,
}

impl SessionGuard {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            active: AtomicBool::new(false),
        }
    }

    /// Atomically claims the latch and checks the permissions gate.
    /// On `AlreadyActive` the latch is untouched; on `PermissionsDenied`
    /// it is reset so a later call can retry after the grant.
    pub(crate) fn try_begin(&self, permissions: &dyn PermissionsGate) -> Result<(), NearbyError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(NearbyError::AlreadyActive);
        }
        if !permissions.has_all_permissions() {
            self.active.store(false, Ordering::SeqCst);
            return Err(NearbyError::PermissionsDenied {
                missing: permissions.missing_permissions(),
            });
        }
        Ok(())
    }

    /// Releases the latch after a failed transport start, allowing a
    /// retry.
    pub(crate) fn abort(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Atomically clears the latch. Returns true when the session was
    /// active — the caller must invoke the transport's stop primitive in
    /// exactly that case. Stopping an idle guard is a logged no-op.
    pub(crate) fn end(&self) -> bool {
        let was_active = self.active.swap(false, Ordering::SeqCst);
        if !was_active {
            warn!(session = self.kind, "Stop requested but session is not active");
        }
        was_active
    }

    #[cfg(test)]
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
