/// Reports whether the radio permissions required by the transport are
/// granted. Used purely as a precondition gate before starting an
/// advertise or discovery session.
pub trait PermissionsGate: Send + Sync {
    /// True when every required permission is granted.
    fn has_all_permissions(&self) -> bool;

    /// The permissions that are currently missing. Empty when
    /// [`has_all_permissions`](Self::has_all_permissions) is true.
    fn missing_permissions(&self) -> Vec<String>;
}

/// Gate that reports every permission as granted. The right choice on
/// platforms without a runtime permission model, and in tests.
pub struct AllGranted;

impl PermissionsGate for AllGranted {
    fn has_all_permissions(&self) -> bool {
        true
    }

    fn missing_permissions(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Gate with a fixed list of missing permissions. Mostly useful in tests.
pub struct MissingPermissions(pub Vec<String>);

impl PermissionsGate for MissingPermissions {
    fn has_all_permissions(&self) -> bool {
        self.0.is_empty()
    }

    fn missing_permissions(&self) -> Vec<String> {
        self.0.clone()
    }
}
