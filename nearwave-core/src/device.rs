/// Connection topology policy, forwarded verbatim to the transport.
///
/// The engine never branches on the strategy — it is pass-through
/// configuration for the radio layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// M-to-N mesh. Lower bandwidth, any peer can connect to any peer.
    Cluster,
    /// 1-to-N hub and spoke. Higher bandwidth; a device is either the hub
    /// or a spoke, never both.
    Star,
    /// 1-to-1. Highest bandwidth, a single connection only.
    PointToPoint,
}

/// Identity and topology configuration for an advertise or discovery
/// session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Human-readable name for this device, shown on remote devices.
    pub name: String,
    /// Identifier that scopes discovery to one application's service.
    /// An arbitrary string, as long as it uniquely identifies the service;
    /// a reverse-domain name is a good default.
    pub service_id: String,
    /// Topology policy forwarded to the transport.
    pub strategy: Strategy,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>, service_id: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            name: name.into(),
            service_id: service_id.into(),
            strategy,
        }
    }
}
