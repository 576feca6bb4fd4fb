//! An in-process transport for demos and end-to-end tests.
//!
//! A [`MemoryHub`] models the radio medium: every attached device gets a
//! [`MemoryTransport`] plus the event stream to hand to its engine.
//! Discovery only sees devices advertising the same service id, handshakes
//! need both sides to accept, and the authentication digits are derived
//! from the device pair so both sides always present the same code.

use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use nearwave_core::device::Strategy;
use nearwave_core::transport::{NearbyTransport, TransportEvent};

const EVENT_BUFFER: usize = 64;

#[derive(Default)]
struct HubState {
    devices: HashMap<String, DeviceState>,
    // Unordered device pairs, stored with the ids sorted.
    handshakes: HashMap<(String, String), Handshake>,
    links: HashSet<(String, String)>,
}

struct DeviceState {
    events: mpsc::Sender<TransportEvent>,
    advertising: Option<Advertising>,
    discovering: Option<String>,
}

struct Advertising {
    name: String,
    service_id: String,
}

#[derive(Default)]
struct Handshake {
    accepted: HashSet<String>,
}

fn pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Four digits both sides of a handshake can verify out of band.
fn auth_digits(a: &str, b: &str) -> String {
    let (lo, hi) = pair(a, b);
    let mut hasher = DefaultHasher::new();
    lo.hash(&mut hasher);
    hi.hash(&mut hasher);
    format!("{:04}", hasher.finish() % 10_000)
}

/// The shared medium connecting [`MemoryTransport`]s.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a device under `id` and returns its transport plus the
    /// event stream to hand to [`Nearby::new`](crate::engine::Nearby::new).
    pub fn attach(&self, id: &str) -> (Arc<MemoryTransport>, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        self.state.lock().unwrap().devices.insert(
            id.to_string(),
            DeviceState {
                events: events_tx,
                advertising: None,
                discovering: None,
            },
        );
        let transport = Arc::new(MemoryTransport {
            id: id.to_string(),
            state: Arc::clone(&self.state),
        });
        (transport, events_rx)
    }
}

/// One device's view of the hub.
pub struct MemoryTransport {
    id: String,
    state: Arc<Mutex<HubState>>,
}

impl MemoryTransport {
    /// Runs `f` under the hub lock, then delivers the events it queued
    /// after the lock is released.
    async fn with_state(&self, f: impl FnOnce(&mut HubState, &mut Outbox) -> anyhow::Result<()>) -> anyhow::Result<()> {
        let mut outbox = Outbox::default();
        {
            let mut state = self.state.lock().unwrap();
            f(&mut state, &mut outbox)?;
        }
        outbox.deliver().await;
        Ok(())
    }
}

#[derive(Default)]
struct Outbox {
    events: Vec<(mpsc::Sender<TransportEvent>, TransportEvent)>,
}

impl Outbox {
    fn push(&mut self, device: &DeviceState, event: TransportEvent) {
        self.events.push((device.events.clone(), event));
    }

    async fn deliver(self) {
        for (sender, event) in self.events {
            // A detached receiver just means that engine is gone.
            if sender.send(event).await.is_err() {
                debug!("Dropped event for detached device");
            }
        }
    }
}

#[async_trait]
impl NearbyTransport for MemoryTransport {
    async fn start_advertising(
        &self,
        name: &str,
        service_id: &str,
        _strategy: Strategy,
    ) -> anyhow::Result<()> {
        self.with_state(|state, outbox| {
            let found = TransportEvent::EndpointFound {
                endpoint: self.id.clone(),
                name: name.to_string(),
            };
            for (id, device) in &state.devices {
                if id != &self.id && device.discovering.as_deref() == Some(service_id) {
                    outbox.push(device, found.clone());
                }
            }
            let device = state
                .devices
                .get_mut(&self.id)
                .ok_or_else(|| anyhow::anyhow!("device detached"))?;
            device.advertising = Some(Advertising {
                name: name.to_string(),
                service_id: service_id.to_string(),
            });
            Ok(())
        })
        .await
    }

    async fn stop_advertising(&self) {
        let _ = self
            .with_state(|state, outbox| {
                let Some(device) = state.devices.get_mut(&self.id) else {
                    return Ok(());
                };
                let Some(advertising) = device.advertising.take() else {
                    return Ok(());
                };
                let lost = TransportEvent::EndpointLost {
                    endpoint: self.id.clone(),
                };
                for (id, other) in &state.devices {
                    if id != &self.id && other.discovering.as_deref() == Some(&*advertising.service_id) {
                        outbox.push(other, lost.clone());
                    }
                }
                Ok(())
            })
            .await;
    }

    async fn start_discovery(&self, service_id: &str, _strategy: Strategy) -> anyhow::Result<()> {
        self.with_state(|state, outbox| {
            let mut found = Vec::new();
            for (id, device) in &state.devices {
                if id == &self.id {
                    continue;
                }
                if let Some(advertising) = &device.advertising {
                    if advertising.service_id == service_id {
                        found.push(TransportEvent::EndpointFound {
                            endpoint: id.clone(),
                            name: advertising.name.clone(),
                        });
                    }
                }
            }
            let device = state
                .devices
                .get_mut(&self.id)
                .ok_or_else(|| anyhow::anyhow!("device detached"))?;
            device.discovering = Some(service_id.to_string());
            for event in found {
                let device = &state.devices[&self.id];
                outbox.push(device, event);
            }
            Ok(())
        })
        .await
    }

    async fn stop_discovery(&self) {
        let _ = self
            .with_state(|state, _outbox| {
                if let Some(device) = state.devices.get_mut(&self.id) {
                    device.discovering = None;
                }
                Ok(())
            })
            .await;
    }

    async fn request_connection(&self, local_name: &str, endpoint: &str) -> anyhow::Result<()> {
        self.with_state(|state, outbox| {
            let remote = state
                .devices
                .get(endpoint)
                .ok_or_else(|| anyhow::anyhow!("unknown endpoint {endpoint}"))?;
            let remote_name = remote
                .advertising
                .as_ref()
                .map(|a| a.name.clone())
                .ok_or_else(|| anyhow::anyhow!("endpoint {endpoint} is not advertising"))?;
            let digits = auth_digits(&self.id, endpoint);

            outbox.push(
                remote,
                TransportEvent::ConnectionInitiated {
                    endpoint: self.id.clone(),
                    name: local_name.to_string(),
                    is_incoming: true,
                    auth_digits: digits.clone(),
                },
            );
            let local = &state.devices[&self.id];
            outbox.push(
                local,
                TransportEvent::ConnectionInitiated {
                    endpoint: endpoint.to_string(),
                    name: remote_name,
                    is_incoming: false,
                    auth_digits: digits,
                },
            );
            state
                .handshakes
                .insert(pair(&self.id, endpoint), Handshake::default());
            Ok(())
        })
        .await
    }

    async fn accept_connection(&self, endpoint: &str) -> anyhow::Result<()> {
        self.with_state(|state, outbox| {
            let key = pair(&self.id, endpoint);
            let handshake = state
                .handshakes
                .get_mut(&key)
                .ok_or_else(|| anyhow::anyhow!("no handshake with {endpoint}"))?;
            handshake.accepted.insert(self.id.clone());
            if handshake.accepted.len() == 2 {
                state.handshakes.remove(&key);
                state.links.insert(key);
                let sides = [
                    (self.id.clone(), endpoint.to_string()),
                    (endpoint.to_string(), self.id.clone()),
                ];
                for (me, peer) in sides {
                    if let Some(device) = state.devices.get(&me) {
                        outbox.push(
                            device,
                            TransportEvent::ConnectionResult {
                                endpoint: peer,
                                success: true,
                                message: "connected".to_string(),
                            },
                        );
                    }
                }
            }
            Ok(())
        })
        .await
    }

    async fn reject_connection(&self, endpoint: &str) {
        let _ = self
            .with_state(|state, outbox| {
                let key = pair(&self.id, endpoint);
                if state.handshakes.remove(&key).is_none() {
                    return Ok(());
                }
                let sides = [
                    (self.id.clone(), endpoint.to_string()),
                    (endpoint.to_string(), self.id.clone()),
                ];
                for (me, peer) in sides {
                    if let Some(device) = state.devices.get(&me) {
                        outbox.push(
                            device,
                            TransportEvent::ConnectionResult {
                                endpoint: peer,
                                success: false,
                                message: "rejected".to_string(),
                            },
                        );
                    }
                }
                Ok(())
            })
            .await;
    }

    async fn disconnect(&self, endpoint: &str) {
        let _ = self
            .with_state(|state, outbox| {
                if !state.links.remove(&pair(&self.id, endpoint)) {
                    return Ok(());
                }
                if let Some(remote) = state.devices.get(endpoint) {
                    outbox.push(
                        remote,
                        TransportEvent::Disconnected {
                            endpoint: self.id.clone(),
                        },
                    );
                }
                Ok(())
            })
            .await;
    }

    async fn send_payload(&self, endpoint: &str, payload: Bytes) -> anyhow::Result<()> {
        self.with_state(|state, outbox| {
            if !state.links.contains(&pair(&self.id, endpoint)) {
                anyhow::bail!("no link with {endpoint}");
            }
            let remote = state
                .devices
                .get(endpoint)
                .ok_or_else(|| anyhow::anyhow!("unknown endpoint {endpoint}"))?;
            outbox.push(
                remote,
                TransportEvent::PayloadReceived {
                    endpoint: self.id.clone(),
                    payload,
                },
            );
            Ok(())
        })
        .await
    }
}
