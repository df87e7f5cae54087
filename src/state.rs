//! State shared between the bus callbacks and the scan loop.
//!
//! Both the gateway flags and the sensor registry live in `watch` channels.
//! Only the bus callback context writes; the startup synchronizer and the scan
//! loop hold receivers and see each change as a single published snapshot.

use crate::registry::{Binding, DeviceInstance, RegistryError, SensorRegistry};
use tokio::sync::watch;

/// Process-wide connection state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayState {
    pub bus_connected: bool,
    /// Set by the first handshake and never changed afterwards.
    pub portal_id: Option<String>,
}

/// Outcome of [`SharedState::set_portal_id`].
#[derive(Debug, Clone, PartialEq)]
pub enum PortalAssignment {
    Assigned,
    Unchanged,
    /// A later handshake named a different portal; the first one is kept.
    Conflict { current: String },
}

/// Owner of the write side of the gateway's shared state.
#[derive(Debug)]
pub struct SharedState {
    status: watch::Sender<GatewayState>,
    registry: watch::Sender<SensorRegistry>,
}

impl SharedState {
    pub fn new(registry: SensorRegistry) -> Self {
        let (status, _) = watch::channel(GatewayState::default());
        let (registry, _) = watch::channel(registry);
        Self { status, registry }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<GatewayState> {
        self.status.subscribe()
    }

    pub fn subscribe_registry(&self) -> watch::Receiver<SensorRegistry> {
        self.registry.subscribe()
    }

    pub fn status(&self) -> GatewayState {
        self.status.borrow().clone()
    }

    /// A copy of the registry as of now.
    pub fn registry(&self) -> SensorRegistry {
        self.registry.borrow().clone()
    }

    pub fn set_connected(&self, connected: bool) {
        self.status.send_if_modified(|state| {
            let changed = state.bus_connected != connected;
            state.bus_connected = connected;
            changed
        });
    }

    pub fn set_portal_id(&self, portal_id: &str) -> PortalAssignment {
        let mut outcome = PortalAssignment::Assigned;
        self.status.send_if_modified(|state| {
            if let Some(current) = &state.portal_id {
                outcome = if current == portal_id {
                    PortalAssignment::Unchanged
                } else {
                    PortalAssignment::Conflict {
                        current: current.clone(),
                    }
                };
                return false;
            }
            state.portal_id = Some(portal_id.to_string());
            true
        });
        outcome
    }

    pub fn bind_instance(
        &self,
        key: &str,
        instance: DeviceInstance,
    ) -> Result<Binding, RegistryError> {
        let mut outcome = Ok(Binding::Unchanged);
        self.registry.send_if_modified(|registry| {
            outcome = registry.bind_instance(key, instance);
            !matches!(outcome, Ok(Binding::Unchanged) | Err(_))
        });
        outcome
    }
}
