//! Publish/subscribe bus integration.
//!
//! [`Bus`] is the publish primitive the rest of the gateway talks to.
//! [`BusHandler`] holds the connect, disconnect and message callbacks; the
//! concrete client (see [`mqtt`]) drives it from its own task.

pub mod mqtt;

use crate::registration::RegistrationManager;
use crate::registry::{Binding, DeviceInstance};
use crate::state::{PortalAssignment, SharedState};
use crate::telemetry::{Metric, TelemetryPublisher};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error type for bus operations.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Malformed handshake: {0}")]
    Handshake(#[source] serde_json::Error),
    #[error("Publish to '{topic}' failed: {message}")]
    Publish { topic: String, message: String },
    #[error("Subscribe to '{topic}' failed: {message}")]
    Subscribe { topic: String, message: String },
    #[error("Disconnect failed: {0}")]
    Disconnect(String),
}

/// Outbound half of a bus client.
///
/// Both calls only enqueue; they never wait for the broker, so they are safe
/// to make from inside the client's own callback context.
pub trait Bus: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;
    fn subscribe(&self, topic: &str) -> Result<(), BusError>;
}

/// Identity assignment sent by dbus-mqtt-devices on `device/<clientId>/DBus`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub portal_id: String,
    #[serde(default)]
    pub device_instance: BTreeMap<String, DeviceInstance>,
}

impl Handshake {
    pub fn parse(payload: &[u8]) -> Result<Self, BusError> {
        serde_json::from_slice(payload).map_err(BusError::Handshake)
    }
}

/// Callbacks invoked from the bus client's context.
///
/// This is the only writer of the shared gateway state and the registry.
pub struct BusHandler {
    bus: Arc<dyn Bus>,
    registration: RegistrationManager,
    shared: Arc<SharedState>,
    telemetry: TelemetryPublisher,
}

impl BusHandler {
    pub fn new(
        bus: Arc<dyn Bus>,
        registration: RegistrationManager,
        shared: Arc<SharedState>,
    ) -> Self {
        let telemetry = TelemetryPublisher::new(bus.clone());
        Self {
            bus,
            registration,
            shared,
            telemetry,
        }
    }

    /// Connection (re-)established or refused.
    ///
    /// On success the handshake topic is (re-)subscribed and the registration
    /// announced again, so a reconnect looks like a fresh start to the broker.
    pub fn on_connect(&self, accepted: bool, code: impl fmt::Debug) {
        if !accepted {
            info!(code = ?code, "MQTT connection refused");
            return;
        }

        self.shared.set_connected(true);
        info!(code = ?code, "MQTT connected");

        if let Err(e) = self.announce() {
            warn!(error = %e, "Failed to register with broker");
        }
    }

    fn announce(&self) -> Result<(), BusError> {
        self.bus.subscribe(&self.registration.handshake_topic())?;
        let payload = self.registration.announce().to_payload()?;
        self.bus.publish(&self.registration.status_topic(), payload)
    }

    pub fn on_disconnect(&self, reason: impl fmt::Display) {
        if self.shared.status().bus_connected {
            info!(reason = %reason, "MQTT disconnected");
        } else {
            debug!(reason = %reason, "MQTT still disconnected");
        }
        self.shared.set_connected(false);
    }

    pub fn on_message(&self, topic: &str, payload: &[u8]) {
        info!(
            topic = %topic,
            content = %String::from_utf8_lossy(payload),
            "New message"
        );

        if topic != self.registration.handshake_topic() {
            debug!(topic = %topic, "Ignoring message on unexpected topic");
            return;
        }

        if let Err(e) = self.handle_handshake(payload) {
            warn!(error = %e, "Failed to handle handshake");
        }
    }

    /// Apply a handshake and publish `CustomName` for every bound sensor.
    ///
    /// Returns the number of names published. A failed publish skips only
    /// that sensor.
    pub fn handle_handshake(&self, payload: &[u8]) -> Result<usize, BusError> {
        let handshake = Handshake::parse(payload)?;

        // bindings first: whoever sees the portal id must also see them
        for (key, instance) in handshake.device_instance {
            match self.shared.bind_instance(&key, instance.clone()) {
                Ok(Binding::New) => {
                    info!(sensor = %key, instance = %instance, "Device instance assigned")
                }
                Ok(Binding::Unchanged) => {}
                Ok(Binding::Replaced(previous)) => warn!(
                    sensor = %key,
                    previous = %previous,
                    instance = %instance,
                    "Device instance reassigned"
                ),
                Err(e) => warn!(error = %e, "Ignoring device instance"),
            }
        }

        match self.shared.set_portal_id(&handshake.portal_id) {
            PortalAssignment::Assigned => {
                info!(portal_id = %handshake.portal_id, "Portal id assigned")
            }
            PortalAssignment::Unchanged => {}
            PortalAssignment::Conflict { current } => warn!(
                portal_id = %current,
                ignored = %handshake.portal_id,
                "Handshake named a different portal id, keeping the first"
            ),
        }

        let Some(portal_id) = self.shared.status().portal_id else {
            return Ok(0);
        };

        let mut published = 0;
        for sensor in self.shared.registry().all_sensors() {
            let Some(instance) = sensor.bound_instance() else {
                continue;
            };
            match self.telemetry.publish_value(
                &portal_id,
                instance,
                Metric::CustomName,
                &sensor.display_name,
            ) {
                Ok(()) => published += 1,
                Err(e) => warn!(sensor = %sensor.key, error = %e, "Failed to publish name"),
            }
        }
        Ok(published)
    }
}
