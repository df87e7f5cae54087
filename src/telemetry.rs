//! Telemetry topics and value envelopes.
//!
//! Every value goes to `W/<portalId>/temperature/<instanceId>/<metric>` as
//! `{"value": ...}`. Delivery is whatever the bus client provides.

use crate::bus::{Bus, BusError};
use crate::registry::DeviceInstance;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Values the gateway publishes per sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    CustomName,
    Temperature,
    Humidity,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::CustomName => "CustomName",
            Metric::Temperature => "Temperature",
            Metric::Humidity => "Humidity",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    value: T,
}

/// `W/<portalId>/temperature/<instanceId>/<metric>`
pub fn value_topic(portal_id: &str, instance: &DeviceInstance, metric: Metric) -> String {
    format!("W/{portal_id}/temperature/{instance}/{metric}")
}

/// `{"value": <value>}`
pub fn value_payload<T: Serialize>(value: T) -> Result<Vec<u8>, BusError> {
    serde_json::to_vec(&Envelope { value }).map_err(BusError::from)
}

/// Formats telemetry and hands it to the bus.
#[derive(Clone)]
pub struct TelemetryPublisher {
    bus: Arc<dyn Bus>,
}

impl TelemetryPublisher {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    pub fn publish_value<T: Serialize>(
        &self,
        portal_id: &str,
        instance: &DeviceInstance,
        metric: Metric,
        value: T,
    ) -> Result<(), BusError> {
        let topic = value_topic(portal_id, instance, metric);
        let payload = value_payload(value)?;
        debug!(topic = %topic, "Publishing value");
        self.bus.publish(&topic, payload)
    }
}

impl fmt::Debug for TelemetryPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryPublisher").finish_non_exhaustive()
    }
}
