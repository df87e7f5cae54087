//! Sensor identity registry.
//!
//! The set of sensors is fixed at startup. At runtime the only change is
//! learning each sensor's device instance id from the bus handshake.

use crate::address::{MacAddress, SensorAddress};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Bus-assigned per-sensor identifier, used as the leaf of telemetry topics.
///
/// The handshake may send it as a JSON string or integer; both are kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawInstance", into = "String")]
pub struct DeviceInstance(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInstance {
    Text(String),
    Number(i64),
}

impl From<RawInstance> for DeviceInstance {
    fn from(raw: RawInstance) -> Self {
        match raw {
            RawInstance::Text(s) => DeviceInstance(s),
            RawInstance::Number(n) => DeviceInstance(n.to_string()),
        }
    }
}

impl From<DeviceInstance> for String {
    fn from(instance: DeviceInstance) -> Self {
        instance.0
    }
}

impl From<&str> for DeviceInstance {
    fn from(s: &str) -> Self {
        DeviceInstance(s.to_string())
    }
}

impl DeviceInstance {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Static description of one sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    /// Service key announced to the bus, e.g. `t1`.
    pub key: String,
    pub address: SensorAddress,
    /// Human-readable label published as `CustomName`.
    pub name: String,
}

impl SensorConfig {
    pub fn new(key: impl Into<String>, address: SensorAddress, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            address,
            name: name.into(),
        }
    }
}

/// A sensor and, once known, its device instance id.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub key: String,
    pub address: SensorAddress,
    pub display_name: String,
    pub instance: Option<DeviceInstance>,
}

impl Sensor {
    /// The instance id, but only if this sensor has been bound.
    pub fn bound_instance(&self) -> Option<&DeviceInstance> {
        self.instance.as_ref()
    }
}

/// Outcome of [`SensorRegistry::bind_instance`].
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    New,
    Unchanged,
    Replaced(DeviceInstance),
}

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("duplicate sensor key '{0}'")]
    DuplicateKey(String),
    #[error("address {address} configured for both '{first}' and '{second}'")]
    DuplicateAddress {
        address: SensorAddress,
        first: String,
        second: String,
    },
    #[error("unknown sensor '{0}'")]
    UnknownSensor(String),
}

/// Fixed mapping from sensor key to [`Sensor`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorRegistry {
    sensors: BTreeMap<String, Sensor>,
}

impl SensorRegistry {
    /// Build the registry from configuration.
    ///
    /// Keys and addresses must both be unique.
    pub fn new(configs: &[SensorConfig]) -> Result<Self, RegistryError> {
        let mut sensors: BTreeMap<String, Sensor> = BTreeMap::new();

        for config in configs {
            if sensors.contains_key(&config.key) {
                return Err(RegistryError::DuplicateKey(config.key.clone()));
            }
            if let Some(existing) = sensors.values().find(|s| s.address == config.address) {
                return Err(RegistryError::DuplicateAddress {
                    address: config.address,
                    first: existing.key.clone(),
                    second: config.key.clone(),
                });
            }
            sensors.insert(
                config.key.clone(),
                Sensor {
                    key: config.key.clone(),
                    address: config.address,
                    display_name: config.name.clone(),
                    instance: None,
                },
            );
        }

        Ok(Self { sensors })
    }

    /// Find the beacon sensor a discovered frame belongs to.
    pub fn lookup_by_address(&self, addr: &MacAddress) -> Option<&Sensor> {
        self.sensors.values().find(|s| s.address.matches(addr))
    }

    /// The gateway's own on-board sensor, if configured.
    pub fn local(&self) -> Option<&Sensor> {
        self.sensors.values().find(|s| s.address.is_local())
    }

    pub fn get(&self, key: &str) -> Option<&Sensor> {
        self.sensors.get(key)
    }

    /// Record the device instance id the bus assigned to `key`.
    ///
    /// Re-binding the same id is a no-op; a different id replaces the old one.
    pub fn bind_instance(
        &mut self,
        key: &str,
        instance: DeviceInstance,
    ) -> Result<Binding, RegistryError> {
        let sensor = self
            .sensors
            .get_mut(key)
            .ok_or_else(|| RegistryError::UnknownSensor(key.to_string()))?;

        match sensor.instance.replace(instance) {
            None => Ok(Binding::New),
            Some(previous) if Some(&previous) == sensor.instance.as_ref() => Ok(Binding::Unchanged),
            Some(previous) => Ok(Binding::Replaced(previous)),
        }
    }

    pub fn all_sensors(&self) -> impl Iterator<Item = &Sensor> {
        self.sensors.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.sensors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}
