//! Gateway registration with dbus-mqtt-devices.
//!
//! The gateway announces itself on `device/<clientId>/Status` with the list of
//! services it provides. The same document with `connected: 0` is installed as
//! the last-will so an unclean disconnect is visible to subscribers.

use crate::registry::SensorRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Service type announced for every sensor.
pub const SERVICE_TYPE: &str = "temperature";

/// Registration document published on the status topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub client_id: String,
    pub connected: u8,
    pub version: String,
    pub services: BTreeMap<String, String>,
}

impl Registration {
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Builds the status payloads and topic names for one gateway identity.
#[derive(Debug, Clone)]
pub struct RegistrationManager {
    client_id: String,
    version: String,
    services: BTreeMap<String, String>,
}

impl RegistrationManager {
    /// One service entry per configured sensor key.
    pub fn new(
        client_id: impl Into<String>,
        version: impl Into<String>,
        registry: &SensorRegistry,
    ) -> Self {
        let services = registry
            .keys()
            .map(|key| (key.to_string(), SERVICE_TYPE.to_string()))
            .collect();

        Self {
            client_id: client_id.into(),
            version: version.into(),
            services,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// `device/<clientId>/Status`
    pub fn status_topic(&self) -> String {
        format!("device/{}/Status", self.client_id)
    }

    /// `device/<clientId>/DBus`
    pub fn handshake_topic(&self) -> String {
        format!("device/{}/DBus", self.client_id)
    }

    fn registration(&self, connected: u8) -> Registration {
        Registration {
            client_id: self.client_id.clone(),
            connected,
            version: self.version.clone(),
            services: self.services.clone(),
        }
    }

    /// The "registered" announcement sent after every successful connect.
    pub fn announce(&self) -> Registration {
        self.registration(1)
    }

    /// The "unregistered" document, used as last-will and on clean shutdown.
    pub fn retract(&self) -> Registration {
        self.registration(0)
    }
}
