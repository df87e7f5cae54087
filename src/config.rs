//! Built-in gateway configuration.
//!
//! The gateway has no configuration file; everything that identifies it and
//! its sensors is fixed here.

use crate::address::{MacAddress, SensorAddress};
use crate::bus::mqtt::BrokerConfig;
use crate::registry::SensorConfig;
use crate::scanner::Backend;
use crate::thermal::DEFAULT_THERMAL_PATH;
use std::path::PathBuf;
use std::time::Duration;

pub const CLIENT_ID: &str = "thermo_gw4";
/// Version announced in the registration document.
pub const REGISTRATION_VERSION: &str = "v1.0 ALPHA";

/// Timing of the scan/publish duty cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleConfig {
    /// How long each discovery scan listens.
    pub scan_window: Duration,
    /// Pause between the end of one cycle and the next scan.
    pub scan_interval: Duration,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            scan_window: Duration::from_secs(2),
            scan_interval: Duration::from_secs(30),
        }
    }
}

/// Startup synchronisation limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupConfig {
    pub poll_interval: Duration,
    /// Polls for a portal id before giving up.
    pub portal_attempts: u32,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            portal_attempts: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub client_id: String,
    pub version: String,
    pub broker: BrokerConfig,
    pub backend: Backend,
    pub thermal_path: PathBuf,
    pub cycle: CycleConfig,
    pub startup: StartupConfig,
    pub sensors: Vec<SensorConfig>,
}

/// The beacons installed around the site plus the gateway itself.
pub fn default_sensors() -> Vec<SensorConfig> {
    let beacon = |octets: [u8; 6]| SensorAddress::Beacon(MacAddress(octets));
    vec![
        SensorConfig::new("t1", beacon([0x19, 0xC4, 0x00, 0x00, 0x20, 0xC5]), "Room1"),
        SensorConfig::new("t2", beacon([0x00, 0x00, 0x00, 0x00, 0x00, 0xDE]), "Room2"),
        SensorConfig::new("t3", beacon([0xFA, 0xAC, 0x00, 0x00, 0x17, 0x21]), "Room3"),
        SensorConfig::new("t4", beacon([0xDC, 0x12, 0x00, 0x00, 0x12, 0x62]), "Room4"),
        SensorConfig::new("rpi", SensorAddress::Local, "Raspberry"),
    ]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            client_id: CLIENT_ID.to_string(),
            version: REGISTRATION_VERSION.to_string(),
            broker: BrokerConfig::default(),
            backend: Backend::default(),
            thermal_path: PathBuf::from(DEFAULT_THERMAL_PATH),
            cycle: CycleConfig::default(),
            startup: StartupConfig::default(),
            sensors: default_sensors(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SensorRegistry;

    #[test]
    fn test_default_sensors_form_a_valid_registry() {
        let registry = SensorRegistry::new(&GatewayConfig::default().sensors).unwrap();
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.local().unwrap().display_name, "Raspberry");

        let t3: MacAddress = "fa:ac:00:00:17:21".parse().unwrap();
        assert_eq!(registry.lookup_by_address(&t3).unwrap().key, "t3");
    }

    #[test]
    fn test_default_timing() {
        let config = GatewayConfig::default();
        assert_eq!(config.cycle.scan_window, Duration::from_secs(2));
        assert_eq!(config.cycle.scan_interval, Duration::from_secs(30));
        assert_eq!(config.startup.portal_attempts, 30);
        assert_eq!(config.client_id, "thermo_gw4");
    }
}
