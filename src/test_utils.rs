use crate::address::{MacAddress, SensorAddress};
use crate::bus::{Bus, BusError};
use crate::registry::{SensorConfig, SensorRegistry};
use crate::scanner::{DiscoveryFrame, ScanError, ScanFuture, Scanner};
use crate::thermal::{ThermalError, Thermometer};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Address of sensor `t1` in [`test_registry`].
pub const TEST_MAC: MacAddress = MacAddress([0x19, 0xC4, 0x00, 0x00, 0x20, 0xC5]);

/// One beacon (`t1`, "Room1") and the local sensor (`rpi`, "Raspberry").
pub fn test_registry() -> SensorRegistry {
    SensorRegistry::new(&[
        SensorConfig::new("t1", SensorAddress::Beacon(TEST_MAC), "Room1"),
        SensorConfig::new("rpi", SensorAddress::Local, "Raspberry"),
    ])
    .unwrap()
}

/// Build a 20-byte beacon block from raw field values.
pub fn beacon_payload(voltage_mv: u16, temperature: u16, humidity: u16, uptime: u32) -> [u8; 20] {
    let mut block = [0u8; 20];
    block[..4].copy_from_slice(&[0x59, 0x00, 0xBE, 0xAC]);
    block[4..10].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
    block[10..12].copy_from_slice(&voltage_mv.to_le_bytes());
    block[12..14].copy_from_slice(&temperature.to_le_bytes());
    block[14..16].copy_from_slice(&humidity.to_le_bytes());
    block[16..20].copy_from_slice(&uptime.to_le_bytes());
    block
}

/// Bus that records everything instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingBus {
    published: Mutex<Vec<(String, String)>>,
    subscriptions: Mutex<Vec<String>>,
    reject: Option<String>,
}

impl RecordingBus {
    /// A bus whose every call fails.
    pub fn failing() -> Self {
        Self::rejecting("")
    }

    /// A bus that fails every call on a topic containing `fragment`.
    pub fn rejecting(fragment: &str) -> Self {
        Self {
            reject: Some(fragment.to_string()),
            ..Default::default()
        }
    }

    fn rejects(&self, topic: &str) -> bool {
        self.reject
            .as_deref()
            .is_some_and(|fragment| topic.contains(fragment))
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }
}

impl Bus for RecordingBus {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if self.rejects(topic) {
            return Err(BusError::Publish {
                topic: topic.to_string(),
                message: "request queue full".to_string(),
            });
        }
        let payload = String::from_utf8(payload).unwrap();
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        if self.rejects(topic) {
            return Err(BusError::Subscribe {
                topic: topic.to_string(),
                message: "request queue full".to_string(),
            });
        }
        self.subscriptions.lock().unwrap().push(topic.to_string());
        Ok(())
    }
}

/// Scanner that replays one canned result per scan, then finds nothing.
#[derive(Debug)]
pub struct CannedScanner {
    results: Mutex<VecDeque<Result<Vec<DiscoveryFrame>, ScanError>>>,
}

impl CannedScanner {
    pub fn new(results: Vec<Result<Vec<DiscoveryFrame>, ScanError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
        }
    }
}

impl Scanner for CannedScanner {
    fn scan(&self, _window: Duration) -> ScanFuture<'_> {
        let next = self.results.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()));
        Box::pin(async move { next })
    }
}

/// Thermometer with a fixed answer.
#[derive(Debug)]
pub struct FixedThermometer(Option<f64>);

impl FixedThermometer {
    pub fn new(celsius: f64) -> Self {
        Self(Some(celsius))
    }

    pub fn failing() -> Self {
        Self(None)
    }
}

impl Thermometer for FixedThermometer {
    fn read_celsius(&self) -> Result<f64, ThermalError> {
        self.0
            .ok_or_else(|| ThermalError::Parse("no thermal zone".to_string()))
    }
}
