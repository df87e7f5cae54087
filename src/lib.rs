//! `ble-mqtt-gateway` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing and process exit codes.
//! The gateway wiring lives in [`crate::app`]; every piece it connects can be
//! driven on its own with an injected scanner, bus or thermometer.

pub mod address;
pub mod app;
pub mod bus;
pub mod config;
pub mod cycle;
pub mod decoder;
pub mod reading;
pub mod registration;
pub mod registry;
pub mod scanner;
pub mod state;
pub mod sync;
pub mod telemetry;
pub mod thermal;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use address::{MacAddress, SensorAddress};
pub use bus::{Bus, BusError, BusHandler};
pub use config::GatewayConfig;
pub use cycle::{CycleReport, ScanCycleController};
pub use decoder::{DecodeError, decode_advertisement, format_uptime};
pub use reading::Reading;
pub use registration::RegistrationManager;
pub use registry::{DeviceInstance, SensorConfig, SensorRegistry};
pub use scanner::{Backend, DiscoveryFrame, ScanError, ScanFuture, Scanner};
pub use state::SharedState;
pub use sync::{StartupError, StartupSynchronizer};
pub use telemetry::{Metric, TelemetryPublisher};
pub use thermal::{ThermalError, Thermometer};
