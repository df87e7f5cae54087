//! The scan, decode and publish duty cycle.
//!
//! Each cycle listens for a fixed window, reads the gateway's own temperature,
//! decodes frames from known beacons and publishes what it got. Failures only
//! ever skip a single device for a single cycle.

use crate::config::CycleConfig;
use crate::decoder::{DecodeError, decode_advertisement, format_uptime};
use crate::reading::Reading;
use crate::registry::{DeviceInstance, Sensor, SensorRegistry};
use crate::scanner::{DiscoveryFrame, Scanner};
use crate::telemetry::{Metric, TelemetryPublisher};
use crate::thermal::Thermometer;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What one cycle did, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Distinct addresses seen during the scan.
    pub frames: usize,
    /// Frames that belonged to a configured sensor.
    pub matched: usize,
    /// Messages handed to the bus.
    pub published: usize,
    /// Sensors skipped this cycle: undecodable, unbound or unreadable.
    pub skipped: usize,
}

pub struct ScanCycleController {
    scanner: Box<dyn Scanner>,
    thermometer: Box<dyn Thermometer>,
    publisher: TelemetryPublisher,
    registry: watch::Receiver<SensorRegistry>,
    portal_id: String,
    config: CycleConfig,
}

impl ScanCycleController {
    pub fn new(
        scanner: Box<dyn Scanner>,
        thermometer: Box<dyn Thermometer>,
        publisher: TelemetryPublisher,
        registry: watch::Receiver<SensorRegistry>,
        portal_id: String,
        config: CycleConfig,
    ) -> Self {
        Self {
            scanner,
            thermometer,
            publisher,
            registry,
            portal_id,
            config,
        }
    }

    /// Run cycles forever.
    pub async fn run(&mut self) {
        loop {
            let report = self.run_once().await;
            debug!(?report, "Cycle finished");
            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// One scan and publish pass.
    pub async fn run_once(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        info!(window = ?self.config.scan_window, "Scanning for devices");
        let frames = match self.scanner.scan(self.config.scan_window).await {
            Ok(frames) => frames,
            Err(e) => {
                warn!(error = %e, "Scan failed");
                Vec::new()
            }
        };
        report.frames = frames.len();

        // bindings are resolved afresh every cycle, never carried over
        let registry = self.registry.borrow_and_update().clone();

        if let Some(local) = registry.local() {
            self.publish_local(local, &mut report);
        }

        for frame in &frames {
            let Some(sensor) = registry.lookup_by_address(&frame.address) else {
                continue;
            };
            report.matched += 1;
            self.publish_beacon(sensor, frame, &mut report);
        }

        report
    }

    fn publish_local(&self, sensor: &Sensor, report: &mut CycleReport) {
        let Some(instance) = sensor.bound_instance() else {
            debug!(sensor = %sensor.key, "Local sensor not bound yet");
            report.skipped += 1;
            return;
        };

        let reading = match self.thermometer.read_celsius() {
            Ok(celsius) => Reading::local(celsius),
            Err(e) => {
                warn!(error = %e, "Failed to read local temperature");
                report.skipped += 1;
                return;
            }
        };

        info!(
            device = %sensor.display_name,
            temperature = reading.temperature,
            "Local reading"
        );
        self.publish_reading(instance, &reading, report);
    }

    fn publish_beacon(&self, sensor: &Sensor, frame: &DiscoveryFrame, report: &mut CycleReport) {
        let decoded = frame
            .manufacturer_data
            .as_deref()
            .ok_or(DecodeError::MissingVendorData(frame.address))
            .and_then(decode_advertisement);

        let reading = match decoded {
            Ok(reading) => reading,
            Err(e) => {
                info!(device = %sensor.display_name, error = %e, "Skipping device");
                report.skipped += 1;
                return;
            }
        };

        info!(
            device = %sensor.display_name,
            temperature = reading.temperature,
            humidity = reading.humidity,
            uptime = %reading.uptime.map(format_uptime).unwrap_or_default(),
            voltage = reading.voltage,
            "Beacon reading"
        );

        let Some(instance) = sensor.bound_instance() else {
            debug!(sensor = %sensor.key, "Beacon not bound yet");
            report.skipped += 1;
            return;
        };
        self.publish_reading(instance, &reading, report);
    }

    fn publish_reading(
        &self,
        instance: &DeviceInstance,
        reading: &Reading,
        report: &mut CycleReport,
    ) {
        let values = [
            (Metric::Temperature, Some(reading.temperature)),
            (Metric::Humidity, reading.humidity),
        ];

        for (metric, value) in values {
            let Some(value) = value else { continue };
            match self
                .publisher
                .publish_value(&self.portal_id, instance, metric, value)
            {
                Ok(()) => report.published += 1,
                Err(e) => warn!(instance = %instance, %metric, error = %e, "Publish failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::MacAddress;
    use crate::scanner::ScanError;
    use crate::state::SharedState;
    use crate::test_utils::{
        CannedScanner, FixedThermometer, RecordingBus, TEST_MAC, beacon_payload, test_registry,
    };
    use std::sync::Arc;
    use std::time::Duration;

    const PORTAL: &str = "c0619ab1b2c3";

    fn controller(
        scanner: CannedScanner,
        thermometer: FixedThermometer,
        shared: &SharedState,
    ) -> (Arc<RecordingBus>, ScanCycleController) {
        let bus = Arc::new(RecordingBus::default());
        let controller = ScanCycleController::new(
            Box::new(scanner),
            Box::new(thermometer),
            TelemetryPublisher::new(bus.clone()),
            shared.subscribe_registry(),
            PORTAL.to_string(),
            CycleConfig {
                scan_window: Duration::from_millis(10),
                scan_interval: Duration::from_millis(10),
            },
        );
        (bus, controller)
    }

    fn beacon_frame(temperature_raw: u16, humidity_raw: u16) -> DiscoveryFrame {
        DiscoveryFrame::new(
            TEST_MAC,
            Some(beacon_payload(3000, temperature_raw, humidity_raw, 3600).to_vec()),
        )
    }

    #[tokio::test]
    async fn test_end_to_end_publish() {
        let shared = SharedState::new(test_registry());
        shared.bind_instance("t1", "24".into()).unwrap();
        let scanner = CannedScanner::new(vec![Ok(vec![beacon_frame(640, 720)])]);
        let (bus, mut controller) = controller(scanner, FixedThermometer::failing(), &shared);

        let report = controller.run_once().await;

        assert_eq!(
            bus.published(),
            vec![
                (
                    format!("W/{PORTAL}/temperature/24/Temperature"),
                    r#"{"value":40.0}"#.to_string()
                ),
                (
                    format!("W/{PORTAL}/temperature/24/Humidity"),
                    r#"{"value":45.0}"#.to_string()
                ),
            ]
        );
        assert_eq!(report.frames, 1);
        assert_eq!(report.matched, 1);
        assert_eq!(report.published, 2);
    }

    #[tokio::test]
    async fn test_nothing_published_for_unbound_sensors() {
        let shared = SharedState::new(test_registry());
        let scanner = CannedScanner::new(vec![Ok(vec![beacon_frame(640, 720)])]);
        let (bus, mut controller) = controller(scanner, FixedThermometer::new(48.5), &shared);

        let report = controller.run_once().await;

        assert!(bus.published().is_empty());
        assert_eq!(report.matched, 1);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn test_local_reading_published_once_bound() {
        let shared = SharedState::new(test_registry());
        let scanner = CannedScanner::new(vec![Ok(vec![]), Ok(vec![])]);
        let (bus, mut controller) = controller(scanner, FixedThermometer::new(48.5), &shared);

        // first cycle: not bound yet, nothing carried into the next one
        controller.run_once().await;
        assert!(bus.published().is_empty());

        shared.bind_instance("rpi", "25".into()).unwrap();
        controller.run_once().await;
        assert_eq!(
            bus.published(),
            vec![(
                format!("W/{PORTAL}/temperature/25/Temperature"),
                r#"{"value":48.5}"#.to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_local_read_failure_skips_only_local() {
        let shared = SharedState::new(test_registry());
        shared.bind_instance("rpi", "25".into()).unwrap();
        shared.bind_instance("t1", "24".into()).unwrap();
        let scanner = CannedScanner::new(vec![Ok(vec![beacon_frame(640, 720)])]);
        let (bus, mut controller) = controller(scanner, FixedThermometer::failing(), &shared);

        let report = controller.run_once().await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.published, 2);
        assert!(bus.published().iter().all(|(topic, _)| topic.contains("/24/")));
    }

    #[tokio::test]
    async fn test_decode_errors_skip_device_only() {
        let shared = SharedState::new(test_registry());
        shared.bind_instance("t1", "24".into()).unwrap();
        let stranger = DiscoveryFrame::new(MacAddress([1, 2, 3, 4, 5, 6]), Some(vec![0; 20]));
        let scanner = CannedScanner::new(vec![
            Ok(vec![DiscoveryFrame::new(TEST_MAC, Some(vec![0; 12])), stranger.clone()]),
            Ok(vec![DiscoveryFrame::new(TEST_MAC, None), stranger]),
            Ok(vec![beacon_frame(0xFF10, 800)]),
        ]);
        let (bus, mut controller) = controller(scanner, FixedThermometer::failing(), &shared);

        let first = controller.run_once().await;
        assert_eq!((first.frames, first.matched, first.skipped), (2, 1, 2));
        let second = controller.run_once().await;
        assert_eq!((second.frames, second.matched, second.skipped), (2, 1, 2));
        assert!(bus.published().is_empty());

        controller.run_once().await;
        assert_eq!(
            bus.published()[0],
            (
                format!("W/{PORTAL}/temperature/24/Temperature"),
                r#"{"value":-15.0}"#.to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_scan_failure_does_not_abort() {
        let shared = SharedState::new(test_registry());
        shared.bind_instance("rpi", "25".into()).unwrap();
        let scanner =
            CannedScanner::new(vec![Err(ScanError::Bluetooth("adapter gone".into()))]);
        let (bus, mut controller) = controller(scanner, FixedThermometer::new(50.0), &shared);

        let report = controller.run_once().await;
        assert_eq!(report.frames, 0);
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_failures_are_counted_not_fatal() {
        let shared = SharedState::new(test_registry());
        shared.bind_instance("t1", "24".into()).unwrap();
        let bus = Arc::new(RecordingBus::failing());
        let mut controller = ScanCycleController::new(
            Box::new(CannedScanner::new(vec![Ok(vec![beacon_frame(640, 720)])])),
            Box::new(FixedThermometer::failing()),
            TelemetryPublisher::new(bus.clone()),
            shared.subscribe_registry(),
            PORTAL.to_string(),
            CycleConfig::default(),
        );

        let report = controller.run_once().await;
        assert_eq!(report.matched, 1);
        assert_eq!(report.published, 0);
    }
}
