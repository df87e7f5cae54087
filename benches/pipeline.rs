//! Integration benchmark for one scan cycle.
//!
//! Feeds canned discovery frames through `ScanCycleController::run_once` with
//! a bus that discards everything, so decode, lookup and payload formatting
//! are measured together.

use ble_mqtt_gateway::config::{CycleConfig, default_sensors};
use ble_mqtt_gateway::{
    Bus, BusError, CycleReport, DiscoveryFrame, MacAddress, ScanCycleController, ScanError,
    ScanFuture, Scanner, SensorAddress, SensorRegistry, SharedState, TelemetryPublisher,
    ThermalError, Thermometer,
};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

const PORTAL: &str = "c0619ab1b2c3";

fn payload() -> Vec<u8> {
    vec![
        0x59, 0x00, 0xBE, 0xAC, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0xB8, 0x0B, 0x80, 0x02, 0xD0,
        0x02, 0x80, 0x51, 0x01, 0x00,
    ]
}

/// Returns the same frames on every scan.
struct ReplayScanner {
    frames: Vec<DiscoveryFrame>,
}

impl Scanner for ReplayScanner {
    fn scan(&self, _window: Duration) -> ScanFuture<'_> {
        let frames = self.frames.clone();
        Box::pin(async move { Ok::<_, ScanError>(frames) })
    }
}

struct NullBus;

impl Bus for NullBus {
    fn publish(&self, _topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        black_box(payload);
        Ok(())
    }

    fn subscribe(&self, _topic: &str) -> Result<(), BusError> {
        Ok(())
    }
}

struct SteadyThermometer;

impl Thermometer for SteadyThermometer {
    fn read_celsius(&self) -> Result<f64, ThermalError> {
        Ok(48.3)
    }
}

/// Registry from the built-in sensor table with every sensor bound.
fn bound_state() -> SharedState {
    let registry = SensorRegistry::new(&default_sensors()).unwrap();
    let keys: Vec<String> = registry.keys().map(str::to_string).collect();
    let shared = SharedState::new(registry);
    for (i, key) in keys.iter().enumerate() {
        shared
            .bind_instance(key, (20 + i).to_string().as_str().into())
            .unwrap();
    }
    shared
}

fn controller(shared: &SharedState, frames: Vec<DiscoveryFrame>) -> ScanCycleController {
    ScanCycleController::new(
        Box::new(ReplayScanner { frames }),
        Box::new(SteadyThermometer),
        TelemetryPublisher::new(Arc::new(NullBus)),
        shared.subscribe_registry(),
        PORTAL.to_string(),
        CycleConfig {
            scan_window: Duration::ZERO,
            scan_interval: Duration::ZERO,
        },
    )
}

fn configured_frames() -> Vec<DiscoveryFrame> {
    default_sensors()
        .iter()
        .filter_map(|sensor| match &sensor.address {
            SensorAddress::Beacon(mac) => Some(DiscoveryFrame::new(*mac, Some(payload()))),
            SensorAddress::Local => None,
        })
        .collect()
}

/// Benchmark a cycle where every configured beacon is heard
fn bench_configured_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle");
    let rt = Runtime::new().unwrap();
    let shared = bound_state();
    let mut controller = controller(&shared, configured_frames());

    group.throughput(Throughput::Elements(5));
    group.bench_function("all_sensors_bound", |b| {
        b.iter(|| {
            let report: CycleReport = rt.block_on(controller.run_once());
            debug_assert_eq!(report.published, 9);
            black_box(report)
        })
    });

    group.finish();
}

/// Benchmark cycles with a crowd of unknown advertisers around
fn bench_crowded_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("crowded_cycle");
    let rt = Runtime::new().unwrap();
    let shared = bound_state();

    for strangers in [10u8, 100, 250] {
        let mut frames = configured_frames();
        frames.extend(
            (0..strangers).map(|i| DiscoveryFrame::new(MacAddress([0xAA, 0, 0, 0, 0, i]), None)),
        );
        let mut controller = controller(&shared, frames);

        group.throughput(Throughput::Elements(u64::from(strangers) + 4));
        group.bench_with_input(BenchmarkId::from_parameter(strangers), &strangers, |b, _| {
            b.iter(|| black_box(rt.block_on(controller.run_once())))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_configured_cycle, bench_crowded_cycle);
criterion_main!(benches);
