//! Core application runner for the gateway.
//!
//! This module is decoupled from process exit codes so the wiring between the
//! bus, the startup gate and the scan loop can be tested with injected fakes.

use crate::bus::mqtt::{MqttBus, run_event_loop};
use crate::bus::{Bus, BusError, BusHandler};
use crate::config::GatewayConfig;
use crate::cycle::ScanCycleController;
use crate::registration::RegistrationManager;
use crate::registry::{RegistryError, SensorRegistry};
use crate::scanner::{self, ScanError, Scanner};
use crate::state::SharedState;
use crate::sync::{StartupError, StartupSynchronizer};
use crate::telemetry::TelemetryPublisher;
use crate::thermal::{ThermalZone, Thermometer};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How long the event loop gets to flush the unregister and disconnect.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Command-line options.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Startup(#[from] StartupError),
}

fn default_directive(debug: bool) -> &'static str {
    if debug { "debug" } else { "info" }
}

/// Install the global subscriber; `RUST_LOG` overrides the `--debug` level.
pub fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Connect to the broker, wait for an identity, then scan until interrupted.
///
/// On interrupt the unregistered status is published and the client
/// disconnects before this returns.
pub async fn run(config: GatewayConfig) -> Result<(), RunError> {
    let registry = SensorRegistry::new(&config.sensors)?;
    let registration = RegistrationManager::new(&config.client_id, &config.version, &registry);
    let shared = Arc::new(SharedState::new(registry));

    let (bus, eventloop) = MqttBus::new(&config.broker, &registration)?;
    let bus = Arc::new(bus);
    let handler = BusHandler::new(bus.clone(), registration.clone(), shared.clone());
    let mut events = tokio::spawn(run_event_loop(
        eventloop,
        handler,
        config.broker.reconnect_delay,
    ));

    let result = tokio::select! {
        result = start(&config, &shared, bus.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };

    if let Err(e) = bus.shutdown(&registration) {
        warn!(error = %e, "Failed to unregister cleanly");
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, &mut events).await.is_err() {
        warn!("MQTT event loop did not stop in time");
        events.abort();
    }

    result
}

async fn start(
    config: &GatewayConfig,
    shared: &SharedState,
    bus: Arc<dyn Bus>,
) -> Result<(), RunError> {
    let scanner = scanner::open(config.backend).await?;
    info!(backend = %config.backend, "Scanner ready");
    let thermometer = ThermalZone::new(config.thermal_path.clone());
    run_with(config, shared, bus, scanner, Box::new(thermometer)).await
}

/// Wait for startup to complete, then run scan cycles forever.
///
/// Only returns on a startup failure.
pub async fn run_with(
    config: &GatewayConfig,
    shared: &SharedState,
    bus: Arc<dyn Bus>,
    scanner: Box<dyn Scanner>,
    thermometer: Box<dyn Thermometer>,
) -> Result<(), RunError> {
    let mut startup = StartupSynchronizer::new(
        shared.subscribe_status(),
        config.startup.poll_interval,
        config.startup.portal_attempts,
    );
    let portal_id = startup.wait_ready().await?;

    let mut controller = ScanCycleController::new(
        scanner,
        thermometer,
        TelemetryPublisher::new(bus),
        shared.subscribe_registry(),
        portal_id,
        config.cycle,
    );
    controller.run().await;
    Ok(())
}
