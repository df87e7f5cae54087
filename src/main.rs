use ble_mqtt_gateway::GatewayConfig;
use ble_mqtt_gateway::app::{self, Options};
use clap::Parser;
use std::panic::{self, PanicHookInfo};
use tracing::error;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    app::init_tracing(options.debug);

    match app::run(GatewayConfig::default()).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            error!("{why}");
            std::process::exit(EXIT_ERROR);
        }
    }
}
