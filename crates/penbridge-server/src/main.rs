//! Penbridge entry point.
//!
//! Starts the current-protocol server and, unless disabled, the legacy
//! server, then routes capture events into both until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! penbridge [OPTIONS]
//!
//! Options:
//!   --config <PATH>       Config file [default: platform config dir]
//!   --overwrite-default   Make this the default implementation even if
//!                         another one is registered
//!   --no-legacy           Do not serve the legacy pipe
//!   --log-level <FILTER>  Log filter when RUST_LOG is unset
//!   --demo                Feed a synthetic pen tracing a circle
//! ```
//!
//! # Architecture
//!
//! ```text
//! capture source ─► CaptureSender ─► pump thread ─► LoggingHandler
//!                                                      └─ FanOutHandler
//!                                                           ├─ V2Server
//!                                                           └─ V1Server
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use penbridge_core::{DeviceInfo, State};
use penbridge_server::application::capture::{capture_channel, run_capture_pump, CaptureSender};
use penbridge_server::application::handler::{FanOutHandler, Handler, LoggingHandler};
use penbridge_server::infrastructure::network::discovery::DefaultBehavior;
use penbridge_server::infrastructure::network::shutdown::ShutdownSignal;
use penbridge_server::infrastructure::network::v1_server::V1Server;
use penbridge_server::infrastructure::network::v2_server::V2Server;
use penbridge_server::infrastructure::storage::config::{load_config, load_config_from};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Republishes pen/tablet events over the current and legacy IPC protocols.
#[derive(Debug, Parser)]
#[command(name = "penbridge", version)]
struct Cli {
    /// Configuration file; defaults to the platform config directory.
    #[arg(long, env = "PENBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Overwrite the current default implementation, if any.
    #[arg(long)]
    overwrite_default: bool,

    /// Do not serve the legacy pipe.
    #[arg(long)]
    no_legacy: bool,

    /// `tracing` filter used when `RUST_LOG` is unset.  Overrides the
    /// config file's `[logging] level`.
    #[arg(long)]
    log_level: Option<String>,

    /// Feed a synthetic pen tracing a circle, for testing clients without a
    /// tablet.
    #[arg(long)]
    demo: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    }
    .context("failed to load configuration")?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    info!("penbridge {} starting", env!("CARGO_PKG_VERSION"));

    let mut v2_config = config
        .v2_server_config()
        .context("failed to resolve server configuration")?;
    if cli.overwrite_default {
        v2_config.default_behavior = DefaultBehavior::AlwaysSet;
    }
    let v2 = V2Server::new(v2_config);
    v2.start().context("failed to start V2 server")?;

    let v1 = if config.legacy.enabled && !cli.no_legacy {
        let server = V1Server::new(config.v1_server_config());
        server.start().context("failed to start legacy server")?;
        Some(server)
    } else {
        info!("legacy server disabled");
        None
    };

    let mut fan_out = FanOutHandler::new(vec![&v2 as &dyn Handler]);
    if let Some(v1) = &v1 {
        fan_out.push(v1);
    }
    let handler = LoggingHandler::new(Some(&fan_out));

    // Signal handling only; everything else runs on std threads.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;

    let (sender, receiver) = capture_channel();
    let demo_stop = ShutdownSignal::new();

    let waited = std::thread::scope(|scope| {
        let pump = scope.spawn(|| run_capture_pump(receiver, &handler));
        if cli.demo {
            let demo_sender = sender.clone();
            let demo_stop = &demo_stop;
            scope.spawn(move || run_demo_source(&demo_sender, demo_stop));
        }

        info!("penbridge ready.  Press Ctrl-C to exit.");
        let waited = runtime.block_on(tokio::signal::ctrl_c());
        info!("shutdown signal received");

        demo_stop.trigger();
        drop(sender);
        if pump.join().is_err() {
            error!("capture pump panicked");
        }
        waited
    });

    if let Some(v1) = &v1 {
        v1.stop();
    }
    v2.stop();
    waited.context("failed to wait for Ctrl-C")?;

    info!("penbridge stopped");
    Ok(())
}

// ── Demo capture source ───────────────────────────────────────────────────────

const DEMO_FRAME_INTERVAL: Duration = Duration::from_millis(16);
const DEMO_MAX_XY: f32 = 1000.0;
const DEMO_MAX_PRESSURE: u32 = 1023;

/// Emits a device, then a pen tracing a circle at roughly 60 Hz with
/// pressure swelling and fading, until `stop` is triggered.
fn run_demo_source(sender: &CaptureSender, stop: &ShutdownSignal) {
    let mut device = DeviceInfo::new("penbridge:demo", "Penbridge Demo Pen");
    device.correlation_id = 1;
    device.max_x = DEMO_MAX_XY;
    device.max_y = DEMO_MAX_XY;
    device.max_pressure = DEMO_MAX_PRESSURE;
    if !sender.set_device(device) {
        return;
    }

    let mut frame = 0u32;
    while !stop.wait_timeout(DEMO_FRAME_INTERVAL) {
        let angle = (frame % 360) as f32 * std::f32::consts::PI / 180.0;
        let radius = DEMO_MAX_XY / 4.0;
        let centre = DEMO_MAX_XY / 2.0;
        let pressure = (angle.sin().abs() * DEMO_MAX_PRESSURE as f32) as u32;
        let state = State::default()
            .with_position(centre + radius * angle.cos(), centre + radius * angle.sin())
            .with_pressure(pressure)
            .with_pen_buttons(u32::from(pressure > 0))
            .with_near_surface(true);
        if !sender.set_state(state) {
            return;
        }
        frame = frame.wrapping_add(1);
    }
}
