//! OBD-II Car Emulator
//!
//! Answers OBD-II requests on a CAN interface using the kernel ISO-TP
//! socket as transport.
//!
//! # Usage
//!
//! Defaults (vcan0, 500 kbit/s, standard identifiers):
//! ```bash
//! ./car-emulator --interface vcan0
//! ```
//!
//! Pick settings from the operator menu before starting:
//! ```bash
//! ./car-emulator --interactive
//! ```

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use car_emulator::config::HELP;
use car_emulator::{Bitrate, ConfigCommand, EmulatorConfig, TelemetrySource};
use cantp_bridge::IdWidth;
use clap::{Parser, ValueEnum};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "car-emulator")]
#[command(about = "OBD-II car emulator over CAN/ISO-TP")]
struct Args {
    /// Configuration file path (TOML or YAML)
    #[arg(short, long)]
    config: Option<String>,

    /// CAN interface name
    #[arg(short, long)]
    interface: Option<String>,

    /// Bus bit rate (250k or 500k)
    #[arg(short, long)]
    bitrate: Option<Bitrate>,

    /// Identifier width for OBD-II addressing
    #[arg(long, value_enum)]
    id_width: Option<IdWidthArg>,

    /// Random-walk the telemetry values
    #[arg(long)]
    simulate: bool,

    /// Configure from the operator command menu before starting
    #[arg(long)]
    interactive: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum IdWidthArg {
    Standard,
    Extended,
}

impl From<IdWidthArg> for IdWidth {
    fn from(arg: IdWidthArg) -> Self {
        match arg {
            IdWidthArg::Standard => IdWidth::Standard,
            IdWidthArg::Extended => IdWidth::Extended,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = if args.verbose {
        "car_emulator=debug,cantp_bridge=debug"
    } else {
        "car_emulator=info,cantp_bridge=info"
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        info!("Loading config from: {}", config_path);
        EmulatorConfig::load_any(config_path)
            .with_context(|| format!("Failed to load config {}", config_path))?
    } else {
        EmulatorConfig::default()
    };

    if let Some(interface) = &args.interface {
        config.interface = interface.clone();
    }
    if let Some(bitrate) = args.bitrate {
        config.bitrate = bitrate;
    }
    if let Some(width) = args.id_width {
        config.id_width = width.into();
    }
    if args.simulate {
        config.telemetry.simulate = true;
    }

    if args.interactive {
        config = tokio::task::spawn_blocking(move || command_menu(config))
            .await
            .context("Command menu task failed")??;
    }

    // Immutable from here on
    let config = Arc::new(config);

    let timing = config.bitrate.timing();
    info!("Starting OBD-II car emulator");
    info!(
        interface = %config.interface,
        bitrate = timing.bitrate,
        sample_point = timing.sample_point,
        triple_sampling = timing.triple_sampling,
        id_width = %config.id_width,
        "Configuration"
    );
    info!(
        "Bit timing is applied to the interface, e.g.: ip link set {} type can bitrate {} sample-point {} triple-sampling on",
        config.interface, timing.bitrate, timing.sample_point
    );

    let telemetry = Arc::new(TelemetrySource::new(config.telemetry.initial()?));
    let running = Arc::new(AtomicBool::new(true));

    let update_handle = if config.telemetry.simulate {
        let telemetry = telemetry.clone();
        let running = running.clone();
        let period = Duration::from_millis(config.telemetry.update_period_ms.max(1));
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                telemetry.update();
            }
        }))
    } else {
        None
    };

    let result = run(config, telemetry, running.clone()).await;

    running.store(false, Ordering::SeqCst);
    if let Some(handle) = update_handle {
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    info!("Car emulator stopped");
    result
}

#[cfg(all(target_os = "linux", feature = "socketcan"))]
async fn run(
    config: Arc<EmulatorConfig>,
    telemetry: Arc<TelemetrySource>,
    running: Arc<AtomicBool>,
) -> Result<()> {
    use car_emulator::kernel::KernelIsoTp;
    use car_emulator::{Addressing, Dispatcher};

    let addressing = Addressing::for_width(config.id_width);
    let backend = Arc::new(KernelIsoTp::open(
        &config.interface,
        addressing,
        &config.transport,
    )?);
    let dispatcher = Arc::new(Dispatcher::new(
        config.id_width,
        telemetry,
        backend.clone(),
    ));

    let serve_running = running.clone();
    let mut serve_handle = tokio::task::spawn_blocking(move || {
        backend.serve(dispatcher.as_ref(), &serve_running);
    });

    info!("Car emulator ready - press Ctrl+C to stop");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down...");
            running.store(false, Ordering::SeqCst);
            let _ = tokio::time::timeout(Duration::from_secs(2), serve_handle).await;
            Ok(())
        }
        joined = &mut serve_handle => {
            // The listener only returns once stopped
            joined.context("Listener task panicked")?;
            anyhow::bail!("Listener task terminated unexpectedly")
        }
    }
}

#[cfg(not(all(target_os = "linux", feature = "socketcan")))]
async fn run(
    _config: Arc<EmulatorConfig>,
    _telemetry: Arc<TelemetrySource>,
    _running: Arc<AtomicBool>,
) -> Result<()> {
    anyhow::bail!("The ISO-TP backend requires Linux and the 'socketcan' feature")
}

/// Read operator commands from stdin until `go`
fn command_menu(mut config: EmulatorConfig) -> Result<EmulatorConfig> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    println!("\n{}", HELP);

    loop {
        print!("\nCMD> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            warn!("Command input closed, starting with current configuration");
            return Ok(config);
        }

        match ConfigCommand::parse(&line) {
            None => continue,
            Some(Ok(command)) => {
                debug!(?command, "Operator command");
                config.apply(command);
                println!("\n{}", command.describe());
                if command == ConfigCommand::Go {
                    return Ok(config);
                }
            }
            Some(Err(_)) => println!("\nWrong command"),
        }
    }
}
