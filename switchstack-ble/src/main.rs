//! BLE provisioning tool for SwitchStack devices
//!
//! Scans for SwitchStack switches and sends them WiFi credentials over BLE.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use switchstack_provision::{
    BtleCentral, Coordinator, Credentials, DiscoveredDevice, Outcome, ProvisionConfig,
    SessionState, switchstack_home,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "switchstack-ble")]
#[command(about = "BLE provisioning tool for SwitchStack devices")]
struct Cli {
    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for SwitchStack devices
    Scan {
        /// Scan duration in seconds (defaults to the configured window)
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Send WiFi credentials to a device
    Provision {
        /// Device name or address to connect to
        #[arg(short, long)]
        device: Option<String>,
        /// WiFi network name
        #[arg(long, requires = "password", conflicts_with = "file")]
        ssid: Option<String>,
        /// WiFi password
        #[arg(long, requires = "ssid", conflicts_with = "file")]
        password: Option<String>,
        /// WiFi credentials file (SSID on line 1, password on line 2)
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Seconds to wait for the device to report its WiFi status
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Show the Bluetooth adapter in use
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let home = switchstack_home()?;
    let mut config = ProvisionConfig::load(&home)?;
    debug!(home = %home.display(), ?config, "configuration loaded");

    match cli.command {
        Commands::Scan { duration } => {
            if let Some(secs) = duration {
                config.scan_window_secs = secs;
            }
            scan_devices(config).await?;
        }
        Commands::Provision {
            device,
            ssid,
            password,
            file,
            timeout,
        } => {
            let credentials = match (ssid, password) {
                (Some(ssid), Some(password)) => Credentials::new(ssid, password)?,
                _ => Credentials::from_file(
                    &file.unwrap_or_else(|| PathBuf::from("wifi_credentials.txt")),
                )?,
            };
            if let Some(secs) = timeout {
                config.status_timeout_secs = secs;
            }
            let outcome = provision_device(config, device, credentials).await?;
            if !outcome.is_success() {
                std::process::exit(exit_code(&outcome));
            }
        }
        Commands::Status => {
            let central = BtleCentral::new().await?;
            println!("Bluetooth adapter: {}", central.adapter_info().await?);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_target(false))
        .init();
}

async fn scan_devices(config: ProvisionConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "Scanning for SwitchStack devices ({} seconds)...",
        config.scan_window_secs
    );

    let coordinator = Coordinator::new(Arc::new(BtleCentral::new().await?), config);
    let devices = coordinator.scan().await?;

    println!("\nFound {} devices:", devices.len());
    for device in &devices {
        let rssi = device
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "N/A".to_string());
        println!("  {} ({}) RSSI: {}", device.name, device.id, rssi);
    }
    Ok(())
}

/// First device whose name or address contains `target`, or the first one
/// found when no target is given
fn pick_device<'a>(
    devices: &'a [DiscoveredDevice],
    target: Option<&str>,
) -> Option<&'a DiscoveredDevice> {
    match target {
        Some(t) => devices.iter().find(|d| d.name.contains(t) || d.id.contains(t)),
        None => devices.first(),
    }
}

async fn provision_device(
    config: ProvisionConfig,
    target: Option<String>,
    credentials: Credentials,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    let status_timeout = config.status_timeout();
    let coordinator = Coordinator::new(Arc::new(BtleCentral::new().await?), config);

    println!("Scanning for SwitchStack devices...");
    let devices = coordinator.scan().await?;
    let device = pick_device(&devices, target.as_deref()).ok_or("No SwitchStack device found")?;
    println!("Found device: {} ({})", device.name, device.id);

    let mut states = coordinator.subscribe();
    let progress = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            match state {
                SessionState::Connecting => println!("Connecting..."),
                SessionState::WritingCredentials => {
                    println!("Sending WiFi credentials...")
                }
                SessionState::AwaitingStatus { .. } => println!(
                    "Waiting up to {}s for the device to join WiFi...",
                    status_timeout.as_secs()
                ),
                SessionState::Idle => {}
                SessionState::Finished(_) => break,
            }
        }
    });

    println!("  SSID: {}", credentials.ssid());
    coordinator.select(&device.id).await?;
    coordinator.start(credentials).await?;

    let outcome = tokio::select! {
        outcome = coordinator.wait() => outcome?,
        _ = tokio::signal::ctrl_c() => {
            println!("\nCancelling...");
            coordinator.cancel().await;
            coordinator.wait().await?
        }
    };
    // Let the progress printer drain the final transitions
    let _ = tokio::time::timeout(Duration::from_secs(1), progress).await;

    match &outcome {
        Outcome::Succeeded => println!("Device joined the WiFi network."),
        Outcome::Rejected { status } => println!(
            "Device could not join the WiFi network (status {:#04x}). Check the SSID and password.",
            status
        ),
        other => println!("Provisioning failed: {}", other),
    }
    Ok(outcome)
}

fn exit_code(outcome: &Outcome) -> i32 {
    match outcome {
        Outcome::Succeeded => 0,
        Outcome::Rejected { .. } => 2,
        Outcome::TimedOut => 3,
        Outcome::TransportError(_) => 4,
        Outcome::Cancelled => 130,
    }
}
