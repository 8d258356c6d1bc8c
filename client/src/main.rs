use clap::Parser;
use client::network::{Device, DeviceConfig};
use log::info;
use shared::Coords;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Emulated device for the power-spot server", long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:6644")]
    server: String,

    /// Starting latitude in degrees
    #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
    lat: f64,

    /// Starting longitude in degrees
    #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
    lon: f64,

    /// Receiver sensitivity range in meters
    #[arg(short = 'r', long, default_value = "1000.0")]
    sensitivity_range: f64,

    /// Milliseconds between status updates
    #[arg(short = 'i', long, default_value = "1000")]
    interval_ms: u64,

    /// Meters walked between status updates
    #[arg(long, default_value = "5.0")]
    step_m: f64,

    /// Send a ping every N status updates, 0 disables pings
    #[arg(long, default_value = "10")]
    ping_every: u32,

    /// Seed for a reproducible walk
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting device at ({}, {})", args.lat, args.lon);
    info!(
        "Sensitivity range {} m, walking {} m every {} ms",
        args.sensitivity_range, args.step_m, args.interval_ms
    );

    let config = DeviceConfig {
        server: args.server,
        start: Coords::new(args.lat, args.lon),
        sensitivity_range: args.sensitivity_range,
        interval: Duration::from_millis(args.interval_ms),
        step_m: args.step_m,
        ping_every: args.ping_every,
        seed: args.seed,
    };

    let mut device = Device::connect(config).await?;

    tokio::select! {
        result = device.run(None) => result?,
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, disconnecting"),
    }

    Ok(())
}
