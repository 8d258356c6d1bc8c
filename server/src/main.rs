use clap::Parser;
use log::{error, info};
use server::config::SpotStore;
use server::network::Server;
use server::session::SessionSettings;
use server::world::World;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(author, version, about = "Power-spot RSSI emulator server")]
struct Args {
    /// Address to bind both listeners to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port devices connect to
    #[arg(short, long, default_value_t = shared::DEFAULT_DEVICE_PORT)]
    port: u16,

    /// Port of the admin HTTP interface
    #[arg(long, default_value_t = shared::DEFAULT_ADMIN_PORT)]
    admin_port: u16,

    /// JSON file the power spots are loaded from and saved to
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to wait for each session when shutting down
    #[arg(long, default_value_t = 5)]
    drain_timeout_secs: u64,

    /// Milliseconds a reply may take to write before the device is dropped
    #[arg(long, default_value_t = 2000)]
    write_timeout_ms: u64,

    /// Largest accepted message in bytes
    #[arg(long, default_value_t = shared::framing::DEFAULT_MAX_FRAME_LEN)]
    max_frame_bytes: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let store = args.config.as_ref().map(SpotStore::new);
    let power_spots = match &store {
        Some(store) => store.load()?,
        None => Vec::new(),
    };

    let (world, handle) = World::new(power_spots);
    let mut world = world.with_drain_timeout(Duration::from_secs(args.drain_timeout_secs));
    let mut writer_task = None;
    if let Some(store) = store {
        let (writer, task) = store.spawn_writer();
        world = world.with_persistence(writer);
        writer_task = Some(task);
    }
    let world_task = world.spawn();

    let settings = SessionSettings {
        write_timeout: Duration::from_millis(args.write_timeout_ms),
        max_frame_len: args.max_frame_bytes,
    };
    let server = Server::bind(&format!("{}:{}", args.host, args.port), handle.clone(), settings).await?;
    let admin_listener = TcpListener::bind((args.host.as_str(), args.admin_port)).await?;
    let admin = tokio::spawn(server::admin::serve(admin_listener, handle.clone()));

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Device listener failed: {}", e);
            }
        }
        result = admin => {
            match result {
                Ok(Err(e)) => error!("Admin interface failed: {}", e),
                Err(e) => error!("Admin task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    handle.terminate().await?;
    world_task.await?;
    // The stopped world dropped its sender, so the writer flushes and exits
    if let Some(writer_task) = writer_task {
        writer_task.await?;
    }
    Ok(())
}
