use clap::Parser;
use tracing_subscriber::EnvFilter;

use autocar_ws_runtime::config::{DEFAULT_HOST, DEFAULT_PORT, DriveMode};
use autocar_ws_runtime::runtime::{self, Options, parse_override};

/// WebSocket control runtime for the car: drive motors and steering servo
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Configuration override, e.g. --set steering.sensitivity=1.2 (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_override)]
    overrides: Vec<(String, String)>,

    /// Drive motor strategy, fixed for the lifetime of the process
    #[arg(long, value_enum, default_value_t = DriveMode::Smoothed)]
    drive_mode: DriveMode,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let options = Options {
        host: args.host,
        port: args.port,
        overrides: args.overrides,
        drive_mode: args.drive_mode,
    };

    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
