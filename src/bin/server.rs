//! TFTP server (passive role).
//!
//! Answers read and write requests against one root directory, each on its
//! own ephemeral port, stop-and-wait all the way.
//!
//! Usage:
//!   cargo run --release --bin tftp-server -- [OPTIONS]
//!
//! Examples:
//!   # Serve ./files on the well-known port (needs privileges for 69)
//!   cargo run --release --bin tftp-server -- --root ./files
//!
//!   # Unprivileged port, patient timeouts
//!   cargo run --release --bin tftp-server -- -p 6969 --timeout 20

use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use tftp::{Config, Server};

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::for_server();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    config.port = args[i + 1].parse().expect("valid port required");
                    i += 1;
                }
            }
            "--root" | "-d" => {
                if i + 1 < args.len() {
                    config.root_dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--timeout" => {
                if i + 1 < args.len() {
                    let secs: u64 = args[i + 1].parse().expect("valid number required");
                    config.receive_timeout = Duration::from_secs(secs);
                    i += 1;
                }
            }
            "--retries" => {
                if i + 1 < args.len() {
                    config.max_retries = args[i + 1].parse().expect("valid number required");
                    i += 1;
                }
            }
            "--sessions" => {
                if i + 1 < args.len() {
                    config.max_sessions = args[i + 1].parse().expect("valid number required");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"TFTP Server - stop-and-wait file transfer over UDP

Serves read and write requests for files under one root directory.
Each transfer runs on its own ephemeral port; one data block is in
flight at a time.

Usage:
  cargo run --release --bin tftp-server -- [OPTIONS]

Options:
  -p, --port <PORT>      Listening port (default: 69)
  -d, --root <DIR>       Root directory served (default: .)
  --timeout <SECS>       Per-receive timeout in seconds (default: 10)
  --retries <N>          Retransmissions per block before aborting (default: 3)
  --sessions <N>         Max concurrently active transfers (default: 10)
  -h, --help             Show this help

Examples:
  # Serve ./files on an unprivileged port
  cargo run --release --bin tftp-server -- -p 6969 -d ./files
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = parse_args();

    info!("TFTP server starting...");
    info!("port: {}", config.port);
    info!("root directory: {}", config.root_dir.display());
    info!(
        "receive timeout: {:?}, retries per block: {}",
        config.receive_timeout, config.max_retries
    );

    let server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
            server.shutdown();
        }
    }

    Ok(())
}
