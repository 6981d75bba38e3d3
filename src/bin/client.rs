//! TFTP client (active role).
//!
//! Downloads or uploads one file against a TFTP server, stop-and-wait.
//!
//! Usage:
//!   cargo run --release --bin tftp-client -- <get|put> <FILE> [OPTIONS]
//!
//! Examples:
//!   # Download a.txt into the current directory
//!   cargo run --release --bin tftp-client -- get a.txt -s 127.0.0.1:6969
//!
//!   # Upload b.bin from ./outbox
//!   cargo run --release --bin tftp-client -- put b.bin -s 127.0.0.1:6969 -d ./outbox

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use tftp::{Client, Config, EventSink};

enum Command {
    Get(String),
    Put(String),
}

struct ClientArgs {
    command: Command,
    server: SocketAddr,
    config: Config,
}

fn usage() -> ! {
    println!(
        r#"TFTP Client - stop-and-wait file transfer over UDP

Usage:
  cargo run --release --bin tftp-client -- <get|put> <FILE> [OPTIONS]

Commands:
  get <FILE>             Download FILE from the server
  put <FILE>             Upload FILE to the server

Options:
  -s, --server <ADDR>    Server address (default: 127.0.0.1:69)
  -d, --dir <DIR>        Local directory for files (default: .)
  --timeout <SECS>       Per-receive timeout in seconds (default: 5)
  --retries <N>          Retransmissions per block before aborting (default: 3)
  -h, --help             Show this help

Examples:
  cargo run --release --bin tftp-client -- get a.txt -s 127.0.0.1:6969
  cargo run --release --bin tftp-client -- put b.bin -s 127.0.0.1:6969 -d ./outbox
"#
    );
    std::process::exit(0);
}

fn parse_args() -> ClientArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::for_client();
    let mut server: SocketAddr = "127.0.0.1:69".parse().expect("default address");
    let mut command = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "get" => {
                if i + 1 < args.len() {
                    command = Some(Command::Get(args[i + 1].clone()));
                    i += 1;
                }
            }
            "put" => {
                if i + 1 < args.len() {
                    command = Some(Command::Put(args[i + 1].clone()));
                    i += 1;
                }
            }
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    server = args[i + 1].parse().expect("valid address required");
                    i += 1;
                }
            }
            "--dir" | "-d" => {
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
            "--help" | "-h" => usage(),
            _ => {}
        }
        i += 1;
    }

    let Some(command) = command else { usage() };
    ClientArgs {
        command,
        server,
        config,
    }
}

/// Prints status lines; the block-by-block trace goes to debug logging.
struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn on_status(&self, text: &str) {
        println!("{text}");
    }

    fn on_log(&self, text: &str) {
        debug!("{text}");
    }

    fn on_progress(&self, current: u64, total: u64) {
        if total > 0 {
            debug!("progress: {current}/{total} bytes");
        } else {
            debug!("progress: {current} bytes");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args();
    let client = Client::new(args.server, args.config, Arc::new(ConsoleSink))?;

    let result = match &args.command {
        Command::Get(file) => client.fetch(file).await,
        Command::Put(file) => client.store(file).await,
    };

    // The sink already reported the outcome; just set the exit status.
    if result.is_err() {
        std::process::exit(1);
    }
    Ok(())
}
