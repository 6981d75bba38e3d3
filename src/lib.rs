//! # TFTP (Trivial File Transfer Protocol)
//!
//! Minimal stop-and-wait file transfer over UDP, octet mode only.
//!
//! ## Core pieces
//! - **Packet codec**: the five wire messages (RRQ/WRQ/DATA/ACK/ERROR)
//! - **Retry/duplicate policy**: one discipline shared by both roles
//! - **Active role**: [`Client`] issues a request and drives the transfer
//! - **Passive role**: [`Server`] answers each request on a fresh ephemeral
//!   port (the transfer-ID mechanism), one tokio task per session
//!
//! Exactly one unacknowledged packet is ever in flight; loss is detected by
//! a per-receive timeout and recovered by retransmitting the last outgoing
//! packet, at most [`Config::max_retries`] times per block.

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod packet;
pub mod policy;
pub mod server;
pub mod session;
pub mod storage;

pub use client::Client;
pub use config::Config;
pub use error::{Error, Result};
pub use event::{EventSink, NullSink, TraceSink};
pub use packet::{DecodeError, ErrorCode, Packet};
pub use server::Server;
pub use storage::Storage;

/// Well-known rendezvous port.
pub const DEFAULT_PORT: u16 = 69;

/// Fixed data block size (bytes). A shorter payload marks the final block.
pub const BLOCK_SIZE: usize = 512;

/// Largest datagram either side ever sends: 4-byte header + one full block.
pub const MAX_PACKET_SIZE: usize = 516;
