//! Passive role: dispatch loop and per-request session handlers.
//!
//! The dispatch loop owns the well-known port and does nothing but wait for
//! the next initiating packet; every accepted request runs as its own tokio
//! task on a fresh ephemeral socket, so concurrent transfers never share a
//! channel. A semaphore caps the number of simultaneously active sessions;
//! excess requests queue as pending tasks until a permit frees up.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::packet::{ErrorCode, Packet};
use crate::policy::{next_block, RetryBudget};
use crate::session::Session;
use crate::storage::{read_block, Storage};
use crate::BLOCK_SIZE;

/// Server-side engine: one dispatch loop, many independent sessions.
pub struct Server {
    config: Config,
    storage: Storage,
    socket: UdpSocket,
    sessions: Arc<Semaphore>,
    shutdown: Notify,
}

impl Server {
    /// Bind the well-known endpoint once. Port 0 picks an ephemeral port,
    /// handy for tests.
    pub async fn bind(config: Config) -> Result<Self> {
        let storage = Storage::new(config.root_dir.clone())?;
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.port)).await?;
        Ok(Self {
            sessions: Arc::new(Semaphore::new(config.max_sessions)),
            shutdown: Notify::new(),
            config,
            storage,
            socket,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Stop accepting new requests. In-flight sessions drain on their own.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Accept initiating packets until shut down.
    pub async fn run(&self) -> Result<()> {
        info!("TFTP server listening on {}", self.socket.local_addr()?);
        info!("root directory: {}", self.storage.root().display());

        let mut buf = vec![0u8; 65535];
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("TFTP server stopped");
                    return Ok(());
                }
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, peer)) => self.dispatch(&buf[..len], peer),
                        // Transient receive errors must not take the
                        // listener down; shutdown is the only exit.
                        Err(e) => warn!("receive error on the listen socket: {e}"),
                    }
                }
            }
        }
    }

    /// Hand one initiating packet to a session handler, or answer it with
    /// `illegal-operation` when it is not a request.
    fn dispatch(&self, datagram: &[u8], peer: SocketAddr) {
        let request = match Packet::decode(datagram) {
            Ok(packet @ (Packet::ReadRequest { .. } | Packet::WriteRequest { .. })) => packet,
            Ok(other) => {
                warn!("initiating packet from {peer} is {}, not a request", other.kind());
                let message = format!("illegal TFTP operation: {}", other.kind());
                tokio::spawn(reject(peer, message));
                return;
            }
            Err(e) => {
                warn!("undecodable initiating packet from {peer}: {e}");
                tokio::spawn(reject(peer, format!("malformed request: {e}")));
                return;
            }
        };

        let handler = SessionHandler {
            config: self.config.clone(),
            storage: self.storage.clone(),
            peer,
        };
        let pool = self.sessions.clone();
        tokio::spawn(async move {
            let Ok(_permit) = pool.acquire_owned().await else {
                return;
            };
            if let Err(e) = handler.run(request).await {
                warn!("session with {peer} aborted: {e}");
            }
        });
    }
}

/// Tell a peer its initiating packet was not a request. No session exists,
/// so the reply goes out on a throwaway socket.
async fn reject(peer: SocketAddr, message: String) {
    let local: SocketAddr = match peer.ip() {
        IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let reply = Packet::Error {
        code: ErrorCode::IllegalOperation,
        message,
    };
    match UdpSocket::bind(local).await {
        Ok(socket) => {
            let _ = socket.send_to(&reply.encode(), peer).await;
        }
        Err(e) => warn!("could not bind reject socket: {e}"),
    }
}

/// One inbound request, answered with the mirror-image transfer loop on a
/// private ephemeral endpoint.
struct SessionHandler {
    config: Config,
    storage: Storage,
    peer: SocketAddr,
}

impl SessionHandler {
    async fn run(self, request: Packet) -> Result<()> {
        let mut session = Session::bind(self.peer, self.config.receive_timeout).await?;
        session.lock_peer();

        let result = match &request {
            Packet::ReadRequest { filename } => self.handle_read(&mut session, filename).await,
            Packet::WriteRequest { filename } => self.handle_write(&mut session, filename).await,
            other => Err(Error::UnexpectedOpcode {
                expected: "RRQ or WRQ",
                got: other.kind(),
            }),
        };

        // One terminal notification per abort. A peer-reported error needs
        // no echo; the peer already knows.
        if let Err(e) = &result {
            if !matches!(e, Error::Peer { .. }) {
                let notice = Packet::Error {
                    code: e.wire_code(),
                    message: e.to_string(),
                };
                let _ = session.send(&notice).await;
            }
        }
        result
    }

    fn check_name(&self, filename: &str) -> Result<()> {
        if filename.len() > self.config.max_name_len {
            return Err(Error::NameTooLong {
                len: filename.len(),
                max: self.config.max_name_len,
            });
        }
        Ok(())
    }

    async fn handle_read(&self, session: &mut Session, filename: &str) -> Result<()> {
        info!("RRQ from {} for file: {filename}", self.peer);
        self.check_name(filename)?;
        let (mut file, size) = self.storage.open_read(filename).await?;
        info!("sending {filename} ({size} bytes) to {}", self.peer);

        let mut budget = RetryBudget::new(self.config.max_retries);
        let mut block: u16 = 1;
        let mut buf = vec![0u8; BLOCK_SIZE];
        loop {
            let chunk = read_block(&mut file, &mut buf).await?;
            session.send(&Packet::Data {
                block,
                payload: Bytes::copy_from_slice(&buf[..chunk]),
            })
            .await?;
            debug!("sent DATA block {block} ({chunk} bytes)");

            session.await_ack(block, &mut budget).await?;
            session.add_bytes(chunk);

            if chunk < BLOCK_SIZE {
                info!("file sent: {filename} ({} bytes)", session.bytes_moved());
                return Ok(());
            }
            block = next_block(block).ok_or(Error::BlockOverflow)?;
        }
    }

    async fn handle_write(&self, session: &mut Session, filename: &str) -> Result<()> {
        info!("WRQ from {} for file: {filename}", self.peer);
        self.check_name(filename)?;
        let mut file = self.storage.create_new(filename).await?;

        session.send(&Packet::Ack { block: 0 }).await?;
        debug!("sent initial ACK(0)");

        let outcome = match self.receive_data(session, &mut file).await {
            Ok(total) => file.flush().await.map(|_| total).map_err(Error::from),
            Err(e) => Err(e),
        };
        drop(file);

        match outcome {
            Ok(total) => {
                info!("file received: {filename} ({total} bytes)");
                Ok(())
            }
            Err(e) => {
                // Never keep a half-written file.
                self.storage.remove(filename).await;
                Err(e)
            }
        }
    }

    async fn receive_data(&self, session: &mut Session, file: &mut File) -> Result<u64> {
        let mut budget = RetryBudget::new(self.config.max_retries);
        let mut expected: u16 = 1;
        loop {
            let payload = session.await_data(expected, &mut budget).await?;
            file.write_all(&payload).await?;
            session.add_bytes(payload.len());
            debug!("received DATA block {expected} ({} bytes)", payload.len());

            session.send(&Packet::Ack { block: expected }).await?;

            if payload.len() < BLOCK_SIZE {
                return Ok(session.bytes_moved());
            }
            expected = next_block(expected).ok_or(Error::BlockOverflow)?;
        }
    }
}
