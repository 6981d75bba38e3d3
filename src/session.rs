//! Transfer session plumbing shared by both roles.
//!
//! A [`Session`] owns one transfer's UDP socket (a fresh ephemeral endpoint,
//! the transfer ID), the peer address, and the last packet sent. Both roles
//! recover from loss the same way: retransmit the last outgoing packet and
//! count the timeout against the current block's budget. The two waiting
//! primitives here, [`Session::await_data`] and [`Session::await_ack`],
//! express that discipline once for the receive and send directions.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::policy::{classify, RetryBudget, Verdict};
use crate::BLOCK_SIZE;

/// Active-role engine state, transitioned only by the owning worker and
/// observed elsewhere through an atomic read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    Idle = 0,
    Active = 1,
    Cancelling = 2,
    Done = 3,
}

impl Lifecycle {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Lifecycle::Active,
            2 => Lifecycle::Cancelling,
            3 => Lifecycle::Done,
            _ => Lifecycle::Idle,
        }
    }
}

/// One transfer's private channel and bookkeeping.
pub struct Session {
    socket: UdpSocket,
    peer: SocketAddr,
    /// Until locked, the first reply from the peer's IP re-learns the
    /// ephemeral port the far side bound for this transfer.
    peer_locked: bool,
    receive_timeout: Duration,
    last_sent: Option<Vec<u8>>,
    bytes_moved: u64,
}

impl Session {
    /// Bind a fresh ephemeral endpoint for a transfer toward `peer`.
    ///
    /// The peer address stays unlocked: the far side answers from a new
    /// port of its own, learned from its first reply. The passive role,
    /// which already knows the exact peer endpoint, calls
    /// [`Session::lock_peer`] immediately after binding.
    pub async fn bind(peer: SocketAddr, receive_timeout: Duration) -> Result<Self> {
        let local: SocketAddr = match peer.ip() {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        Ok(Self {
            socket,
            peer,
            peer_locked: false,
            receive_timeout,
            last_sent: None,
            bytes_moved: 0,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Pin the session to its current peer address; packets from any other
    /// source are dropped as cross-talk from then on.
    pub fn lock_peer(&mut self) {
        self.peer_locked = true;
    }

    pub fn bytes_moved(&self) -> u64 {
        self.bytes_moved
    }

    pub fn add_bytes(&mut self, count: usize) {
        self.bytes_moved += count as u64;
    }

    /// Encode and transmit, retaining the wire bytes for retransmission.
    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        let bytes = packet.encode();
        self.socket.send_to(&bytes, self.peer).await?;
        debug!("sent {} ({} bytes) to {}", packet.kind(), bytes.len(), self.peer);
        self.last_sent = Some(bytes);
        Ok(())
    }

    /// Retransmit the last outgoing packet unchanged.
    pub async fn resend_last(&mut self) -> Result<()> {
        if let Some(bytes) = &self.last_sent {
            self.socket.send_to(bytes, self.peer).await?;
            debug!("retransmitted last packet ({} bytes)", bytes.len());
        }
        Ok(())
    }

    /// Receive the next packet from the session's peer.
    ///
    /// Bounded by the configured receive timeout as a hard deadline, so
    /// dropped cross-talk and undecodable datagrams never extend the wait.
    /// Returns [`Error::RecvTimeout`] when the window closes; the caller's
    /// retry loop decides what that costs.
    pub async fn recv(&mut self) -> Result<Packet> {
        // Larger than any valid datagram so an oversized DATA payload
        // arrives intact and gets rejected by policy, not truncated here.
        let mut buf = vec![0u8; 65535];
        let deadline = Instant::now() + self.receive_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::RecvTimeout);
            }
            match tokio::time::timeout(remaining, self.socket.recv_from(&mut buf)).await {
                Err(_) => return Err(Error::RecvTimeout),
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok((len, src))) => {
                    if !self.accept_source(src) {
                        warn!("dropping datagram from {src}: session peer is {}", self.peer);
                        continue;
                    }
                    match Packet::decode(&buf[..len]) {
                        Ok(packet) => {
                            debug!("received {} ({len} bytes) from {src}", packet.kind());
                            return Ok(packet);
                        }
                        Err(e) => {
                            warn!("skipping undecodable datagram from {src}: {e}");
                            continue;
                        }
                    }
                }
            }
        }
    }

    /// Validate a datagram source, locking onto the peer's transfer
    /// endpoint the first time it answers.
    fn accept_source(&mut self, src: SocketAddr) -> bool {
        if self.peer_locked {
            return src == self.peer;
        }
        if src.ip() != self.peer.ip() {
            return false;
        }
        self.peer = src;
        self.peer_locked = true;
        true
    }

    /// Wait for the data block `expected`, applying the shared policy.
    ///
    /// Duplicates of the previous block re-trigger the last outgoing packet
    /// (the ack that was evidently lost, or the initial request) without
    /// advancing state or spending budget. A block from anywhere else in the
    /// sequence is a protocol violation and aborts. Stray acks are logged
    /// and dropped. Timeouts retransmit and count against the budget.
    pub async fn await_data(&mut self, expected: u16, budget: &mut RetryBudget) -> Result<Bytes> {
        loop {
            match self.recv().await {
                Ok(Packet::Data { block, payload }) => match classify(expected, block) {
                    Verdict::Fresh => {
                        if payload.len() > BLOCK_SIZE {
                            return Err(Error::OversizedPayload { len: payload.len() });
                        }
                        budget.reset();
                        return Ok(payload);
                    }
                    Verdict::Duplicate => {
                        debug!("duplicate DATA block {block}, re-sending last ack");
                        self.resend_last().await?;
                    }
                    Verdict::Unexpected => {
                        return Err(Error::UnexpectedBlock {
                            expected,
                            got: block,
                        });
                    }
                },
                Ok(Packet::Ack { block }) => {
                    debug!("stray ACK {block} while expecting DATA, ignoring");
                }
                Ok(Packet::Error { code, message }) => {
                    return Err(Error::Peer { code, message });
                }
                Ok(other) => {
                    return Err(Error::UnexpectedOpcode {
                        expected: "DATA",
                        got: other.kind(),
                    });
                }
                Err(Error::RecvTimeout) => {
                    // Retransmit before charging the budget: the final
                    // retransmission goes out even when it exhausts it.
                    self.resend_last().await?;
                    let attempt = budget.record_timeout(expected)?;
                    debug!("timeout waiting for DATA block {expected} (attempt {attempt})");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Wait for the ack of `block`, applying the shared policy.
    ///
    /// A duplicate ack for the block already advanced past is logged and
    /// dropped. An ack from anywhere else in the sequence, or any other
    /// opcode, is handled like a timeout: retransmit the data packet and
    /// spend one attempt.
    pub async fn await_ack(&mut self, block: u16, budget: &mut RetryBudget) -> Result<()> {
        loop {
            match self.recv().await {
                Ok(Packet::Ack { block: got }) => match classify(block, got) {
                    Verdict::Fresh => {
                        budget.reset();
                        return Ok(());
                    }
                    Verdict::Duplicate => {
                        debug!("duplicate ACK {got}, dropping");
                    }
                    Verdict::Unexpected => {
                        warn!("unexpected ACK {got} while waiting for {block}");
                        self.resend_last().await?;
                        let attempt = budget.record_timeout(block)?;
                        debug!("treating as timeout (attempt {attempt})");
                    }
                },
                Ok(Packet::Error { code, message }) => {
                    return Err(Error::Peer { code, message });
                }
                Ok(other) => {
                    warn!("expected ACK, got {}", other.kind());
                    self.resend_last().await?;
                    let attempt = budget.record_timeout(block)?;
                    debug!("treating as timeout (attempt {attempt})");
                }
                Err(Error::RecvTimeout) => {
                    self.resend_last().await?;
                    let attempt = budget.record_timeout(block)?;
                    debug!("timeout waiting for ACK {block} (attempt {attempt})");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
