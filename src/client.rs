//! Active role: issues a request and drives the transfer.
//!
//! One [`Client`] runs at most one transfer at a time; a second request
//! while one is in flight is rejected without touching the network.
//! Cancellation is cooperative: [`Client::cancel`] flips a flag that the
//! loop observes between iterations, after the pending receive returns or
//! times out.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::EventSink;
use crate::packet::Packet;
use crate::policy::{next_block, RetryBudget};
use crate::session::{Lifecycle, Session};
use crate::storage::{read_block, Storage};
use crate::BLOCK_SIZE;

/// Client-side transfer engine.
pub struct Client {
    server: SocketAddr,
    config: Config,
    storage: Storage,
    sink: Arc<dyn EventSink>,
    state: AtomicU8,
}

impl Client {
    /// `server` is the well-known rendezvous endpoint; the data exchange
    /// moves to whatever ephemeral port the responder answers from.
    pub fn new(server: SocketAddr, config: Config, sink: Arc<dyn EventSink>) -> Result<Self> {
        let storage = Storage::new(config.root_dir.clone())?;
        Ok(Self {
            server,
            config,
            storage,
            sink,
            state: AtomicU8::new(Lifecycle::Idle as u8),
        })
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Request cancellation of the transfer in flight, if any. Takes effect
    /// once the current blocking receive completes or times out.
    pub fn cancel(&self) {
        let _ = self.state.compare_exchange(
            Lifecycle::Active as u8,
            Lifecycle::Cancelling as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Download `filename` from the server into the local directory,
    /// overwriting any existing copy. Returns the bytes received.
    pub async fn fetch(&self, filename: &str) -> Result<u64> {
        if let Err(e) = self.begin() {
            self.sink.on_status("Another transfer is in progress");
            return Err(e);
        }
        let result = self.run_fetch(filename).await;
        self.state.store(Lifecycle::Done as u8, Ordering::SeqCst);
        match &result {
            Ok(total) => {
                self.sink
                    .on_status(&format!("Download completed: {filename} ({total} bytes)"));
            }
            Err(e) => self.sink.on_status(&format!("Download failed: {e}")),
        }
        result
    }

    /// Upload a local file to the server under `filename`. Returns the
    /// bytes sent.
    pub async fn store(&self, filename: &str) -> Result<u64> {
        if let Err(e) = self.begin() {
            self.sink.on_status("Another transfer is in progress");
            return Err(e);
        }
        let result = self.run_store(filename).await;
        self.state.store(Lifecycle::Done as u8, Ordering::SeqCst);
        match &result {
            Ok(total) => {
                self.sink
                    .on_status(&format!("Upload completed: {filename} ({total} bytes)"));
            }
            Err(e) => self.sink.on_status(&format!("Upload failed: {e}")),
        }
        result
    }

    /// Claim the engine for one transfer, or refuse if one is running.
    fn begin(&self) -> Result<()> {
        for from in [Lifecycle::Idle, Lifecycle::Done] {
            if self
                .state
                .compare_exchange(
                    from as u8,
                    Lifecycle::Active as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                return Ok(());
            }
        }
        Err(Error::Busy)
    }

    fn cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) == Lifecycle::Cancelling as u8
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

    async fn run_fetch(&self, filename: &str) -> Result<u64> {
        self.check_name(filename)?;
        let mut file = self.storage.create_truncate(filename).await?;
        let mut session = Session::bind(self.server, self.config.receive_timeout).await?;
        let mut budget = RetryBudget::new(self.config.max_retries);

        self.sink.on_status(&format!("Starting download: {filename}"));
        session.send(&Packet::ReadRequest {
            filename: filename.into(),
        })
        .await?;
        self.sink.on_log(&format!("Sent RRQ for file: {filename}"));

        let mut expected: u16 = 1;
        loop {
            if self.cancelled() {
                return Err(Error::Cancelled);
            }

            let payload = session.await_data(expected, &mut budget).await?;
            file.write_all(&payload).await?;
            session.add_bytes(payload.len());
            self.sink.on_log(&format!(
                "Received DATA block {expected} ({} bytes)",
                payload.len()
            ));

            session.send(&Packet::Ack { block: expected }).await?;
            self.sink.on_progress(session.bytes_moved(), 0);

            if payload.len() < BLOCK_SIZE {
                file.flush().await?;
                info!(
                    "download of {filename} complete: {} bytes from {}",
                    session.bytes_moved(),
                    session.peer()
                );
                return Ok(session.bytes_moved());
            }
            expected = next_block(expected).ok_or(Error::BlockOverflow)?;
        }
    }

    async fn run_store(&self, filename: &str) -> Result<u64> {
        self.check_name(filename)?;
        let (mut file, size) = self.storage.open_read(filename).await?;
        let mut session = Session::bind(self.server, self.config.receive_timeout).await?;
        let mut budget = RetryBudget::new(self.config.max_retries);

        self.sink.on_status(&format!("Starting upload: {filename}"));
        session.send(&Packet::WriteRequest {
            filename: filename.into(),
        })
        .await?;
        self.sink
            .on_log(&format!("Sent WRQ for file: {filename} ({size} bytes)"));

        self.await_write_go_ahead(&mut session, &mut budget).await?;
        self.sink.on_log("Received initial ACK(0)");

        let mut block: u16 = 1;
        let mut buf = vec![0u8; BLOCK_SIZE];
        loop {
            if self.cancelled() {
                return Err(Error::Cancelled);
            }

            // A zero-length final chunk goes out when the file size is an
            // exact multiple of the block size; the short block is the only
            // end-of-transfer signal the peer gets.
            let chunk = read_block(&mut file, &mut buf).await?;
            session.send(&Packet::Data {
                block,
                payload: Bytes::copy_from_slice(&buf[..chunk]),
            })
            .await?;
            self.sink
                .on_log(&format!("Sent DATA block {block} ({chunk} bytes)"));

            session.await_ack(block, &mut budget).await?;
            session.add_bytes(chunk);
            self.sink.on_log(&format!("Received ACK for block {block}"));
            self.sink.on_progress(session.bytes_moved(), size);

            if chunk < BLOCK_SIZE {
                info!(
                    "upload of {filename} complete: {} bytes to {}",
                    session.bytes_moved(),
                    session.peer()
                );
                return Ok(session.bytes_moved());
            }
            block = next_block(block).ok_or(Error::BlockOverflow)?;
        }
    }

    /// Wait for `Ack{0}` answering the write request. Any other reply kind
    /// aborts before any data is sent; only timeouts are retried.
    async fn await_write_go_ahead(
        &self,
        session: &mut Session,
        budget: &mut RetryBudget,
    ) -> Result<()> {
        loop {
            match session.recv().await {
                Ok(Packet::Ack { block: 0 }) => {
                    budget.reset();
                    return Ok(());
                }
                Ok(Packet::Ack { block }) => {
                    return Err(Error::UnexpectedBlock {
                        expected: 0,
                        got: block,
                    });
                }
                Ok(Packet::Error { code, message }) => {
                    return Err(Error::Peer { code, message });
                }
                Ok(other) => {
                    return Err(Error::UnexpectedOpcode {
                        expected: "ACK",
                        got: other.kind(),
                    });
                }
                Err(Error::RecvTimeout) => {
                    session.resend_last().await?;
                    budget.record_timeout(0)?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NullSink;
    use std::time::Duration;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            root_dir: dir.into(),
            receive_timeout: Duration::from_millis(50),
            ..Config::default()
        }
    }

    fn test_client(dir: &std::path::Path, server: SocketAddr) -> Client {
        Client::new(server, test_config(dir), Arc::new(NullSink)).unwrap()
    }

    #[tokio::test]
    async fn test_busy_engine_rejects_second_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let client = test_client(dir.path(), "127.0.0.1:9".parse().unwrap());

        client.state.store(Lifecycle::Active as u8, Ordering::SeqCst);
        assert!(matches!(client.fetch("a.txt").await, Err(Error::Busy)));
        assert!(matches!(client.store("a.txt").await, Err(Error::Busy)));
        // Still active: the rejected calls must not have touched the state.
        assert_eq!(client.lifecycle(), Lifecycle::Active);
    }

    #[tokio::test]
    async fn test_store_requires_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let client = test_client(dir.path(), "127.0.0.1:9".parse().unwrap());
        assert!(matches!(
            client.store("missing.bin").await,
            Err(Error::NotFound { .. })
        ));
        // A finished engine accepts the next transfer.
        assert_eq!(client.lifecycle(), Lifecycle::Done);
        assert!(matches!(
            client.store("missing.bin").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_stops_fetch_between_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let responder = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = Arc::new(test_client(dir.path(), responder.local_addr().unwrap()));

        let worker = {
            let client = client.clone();
            tokio::spawn(async move { client.fetch("c.bin").await })
        };

        let mut buf = [0u8; 1024];
        let (len, peer) = responder.recv_from(&mut buf).await.unwrap();
        assert!(matches!(
            Packet::decode(&buf[..len]).unwrap(),
            Packet::ReadRequest { .. }
        ));

        // Flip the flag, then feed a full block so the loop comes back
        // around; whichever iteration checks next must stop the transfer.
        client.cancel();
        let block1 = Packet::Data {
            block: 1,
            payload: Bytes::from(vec![0u8; BLOCK_SIZE]),
        };
        responder.send_to(&block1.encode(), peer).await.unwrap();

        match worker.await.unwrap() {
            Err(Error::Cancelled) => {}
            other => panic!("expected cancellation, got {other:?}"),
        }
        // A cancelled engine settles in Done and accepts the next transfer.
        assert_eq!(client.lifecycle(), Lifecycle::Done);
    }

    #[tokio::test]
    async fn test_over_long_name_refused_before_any_datagram() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = test_client(dir.path(), watcher.local_addr().unwrap());

        let name = "n".repeat(300);
        match client.fetch(&name).await {
            Err(Error::NameTooLong { len: 300, max: 255 }) => {}
            other => panic!("expected name rejection, got {other:?}"),
        }
        // The refusal is local: no file created, nothing on the wire.
        assert!(!dir.path().join(&name).exists());
        let mut buf = [0u8; 64];
        assert!(
            tokio::time::timeout(Duration::from_millis(100), watcher.recv_from(&mut buf))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_fetch_retry_budget_observed_on_the_wire() {
        let dir = tempfile::tempdir().unwrap();
        let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = test_client(dir.path(), silent.local_addr().unwrap());

        let worker = tokio::spawn(async move { client.fetch("a.txt").await });

        // The original RRQ plus one retransmission per timeout, the last
        // of which goes out before the abort.
        let mut buf = [0u8; 1024];
        let mut rrqs = 0;
        for _ in 0..4 {
            let (len, _) = silent.recv_from(&mut buf).await.unwrap();
            assert!(matches!(
                Packet::decode(&buf[..len]).unwrap(),
                Packet::ReadRequest { .. }
            ));
            rrqs += 1;
        }
        assert_eq!(rrqs, 4);

        match worker.await.unwrap() {
            Err(Error::TimeoutExhausted { block: 1, attempts: 3 }) => {}
            other => panic!("expected timeout exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_store_aborts_on_rejected_request() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.bin"), vec![1u8; 100]).unwrap();

        let responder = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = test_client(dir.path(), responder.local_addr().unwrap());

        let worker = tokio::spawn(async move { client.store("b.bin").await });

        let mut buf = [0u8; 1024];
        let (len, from) = responder.recv_from(&mut buf).await.unwrap();
        assert!(matches!(
            Packet::decode(&buf[..len]).unwrap(),
            Packet::WriteRequest { .. }
        ));
        let reject = Packet::Error {
            code: crate::packet::ErrorCode::FileExists,
            message: "File already exists".into(),
        };
        responder.send_to(&reject.encode(), from).await.unwrap();

        match worker.await.unwrap() {
            Err(Error::Peer { code, .. }) => {
                assert_eq!(code, crate::packet::ErrorCode::FileExists);
            }
            other => panic!("expected peer error, got {other:?}"),
        }
        // No DATA may follow the rejection.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), responder.recv_from(&mut buf))
                .await
                .is_err()
        );
    }
}
