//! Transfer progress reporting.
//!
//! The engine emits plain status, log and progress events through this
//! narrow synchronous contract; rendering them (console, GUI, nothing) is
//! the consumer's concern, never the engine's.

use tracing::{debug, info};

/// Sink for transfer events. All methods default to no-ops so a consumer
/// implements only what it renders.
pub trait EventSink: Send + Sync {
    /// Coarse, user-facing state change ("Starting download: a.txt").
    fn on_status(&self, _text: &str) {}

    /// Fine-grained trace of the exchange ("Received DATA block 3").
    fn on_log(&self, _text: &str) {}

    /// Bytes moved so far. `total` is 0 when the final size is unknown,
    /// which is always the case for a download in flight.
    fn on_progress(&self, _current: u64, _total: u64) {}
}

/// Discards every event.
pub struct NullSink;

impl EventSink for NullSink {}

/// Forwards events to `tracing`.
pub struct TraceSink;

impl EventSink for TraceSink {
    fn on_status(&self, text: &str) {
        info!("{text}");
    }

    fn on_log(&self, text: &str) {
        debug!("{text}");
    }

    fn on_progress(&self, current: u64, total: u64) {
        debug!("progress: {current}/{total} bytes");
    }
}
