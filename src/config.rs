//! Protocol configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::DEFAULT_PORT;

/// Engine configuration. Timeouts and retry budgets are deployment knobs,
/// not protocol constants.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listening port (server) or target port (client).
    pub port: u16,

    /// Storage confinement boundary; every transferred path must resolve
    /// inside it.
    pub root_dir: PathBuf,

    /// Bound on each blocking receive. The retransmission clock.
    pub receive_timeout: Duration,

    /// Consecutive timeouts tolerated for one block before the transfer
    /// aborts.
    pub max_retries: u32,

    /// Ceiling on concurrently active server sessions; excess requests
    /// queue behind the pool.
    pub max_sessions: usize,

    /// Cap on request filename length in bytes. The wire format allows
    /// arbitrarily long names, so this is enforced as local policy.
    pub max_name_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            root_dir: PathBuf::from("."),
            receive_timeout: Duration::from_secs(5),
            max_retries: 3,
            max_sessions: 10,
            max_name_len: 255,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference active-role deployment: 5 second receive timeout.
    pub fn for_client() -> Self {
        Self::default()
    }

    /// Reference passive-role deployment: a more patient 10 second receive
    /// timeout, since the requester drives the pace.
    pub fn for_server() -> Self {
        Self {
            receive_timeout: Duration::from_secs(10),
            ..Self::default()
        }
    }
}
