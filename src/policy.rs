//! Retry/duplicate policy.
//!
//! The one decision discipline shared by both roles: is a received block
//! number fresh, a replay of the block just satisfied, or a violation; and
//! has the retransmission budget for the current block run out.

use crate::error::{Error, Result};

/// Classification of a received data-or-ack block number against the
/// currently expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// In order. Advance state and reset the retry counter.
    Fresh,

    /// Replay of the most recent prior block. Retransmit the last outgoing
    /// packet (receiver) or drop it (sender); never advance state.
    Duplicate,

    /// Anything else. Protocol violation for a receiver; treated like a
    /// timeout by a sender awaiting an ack.
    Unexpected,
}

/// Compare a received block number against the expected one, mod 65536.
pub fn classify(expected: u16, received: u16) -> Verdict {
    if received == expected {
        Verdict::Fresh
    } else if received == expected.wrapping_sub(1) {
        Verdict::Duplicate
    } else {
        Verdict::Unexpected
    }
}

/// Next block number, or `None` when the counter would wrap.
///
/// Wrapping from 65535 back to 0 is a hard transfer-size violation: the
/// protocol cannot represent more than 65535 blocks, so the transfer must
/// abort before the counter reuses a number.
pub fn next_block(block: u16) -> Option<u16> {
    block.checked_add(1)
}

/// Consecutive-timeout budget, scoped to the current block only.
#[derive(Debug)]
pub struct RetryBudget {
    attempts: u32,
    max: u32,
}

impl RetryBudget {
    pub fn new(max: u32) -> Self {
        Self { attempts: 0, max }
    }

    /// Record one timeout for the current block. Returns the attempt count,
    /// or [`Error::TimeoutExhausted`] once the budget is consumed.
    pub fn record_timeout(&mut self, block: u16) -> Result<u32> {
        self.attempts += 1;
        if self.attempts >= self.max {
            return Err(Error::TimeoutExhausted {
                block,
                attempts: self.attempts,
            });
        }
        Ok(self.attempts)
    }

    /// Any valid in-order packet resets the counter to zero.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify(5, 5), Verdict::Fresh);
        assert_eq!(classify(5, 4), Verdict::Duplicate);
        assert_eq!(classify(5, 6), Verdict::Unexpected);
        assert_eq!(classify(5, 900), Verdict::Unexpected);
        // Duplicate detection wraps mod 65536.
        assert_eq!(classify(0, 65535), Verdict::Duplicate);
        assert_eq!(classify(1, 0), Verdict::Duplicate);
    }

    #[test]
    fn test_budget_exhausts_after_max() {
        let mut budget = RetryBudget::new(3);
        assert_eq!(budget.record_timeout(7).unwrap(), 1);
        assert_eq!(budget.record_timeout(7).unwrap(), 2);
        match budget.record_timeout(7) {
            Err(Error::TimeoutExhausted { block: 7, attempts: 3 }) => {}
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn test_budget_reset_on_progress() {
        let mut budget = RetryBudget::new(3);
        budget.record_timeout(1).unwrap();
        budget.record_timeout(1).unwrap();
        budget.reset();
        assert_eq!(budget.attempts(), 0);
        assert_eq!(budget.record_timeout(2).unwrap(), 1);
    }

    #[test]
    fn test_next_block_wraparound_is_fatal() {
        assert_eq!(next_block(1), Some(2));
        assert_eq!(next_block(65534), Some(65535));
        assert_eq!(next_block(65535), None);
    }
}
