//! Per-Operation Status Tracking
//!
//! Each logical operation instance (one approval, one deposit, ...)
//! carries its own `idle -> pending -> {success|error} -> idle` tracker.
//! Terminal states decay back to idle after a cooldown so the surface
//! can re-enable the action without anyone having to clear it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default decay back to idle after success/error.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Idle,
    Pending,
    Success,
    Error,
}

impl TxStatus {
    pub fn is_error(&self) -> bool {
        *self == TxStatus::Error
    }

    pub fn is_pending(&self) -> bool {
        *self == TxStatus::Pending
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxStatus::Idle => write!(f, "idle"),
            TxStatus::Pending => write!(f, "pending"),
            TxStatus::Success => write!(f, "success"),
            TxStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug)]
struct Slot {
    status: TxStatus,
    terminal_at: Option<Instant>,
}

#[derive(Debug)]
pub struct StatusTracker {
    cooldown: Duration,
    slot: Mutex<Slot>,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl StatusTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            slot: Mutex::new(Slot {
                status: TxStatus::Idle,
                terminal_at: None,
            }),
        }
    }

    /// Current status, applying the cooldown decay.
    pub fn current(&self) -> TxStatus {
        let mut slot = self.slot.lock().expect("status lock");
        if let Some(at) = slot.terminal_at {
            if at.elapsed() >= self.cooldown {
                slot.status = TxStatus::Idle;
                slot.terminal_at = None;
            }
        }
        slot.status
    }

    /// Move to pending. Returns false when the operation is already in
    /// flight; the caller must treat that as a no-op resubmission.
    pub fn try_begin(&self) -> bool {
        // run the decay first so a cooled-down terminal state re-arms
        let _ = self.current();
        let mut slot = self.slot.lock().expect("status lock");
        if slot.status == TxStatus::Pending {
            return false;
        }
        slot.status = TxStatus::Pending;
        slot.terminal_at = None;
        true
    }

    /// Terminal transition out of pending.
    pub fn finish(&self, success: bool) {
        let mut slot = self.slot.lock().expect("status lock");
        slot.status = if success { TxStatus::Success } else { TxStatus::Error };
        slot.terminal_at = Some(Instant::now());
    }

    /// Short-circuit straight to error (precondition violations never
    /// pass through pending).
    pub fn fail_fast(&self) {
        self.finish(false);
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_then_finish() {
        let t = StatusTracker::default();
        assert_eq!(t.current(), TxStatus::Idle);
        assert!(t.try_begin());
        assert_eq!(t.current(), TxStatus::Pending);
        t.finish(true);
        assert_eq!(t.current(), TxStatus::Success);
    }

    #[test]
    fn pending_rejects_reentry() {
        let t = StatusTracker::default();
        assert!(t.try_begin());
        assert!(!t.try_begin());
        t.finish(false);
        assert!(t.current().is_error());
    }

    #[tokio::test]
    async fn terminal_states_decay_to_idle() {
        let t = StatusTracker::new(Duration::from_millis(20));
        assert!(t.try_begin());
        t.finish(false);
        assert_eq!(t.current(), TxStatus::Error);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(t.current(), TxStatus::Idle);

        // and the tracker re-arms for the next attempt
        assert!(t.try_begin());
    }
}
