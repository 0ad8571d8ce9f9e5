//! Per-mailbox counters

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MailboxStats {
    pub received: AtomicU64,
    pub dispatched: AtomicU64,
    pub acks_correlated: AtomicU64,
    pub callback_failures: AtomicU64,
    pub commands_staged: AtomicU64,
    pub unresolved_recipients: AtomicU64,
    pub silent_drops: AtomicU64,
    pub shutdown_acks: AtomicU64,
    /// Drain attempts refused because another drain was running
    pub contended_drains: AtomicU64,
}

impl MailboxStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MailboxStatsSnapshot {
        MailboxStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            acks_correlated: self.acks_correlated.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
            commands_staged: self.commands_staged.load(Ordering::Relaxed),
            unresolved_recipients: self.unresolved_recipients.load(Ordering::Relaxed),
            silent_drops: self.silent_drops.load(Ordering::Relaxed),
            shutdown_acks: self.shutdown_acks.load(Ordering::Relaxed),
            contended_drains: self.contended_drains.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`MailboxStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStatsSnapshot {
    pub received: u64,
    pub dispatched: u64,
    pub acks_correlated: u64,
    pub callback_failures: u64,
    pub commands_staged: u64,
    pub unresolved_recipients: u64,
    pub silent_drops: u64,
    pub shutdown_acks: u64,
    pub contended_drains: u64,
}
