#![forbid(unsafe_code)]

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};

/// Identifies one fetch issued by the synchronizer: the mount epoch it belongs to and its
/// issue order within that epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FetchTicket {
    pub epoch: u64,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The consuming view was torn down or the session was lost.
    DiscardedClosed,
    /// Issued under an earlier mount of the consuming view.
    DiscardedStaleEpoch,
    /// A later-issued fetch has already been applied.
    DiscardedSuperseded,
}

impl ApplyOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }
}

/// Admission rule for stats responses.
///
/// A response applies only while the gate is open, within the epoch it was issued in, and
/// only if no later-issued response has been applied. Closing bumps the epoch, so every
/// ticket issued before the close is rejected forever.
#[derive(Debug, Clone, Default)]
pub struct PollGate {
    open: bool,
    epoch: u64,
    next_seq: u64,
    last_applied_seq: u64,
    issued_total: u64,
    applied_total: u64,
    discarded_total: u64,
}

impl PollGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn issued_total(&self) -> u64 {
        self.issued_total
    }

    pub fn applied_total(&self) -> u64 {
        self.applied_total
    }

    pub fn discarded_total(&self) -> u64 {
        self.discarded_total
    }

    /// Returns false if the gate was already open.
    pub fn open(&mut self) -> bool {
        if self.open {
            return false;
        }
        self.open = true;
        self.epoch = self.epoch.wrapping_add(1);
        self.next_seq = 0;
        self.last_applied_seq = 0;
        true
    }

    /// Returns false if the gate was already closed.
    pub fn close(&mut self) -> bool {
        if !self.open {
            return false;
        }
        self.open = false;
        self.epoch = self.epoch.wrapping_add(1);
        true
    }

    pub fn issue(&mut self) -> Option<FetchTicket> {
        if !self.open {
            return None;
        }
        self.next_seq += 1;
        self.issued_total = self.issued_total.saturating_add(1);
        Some(FetchTicket {
            epoch: self.epoch,
            seq: self.next_seq,
        })
    }

    /// Read-only form of [`PollGate::admit`].
    pub fn check(&self, ticket: FetchTicket) -> ApplyOutcome {
        if !self.open {
            ApplyOutcome::DiscardedClosed
        } else if ticket.epoch != self.epoch {
            ApplyOutcome::DiscardedStaleEpoch
        } else if ticket.seq <= self.last_applied_seq {
            ApplyOutcome::DiscardedSuperseded
        } else {
            ApplyOutcome::Applied
        }
    }

    pub fn admit(&mut self, ticket: FetchTicket) -> ApplyOutcome {
        let outcome = self.check(ticket);
        if outcome.is_applied() {
            self.last_applied_seq = ticket.seq;
            self.applied_total = self.applied_total.saturating_add(1);
        } else {
            self.discarded_total = self.discarded_total.saturating_add(1);
        }
        outcome
    }
}

/// Timer-driven fetch schedule bound to the lifetime of a consuming view.
///
/// Every tick asks `on_tick` for one fetch and runs it without waiting for the previous one,
/// so a slow response never shifts the cadence. Returning `None` ends the schedule. Dropping
/// the handle aborts the ticker together with every fetch still in flight.
#[derive(Debug)]
pub struct PollHandle {
    ticker: JoinHandle<()>,
}

impl PollHandle {
    pub fn spawn<F, Fut>(runtime: &Handle, cadence: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> Option<Fut> + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ticker = runtime.spawn(async move {
            let mut interval = time::interval(cadence);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut in_flight = JoinSet::new();
            loop {
                interval.tick().await;
                while in_flight.try_join_next().is_some() {}
                match on_tick() {
                    Some(fetch) => {
                        in_flight.spawn(fetch);
                    }
                    None => break,
                }
            }
        });
        Self { ticker }
    }

}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn at_poll_01_late_response_never_overwrites_newer_one() {
        let mut gate = PollGate::new();
        assert!(gate.open());
        let first = gate.issue().unwrap();
        let second = gate.issue().unwrap();
        assert_eq!(gate.admit(second), ApplyOutcome::Applied);
        assert_eq!(gate.admit(first), ApplyOutcome::DiscardedSuperseded);
        let third = gate.issue().unwrap();
        assert_eq!(gate.admit(third), ApplyOutcome::Applied);
        assert_eq!(gate.applied_total(), 2);
        assert_eq!(gate.discarded_total(), 1);
    }

    #[test]
    fn at_poll_02_close_rejects_everything_in_flight() {
        let mut gate = PollGate::new();
        gate.open();
        let ticket = gate.issue().unwrap();
        assert!(gate.close());
        assert!(!gate.close());
        assert_eq!(gate.admit(ticket), ApplyOutcome::DiscardedClosed);
        assert!(gate.issue().is_none());

        gate.open();
        assert_eq!(gate.admit(ticket), ApplyOutcome::DiscardedStaleEpoch);
        let fresh = gate.issue().unwrap();
        assert_eq!(fresh.seq, 1);
        assert_eq!(gate.admit(fresh), ApplyOutcome::Applied);
    }

    #[tokio::test(start_paused = true)]
    async fn at_poll_03_ticks_on_fixed_cadence_from_mount() {
        let ticks = Arc::new(AtomicU64::new(0));
        let counter = ticks.clone();
        let handle = PollHandle::spawn(&Handle::current(), Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(async {})
        });
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        time::sleep(Duration::from_millis(3_000)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 4);
        drop(handle);
        time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn at_poll_04_slow_fetch_does_not_delay_next_tick() {
        let started = Arc::new(AtomicU64::new(0));
        let finished = Arc::new(AtomicU64::new(0));
        let (s, f) = (started.clone(), finished.clone());
        let handle = PollHandle::spawn(&Handle::current(), Duration::from_secs(1), move || {
            s.fetch_add(1, Ordering::SeqCst);
            let f = f.clone();
            Some(async move {
                time::sleep(Duration::from_millis(2_500)).await;
                f.fetch_add(1, Ordering::SeqCst);
            })
        });
        time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        drop(handle);
        time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn at_poll_05_none_from_tick_ends_schedule() {
        let ticks = Arc::new(AtomicU64::new(0));
        let counter = ticks.clone();
        let _handle = PollHandle::spawn(&Handle::current(), Duration::from_secs(1), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            (n < 2).then_some(async {})
        });
        time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }
}
