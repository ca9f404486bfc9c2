//! Log-id counter and its recovery from the store.

use std::collections::BTreeSet;

use actionlog_core::model::LogId;
use actionlog_core::{ActionFilter, Sort};
use tracing::{error, info};

use crate::supervisor::Supervisor;

/// Highest log id handed out so far.
///
/// Ids stamped on writes that have not been acknowledged yet are tracked, so
/// a recovery racing those writes never moves the counter below them.
#[derive(Debug, Default)]
pub struct LogIdCounter {
    current: LogId,
    in_flight: BTreeSet<LogId>,
    /// Recoveries currently waiting on the store.
    recoveries: usize,
    /// Lower bound for the recovered value: ids in flight when the oldest
    /// running recovery started, and every id stamped since.
    floor: LogId,
}

impl LogIdCounter {
    pub fn current(&self) -> LogId {
        self.current
    }

    /// Advances the counter and returns the new id, tracked until [`settle`](Self::settle).
    pub fn assign(&mut self) -> LogId {
        self.current += 1;
        self.in_flight.insert(self.current);
        if self.recoveries > 0 {
            self.floor = self.floor.max(self.current);
        }
        self.current
    }

    /// The write stamped with `id` finished, successfully or not.
    pub fn settle(&mut self, id: LogId) {
        self.in_flight.remove(&id);
    }

    pub fn begin_recovery(&mut self) {
        if self.recoveries == 0 {
            self.floor = self.in_flight.last().copied().unwrap_or(0);
        }
        self.recoveries += 1;
    }

    /// Ends a recovery. `found` is the stored maximum (`0` for an empty
    /// store), `None` when the lookup failed and the counter is kept.
    pub fn finish_recovery(&mut self, found: Option<LogId>) {
        self.recoveries = self.recoveries.saturating_sub(1);
        if let Some(found) = found {
            self.current = found.max(self.floor);
        }
    }
}

/// Unwinds the recovery bookkeeping if the recovery future is dropped early.
struct RecoveryScope<'a> {
    sup: &'a Supervisor,
    finished: bool,
}

impl Drop for RecoveryScope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.sup.shared().log_ids.finish_recovery(None);
        }
    }
}

impl Supervisor {
    /// Recomputes the counter from the highest log id in the store, then
    /// drains the write buffer.
    ///
    /// Deletes can lower the stored maximum, so the counter is recomputed
    /// rather than trusted. A failed query leaves it untouched. Writes are
    /// held back until the first recovery of a connection has run.
    pub async fn recover_max_log_id(&self) {
        self.shared().log_ids.begin_recovery();
        let mut scope = RecoveryScope {
            sup: self,
            finished: false,
        };

        let top = self
            .timed(self.store().find_one(&ActionFilter::all(), Sort::LogIdDesc))
            .await;
        let found = match &top {
            Ok(Some(record)) => Some(record.log_id),
            Ok(None) => Some(0),
            Err(_) => None,
        };
        let current = {
            let mut shared = self.shared();
            shared.log_ids.finish_recovery(found);
            shared.recovered = true;
            shared.log_ids.current()
        };
        scope.finished = true;

        match top {
            Ok(Some(_)) => info!(max_log_id = current, "log id counter recovered"),
            Ok(None) => info!(max_log_id = current, "no stored actions, log id counter reset"),
            Err(e) => error!(error = %e, current, "max log id lookup failed, keeping counter"),
        }

        self.drain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_is_monotonic_from_recovered_point() {
        let mut counter = LogIdCounter::default();
        assert_eq!(counter.assign(), 1);
        counter.settle(1);
        counter.begin_recovery();
        counter.finish_recovery(Some(41));
        assert_eq!(counter.assign(), 42);
        assert_eq!(counter.assign(), 43);
        assert_eq!(counter.current(), 43);
    }

    #[test]
    fn failed_recovery_keeps_counter() {
        let mut counter = LogIdCounter::default();
        counter.assign();
        counter.assign();
        counter.begin_recovery();
        counter.finish_recovery(None);
        assert_eq!(counter.current(), 2);
    }

    #[test]
    fn recovery_never_drops_below_unacknowledged_ids() {
        let mut counter = LogIdCounter::default();
        for id in 1..=4 {
            assert_eq!(counter.assign(), id);
        }
        for id in 1..=3 {
            counter.settle(id);
        }

        // Store saw a delete of 3 and has not received 4 yet.
        counter.begin_recovery();
        assert_eq!(counter.assign(), 5);
        counter.finish_recovery(Some(2));
        assert_eq!(counter.current(), 5);
        assert_eq!(counter.assign(), 6);
    }

    #[test]
    fn settled_writes_do_not_hold_the_counter_up() {
        let mut counter = LogIdCounter::default();
        for id in 1..=3 {
            counter.assign();
            counter.settle(id);
        }
        counter.begin_recovery();
        counter.finish_recovery(Some(2));
        assert_eq!(counter.current(), 2);
    }
}
