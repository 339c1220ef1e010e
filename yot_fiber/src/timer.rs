//! Fibers sleeping until an absolute deadline.
//!
//! Entries are ordered by deadline, then by insertion order, so fibers that
//! share a deadline wake in the order they went to sleep.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::coroutine::WaitHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct TimerKey {
    at: Instant,
    seq: u64,
}

#[derive(Default)]
pub(crate) struct TimerSet {
    entries: BTreeMap<TimerKey, WaitHandle>,
    next_seq: u64,
}

impl TimerSet {
    pub fn insert(&mut self, at: Instant, fiber: WaitHandle) -> TimerKey {
        let key = TimerKey {
            at,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, fiber);
        key
    }

    pub fn remove(&mut self, key: TimerKey) -> Option<WaitHandle> {
        self.entries.remove(&key)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|key| key.at)
    }

    /// Time left until the earliest deadline, zero if it already passed.
    pub fn timeout(&self, now: Instant) -> Option<Duration> {
        self.next_deadline()
            .map(|at| at.saturating_duration_since(now))
    }

    /// Removes and returns every entry due at `now`, earliest first.
    ///
    /// Entries inserted while the caller works through the result land in
    /// the set for a later sweep, never in the batch being processed.
    pub fn expire(&mut self, now: Instant) -> Vec<(TimerKey, WaitHandle)> {
        let pending = self.entries.split_off(&TimerKey {
            at: now,
            seq: u64::MAX,
        });
        std::mem::replace(&mut self.entries, pending)
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::handles as fibers;

    #[test]
    fn expires_in_deadline_order() {
        let now = Instant::now();
        let f = fibers(3);
        let mut timers = TimerSet::default();

        timers.insert(now + Duration::from_millis(30), f[0]);
        timers.insert(now + Duration::from_millis(10), f[1]);
        timers.insert(now + Duration::from_millis(20), f[2]);
        assert_eq!(timers.next_deadline(), Some(now + Duration::from_millis(10)));

        let woken: Vec<_> = timers
            .expire(now + Duration::from_millis(25))
            .into_iter()
            .map(|(_, fiber)| fiber)
            .collect();
        assert_eq!(woken, vec![f[1], f[2]]);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_deadline(), Some(now + Duration::from_millis(30)));
    }

    #[test]
    fn equal_deadlines_keep_insertion_order() {
        let at = Instant::now();
        let f = fibers(4);
        let mut timers = TimerSet::default();
        for fiber in [f[2], f[0], f[3], f[1]] {
            timers.insert(at, fiber);
        }

        let woken: Vec<_> = timers.expire(at).into_iter().map(|(_, f)| f).collect();
        assert_eq!(woken, vec![f[2], f[0], f[3], f[1]]);
        assert!(timers.is_empty());
    }

    #[test]
    fn nothing_due_leaves_set_untouched() {
        let now = Instant::now();
        let f = fibers(1);
        let mut timers = TimerSet::default();
        let key = timers.insert(now + Duration::from_secs(5), f[0]);

        assert!(timers.expire(now).is_empty());
        assert_eq!(timers.timeout(now), Some(Duration::from_secs(5)));
        assert_eq!(timers.remove(key), Some(f[0]));
        assert_eq!(timers.timeout(now), None);
    }

    #[test]
    fn past_deadline_gives_zero_timeout() {
        let now = Instant::now();
        let f = fibers(1);
        let mut timers = TimerSet::default();
        timers.insert(now, f[0]);

        assert_eq!(
            timers.timeout(now + Duration::from_millis(1)),
            Some(Duration::ZERO)
        );
    }
}
