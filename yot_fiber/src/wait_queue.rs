//! FIFO queues of fibers waiting for a lock hand-off.

use std::collections::{HashMap, VecDeque};

use crate::coroutine::WaitHandle;
use crate::sync::LockId;

/// A lock appears here only while at least one fiber waits on it.
#[derive(Default)]
pub(crate) struct WaitQueueTable {
    queues: HashMap<LockId, VecDeque<WaitHandle>>,
    waiters: usize,
}

impl WaitQueueTable {
    pub fn push(&mut self, lock: LockId, fiber: WaitHandle) {
        self.queues.entry(lock).or_default().push_back(fiber);
        self.waiters += 1;
    }

    /// Pops the head of `lock`'s queue, dropping the queue once it is empty.
    pub fn pop(&mut self, lock: LockId) -> Option<WaitHandle> {
        let queue = self.queues.get_mut(&lock)?;
        let fiber = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(&lock);
        }
        if fiber.is_some() {
            self.waiters -= 1;
        }
        fiber
    }

    /// Takes `fiber` out of `lock`'s queue, wherever it is.
    pub fn remove(&mut self, lock: LockId, fiber: WaitHandle) {
        let Some(queue) = self.queues.get_mut(&lock) else {
            return;
        };
        if let Some(at) = queue.iter().position(|&queued| queued == fiber) {
            queue.remove(at);
            self.waiters -= 1;
        }
        if queue.is_empty() {
            self.queues.remove(&lock);
        }
    }

    /// Keeps only the waiters for which `keep` holds; returns how many went.
    pub fn retain(&mut self, mut keep: impl FnMut(WaitHandle) -> bool) -> usize {
        let before = self.waiters;
        self.queues.retain(|_, queue| {
            queue.retain(|&fiber| keep(fiber));
            !queue.is_empty()
        });
        self.waiters = self.queues.values().map(VecDeque::len).sum();
        before - self.waiters
    }

    pub fn waiters(&self, lock: LockId) -> usize {
        self.queues.get(&lock).map_or(0, VecDeque::len)
    }

    /// Total number of queued fibers across all locks.
    pub fn len(&self) -> usize {
        self.waiters
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::handles as fibers;

    #[test]
    fn pops_in_fifo_order_and_drops_empty_queue() {
        let lock = LockId::next();
        let f = fibers(3);
        let mut queues = WaitQueueTable::default();
        for &fiber in &f {
            queues.push(lock, fiber);
        }
        assert_eq!(queues.waiters(lock), 3);

        assert_eq!(queues.pop(lock), Some(f[0]));
        assert_eq!(queues.pop(lock), Some(f[1]));
        assert_eq!(queues.waiters(lock), 1);
        assert_eq!(queues.pop(lock), Some(f[2]));

        assert!(queues.queues.is_empty());
        assert!(queues.is_empty());
        assert_eq!(queues.pop(lock), None);
    }

    #[test]
    fn locks_are_independent() {
        let (a, b) = (LockId::next(), LockId::next());
        let f = fibers(2);
        let mut queues = WaitQueueTable::default();
        queues.push(a, f[0]);
        queues.push(b, f[1]);

        assert_eq!(queues.pop(b), Some(f[1]));
        assert_eq!(queues.len(), 1);
        assert_eq!(queues.waiters(a), 1);
        assert_eq!(queues.waiters(b), 0);
    }

    #[test]
    fn retain_drops_emptied_queues() {
        let (a, b) = (LockId::next(), LockId::next());
        let f = fibers(3);
        let mut queues = WaitQueueTable::default();
        queues.push(a, f[0]);
        queues.push(a, f[1]);
        queues.push(b, f[2]);

        let removed = queues.retain(|fiber| fiber == f[1]);
        assert_eq!(removed, 2);
        assert!(!queues.queues.contains_key(&b));
        assert_eq!(queues.pop(a), Some(f[1]));
        assert!(queues.is_empty());
    }

    #[test]
    fn removing_last_waiter_drops_queue() {
        let lock = LockId::next();
        let f = fibers(2);
        let mut queues = WaitQueueTable::default();
        queues.push(lock, f[0]);
        queues.push(lock, f[1]);

        queues.remove(lock, f[0]);
        assert_eq!(queues.pop(lock), Some(f[1]));
        queues.push(lock, f[0]);
        queues.remove(lock, f[0]);
        assert!(queues.queues.is_empty());
        assert_eq!(queues.len(), 0);
    }
}
