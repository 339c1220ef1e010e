//! Scheduler tables and the transitions between them.
//!
//! Every suspended fiber is in exactly one of the readiness table, the timer
//! set or a wait-queue (a fiber in `wait_for_single_fd` with a timeout is in
//! the first two at once). A wait is always torn out of every table before
//! the fiber is resumed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use log::debug;
use metrics::counter;
use mio::{Events, Interest, Registry};

use crate::blocking::BlockingLog;
use crate::coroutine::{Coroutine, Fiber, FiberTable, WaitHandle};
use crate::error::{Error, Result};
use crate::reactor::{Direction, ReadinessTable};
use crate::sync::LockId;
use crate::timer::{TimerKey, TimerSet};
use crate::wait_queue::WaitQueueTable;

// Stand-in for "never" when a sleep would overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// What a fiber asks for when it suspends.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Request {
    Io {
        fd: RawFd,
        interest: Interest,
        timeout: Option<Duration>,
    },
    Sleep(Duration),
    Mutex(LockId),
}

/// What a suspended fiber is registered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wait {
    Io {
        fd: RawFd,
        interest: Interest,
        timer: Option<TimerKey>,
    },
    Sleep(TimerKey),
    Mutex(LockId),
}

/// Why a fiber was resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Io(Interest),
    Timer,
    /// Ownership of the lock passed to the resumed fiber.
    Handoff(LockId),
}

/// Outcome of [`State::next_step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Poll(Option<Duration>),
    Quiescent,
    Deadlock(usize),
}

/// Entry counts of the scheduler tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Fibers alive, suspended or not.
    pub fibers: usize,
    pub readable: usize,
    pub writable: usize,
    /// Timer entries, including stale ones not swept yet.
    pub timers: usize,
    pub mutex_waiters: usize,
    /// Fibers spawned or handed a lock, waiting for their turn.
    pub runnable: usize,
    /// Blocking regions entered and not exited yet.
    pub blocking: usize,
}

pub(crate) struct State {
    pub fibers: FiberTable,
    readiness: ReadinessTable,
    timers: TimerSet,
    wait_queues: WaitQueueTable,
    run_queue: VecDeque<WaitHandle>,
    /// Locks whose hand-off recipient died with nobody queued behind it.
    orphaned: HashSet<LockId>,
    pub blocking: BlockingLog,
    /// The fiber being resumed right now.
    pub current: Option<WaitHandle>,
}

impl State {
    pub fn new(blocking_log_capacity: usize) -> Self {
        Self {
            fibers: FiberTable::default(),
            readiness: ReadinessTable::default(),
            timers: TimerSet::default(),
            wait_queues: WaitQueueTable::default(),
            run_queue: VecDeque::new(),
            orphaned: HashSet::new(),
            blocking: BlockingLog::new(blocking_log_capacity),
            current: None,
        }
    }

    pub fn spawn(&mut self, coroutine: Box<dyn Coroutine>) -> WaitHandle {
        let fiber = self.fibers.insert(coroutine);
        self.run_queue.push_back(fiber);
        fiber
    }

    pub fn register(&mut self, registry: &Registry, fiber: WaitHandle, request: Request) -> Result<()> {
        match self.fibers.get(fiber) {
            Some(entry) if entry.wait.is_some() => return Err(Error::AlreadySuspended(fiber)),
            Some(_) => {}
            None => return Err(Error::NotInFiber),
        }

        let wait = match request {
            Request::Io {
                fd,
                interest,
                timeout,
            } => {
                self.readiness.watch(registry, fd, interest, fiber)?;
                let timer = timeout.map(|after| self.timers.insert(deadline(after), fiber));
                Wait::Io {
                    fd,
                    interest,
                    timer,
                }
            }
            Request::Sleep(after) => Wait::Sleep(self.timers.insert(deadline(after), fiber)),
            Request::Mutex(lock) => {
                self.wait_queues.push(lock, fiber);
                Wait::Mutex(lock)
            }
        };

        if let Some(entry) = self.fibers.get_mut(fiber) {
            entry.wait = Some(wait);
            entry.woken = None;
        }
        Ok(())
    }

    pub fn is_waiting(&self, fiber: WaitHandle) -> bool {
        self.fibers
            .get(fiber)
            .is_some_and(|entry| entry.wait.is_some())
    }

    pub fn take_woken(&mut self, fiber: WaitHandle) -> Option<Wake> {
        self.fibers.get_mut(fiber)?.woken.take()
    }

    /// Ends the current wait of `fiber` and records why.
    ///
    /// Readiness and timer entries are removed here. A wait-queue entry has
    /// already been popped by whoever called this for a hand-off.
    fn end_wait(&mut self, registry: &Registry, fiber: WaitHandle, wake: Wake) -> bool {
        let Some(entry) = self.fibers.get_mut(fiber) else {
            return false;
        };
        let Some(wait) = entry.wait.take() else {
            return false;
        };
        entry.woken = Some(wake);

        match wait {
            Wait::Io {
                fd,
                interest,
                timer,
            } => {
                self.readiness.unwatch(registry, fd, interest);
                if let Some(key) = timer {
                    self.timers.remove(key);
                }
            }
            Wait::Sleep(key) => {
                self.timers.remove(key);
            }
            Wait::Mutex(_) => {}
        }
        true
    }

    /// Drops the wait of a fiber that stopped waiting without being woken.
    ///
    /// A hand-off that was delivered but never taken is passed on.
    pub fn cancel(&mut self, registry: &Registry, fiber: WaitHandle) {
        let Some(entry) = self.fibers.get_mut(fiber) else {
            return;
        };
        let Some(wait) = entry.wait.take() else {
            if let Some(Wake::Handoff(lock)) = entry.woken.take() {
                debug!("{fiber} dropped its hand-off of {lock}");
                self.forward_handoff(registry, lock);
            }
            return;
        };
        debug!("{fiber} abandoned {wait:?}");

        match wait {
            Wait::Io {
                fd,
                interest,
                timer,
            } => {
                self.readiness.unwatch(registry, fd, interest);
                if let Some(key) = timer {
                    self.timers.remove(key);
                }
            }
            Wait::Sleep(key) => {
                self.timers.remove(key);
            }
            Wait::Mutex(lock) => self.wait_queues.remove(lock, fiber),
        }
    }

    /// Removes a finished or killed fiber.
    ///
    /// Its readiness and timer entries go with it. A place in a wait-queue
    /// stays and is skipped when the queue reaches it. A lock handed to it
    /// and not taken yet moves on to the next waiter.
    pub fn release(&mut self, registry: &Registry, fiber: WaitHandle) -> Option<Fiber> {
        let entry = self.fibers.remove(fiber)?;
        if let Some(Wake::Handoff(lock)) = entry.woken {
            debug!("{fiber} died holding an untaken hand-off of {lock}");
            self.forward_handoff(registry, lock);
        }
        match entry.wait {
            Some(Wait::Io {
                fd,
                interest,
                timer,
            }) => {
                self.readiness.unwatch(registry, fd, interest);
                if let Some(key) = timer {
                    self.timers.remove(key);
                }
            }
            Some(Wait::Sleep(key)) => {
                self.timers.remove(key);
            }
            Some(Wait::Mutex(_)) | None => {}
        }
        Some(entry)
    }

    /// Ends the readiness waits satisfied by `events`.
    ///
    /// Returns the fibers to resume: every read waiter before any write
    /// waiter. A fiber waiting on both directions appears once.
    pub fn ready_fibers(&mut self, registry: &Registry, events: &Events) -> Vec<WaitHandle> {
        // Events for one fd may be split; merge them, keeping first-seen order.
        let mut fired: HashMap<RawFd, (bool, bool)> = HashMap::new();
        let mut order = Vec::new();
        for event in events.iter() {
            let fd = event.token().0 as RawFd;
            let readable = event.is_readable() || event.is_read_closed() || event.is_error();
            let writable = event.is_writable() || event.is_write_closed() || event.is_error();
            let seen = fired.entry(fd).or_insert_with(|| {
                order.push(fd);
                (false, false)
            });
            seen.0 |= readable;
            seen.1 |= writable;
        }

        let mut woken = Vec::new();
        for direction in [Direction::Readable, Direction::Writable] {
            for &fd in &order {
                let (readable, writable) = fired[&fd];
                let hit = match direction {
                    Direction::Readable => readable,
                    Direction::Writable => writable,
                };
                if !hit {
                    continue;
                }
                let Some(fiber) = self.readiness.waiter(fd, direction) else {
                    continue;
                };

                let wanted = match self.fibers.get(fiber).and_then(|entry| entry.wait) {
                    Some(Wait::Io { interest, .. }) => interest,
                    _ => {
                        debug!("dropping stale {direction} entry of fd {fd} for {fiber}");
                        self.readiness.unwatch(registry, fd, direction.interest());
                        continue;
                    }
                };
                let delivered = interest_of(
                    readable && wanted.is_readable(),
                    writable && wanted.is_writable(),
                )
                .unwrap_or(direction.interest());

                if self.end_wait(registry, fiber, Wake::Io(delivered)) {
                    woken.push(fiber);
                }
            }
        }
        woken
    }

    /// Sweeps the timer set, returning due fibers earliest first.
    pub fn expired_fibers(&mut self, registry: &Registry, now: Instant) -> Vec<WaitHandle> {
        let mut woken = Vec::new();
        for (key, fiber) in self.timers.expire(now) {
            let owns = match self.fibers.get(fiber).and_then(|entry| entry.wait) {
                Some(Wait::Sleep(current)) => current == key,
                Some(Wait::Io {
                    timer: Some(current),
                    ..
                }) => current == key,
                _ => false,
            };
            if !owns {
                debug!("skipping stale timer of {fiber}");
                continue;
            }
            if self.end_wait(registry, fiber, Wake::Timer) {
                woken.push(fiber);
            }
        }
        counter!("yot_fiber_timers_fired_total").increment(woken.len() as u64);
        woken
    }

    /// Pops the head of `lock`'s wait-queue and queues it to run.
    ///
    /// Returns `None` if the head had died or stopped waiting; it is
    /// consumed either way.
    pub fn notify(&mut self, registry: &Registry, lock: LockId) -> Result<Option<WaitHandle>> {
        let fiber = self
            .wait_queues
            .pop(lock)
            .ok_or(Error::EmptyWaitQueue(lock))?;

        if !self.is_queued_on(fiber, lock) {
            debug!("{fiber} is gone from {lock}'s wait-queue; skipping");
            return Ok(None);
        }

        self.hand_off(registry, fiber, lock);
        Ok(Some(fiber))
    }

    /// Gives `lock` to the next live waiter, or marks it orphaned if none is
    /// left.
    fn forward_handoff(&mut self, registry: &Registry, lock: LockId) {
        while let Some(fiber) = self.wait_queues.pop(lock) {
            if self.is_queued_on(fiber, lock) {
                debug!("forwarding {lock} to {fiber}");
                self.hand_off(registry, fiber, lock);
                return;
            }
        }
        debug!("{lock} orphaned");
        self.orphaned.insert(lock);
    }

    fn hand_off(&mut self, registry: &Registry, fiber: WaitHandle, lock: LockId) {
        self.end_wait(registry, fiber, Wake::Handoff(lock));
        self.run_queue.push_back(fiber);
    }

    fn is_queued_on(&self, fiber: WaitHandle, lock: LockId) -> bool {
        matches!(
            self.fibers.get(fiber).and_then(|entry| entry.wait),
            Some(Wait::Mutex(waiting_on)) if waiting_on == lock
        )
    }

    /// Takes ownership of `lock` if its last recipient died without a
    /// successor. Returns `false` otherwise.
    pub fn reclaim(&mut self, lock: LockId) -> bool {
        self.orphaned.remove(&lock)
    }

    /// Empties every table, returning the fibers that were still alive.
    pub fn shutdown(&mut self, registry: &Registry) -> Vec<Fiber> {
        let fibers = self
            .fibers
            .handles()
            .into_iter()
            .filter_map(|fiber| self.release(registry, fiber))
            .collect();
        self.wait_queues = WaitQueueTable::default();
        self.run_queue.clear();
        self.orphaned.clear();
        fibers
    }

    pub fn waiters(&self, lock: LockId) -> usize {
        self.wait_queues.waiters(lock)
    }

    pub fn take_runnable(&mut self) -> Vec<WaitHandle> {
        self.run_queue.drain(..).collect()
    }

    #[cfg(test)]
    pub fn is_quiescent(&self) -> bool {
        self.readiness.is_empty()
            && self.timers.is_empty()
            && self.wait_queues.is_empty()
            && self.run_queue.is_empty()
    }

    /// Decides what the event loop does next.
    ///
    /// Once nothing but lock waiters is left, dead ones are purged; whoever
    /// remains can never be notified.
    pub fn next_step(&mut self, now: Instant) -> Step {
        if !self.run_queue.is_empty() {
            return Step::Poll(Some(Duration::ZERO));
        }
        if !self.readiness.is_empty() || !self.timers.is_empty() {
            return Step::Poll(self.timers.timeout(now));
        }

        let fibers = &self.fibers;
        let purged = self.wait_queues.retain(|fiber| fibers.is_alive(fiber));
        if purged > 0 {
            debug!("purged {purged} dead lock waiter(s)");
        }
        if self.wait_queues.is_empty() {
            Step::Quiescent
        } else {
            Step::Deadlock(self.wait_queues.len())
        }
    }

    pub fn stats(&self) -> Stats {
        Stats {
            fibers: self.fibers.len(),
            readable: self.readiness.readers(),
            writable: self.readiness.writers(),
            timers: self.timers.len(),
            mutex_waiters: self.wait_queues.len(),
            runnable: self.run_queue.len(),
            blocking: self.blocking.depth(),
        }
    }
}

fn deadline(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after).unwrap_or(now + FAR_FUTURE)
}

fn interest_of(readable: bool, writable: bool) -> Option<Interest> {
    match (readable, writable) {
        (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
        (true, false) => Some(Interest::READABLE),
        (false, true) => Some(Interest::WRITABLE),
        (false, false) => None,
    }
}
