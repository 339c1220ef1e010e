//! The handle fibers use to talk to their scheduler.
//!
//! A [`Handle`] is passed explicitly to every fiber that needs to wait. All
//! operations must run on the thread that created the scheduler; anything
//! else fails with [`Error::ForeignThread`].

use std::future::Future;
use std::os::fd::{AsRawFd, RawFd};
use std::panic::Location;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use log::debug;
use metrics::{counter, gauge};
use mio::{Interest, Registry};

use crate::blocking::BlockingRegion;
use crate::coroutine::{Coroutine, WaitHandle};
use crate::error::{Error, Result};
use crate::state::{Request, State, Stats, Wake};
use crate::suspend::Suspend;
use crate::sync::LockId;

pub(crate) struct Shared {
    owner: ThreadId,
    registry: Registry,
    state: Mutex<State>,
}

impl Shared {
    pub fn new(registry: Registry, state: State) -> Self {
        Self {
            owner: thread::current().id(),
            registry,
            state: Mutex::new(state),
        }
    }

    pub fn check_thread(&self) -> Result<()> {
        if thread::current().id() == self.owner {
            Ok(())
        } else {
            Err(Error::ForeignThread)
        }
    }

    // Never held across a resume, so a fiber panic cannot poison it midway
    // through an update.
    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Cloneable reference to a [`Scheduler`](crate::Scheduler).
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl Handle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Spawns a future as a new fiber.
    ///
    /// The fiber first runs on the next turn of the event loop, after the
    /// caller suspends or returns.
    ///
    /// # Arguments
    ///
    /// * `future` - The fiber body; it must be `Send + 'static`
    ///
    /// # Returns
    ///
    /// Returns the new fiber's `WaitHandle`, or `ForeignThread` if called off
    /// the scheduler's thread.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let worker = handle.clone();
    /// handle.spawn(async move {
    ///     worker.wait_sleep(Duration::from_millis(10)).await.unwrap();
    /// })?;
    /// ```
    pub fn spawn<F>(&self, future: F) -> Result<WaitHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn_coroutine(Box::pin(future))
    }

    /// Spawns any [`Coroutine`] as a new fiber.
    pub fn spawn_coroutine<C>(&self, coroutine: C) -> Result<WaitHandle>
    where
        C: Coroutine + 'static,
    {
        self.shared.check_thread()?;
        let fiber = self.shared.state().spawn(Box::new(coroutine));

        counter!("yot_fiber_fibers_spawned_total").increment(1);
        gauge!("yot_fiber_fibers_live").increment(1.0);
        debug!("spawned {fiber}");
        Ok(fiber)
    }

    /// The fiber currently running, `None` between resumes.
    pub fn current(&self) -> Option<WaitHandle> {
        self.shared.state().current
    }

    pub fn is_alive(&self, fiber: WaitHandle) -> bool {
        self.shared.state().fibers.is_alive(fiber)
    }

    /// Terminates a fiber that is not running right now.
    ///
    /// Its future is dropped. Returns `Ok(false)` if it had already finished.
    /// Readiness and timer registrations go at once; a place in a wait-queue
    /// is skipped when the queue reaches it.
    pub fn kill(&self, fiber: WaitHandle) -> Result<bool> {
        self.shared.check_thread()?;
        let released = {
            let mut state = self.shared.state();
            if state.current == Some(fiber) {
                return Err(Error::KillRunning(fiber));
            }
            state.release(self.shared.registry(), fiber)
        };

        let Some(released) = released else {
            return Ok(false);
        };
        drop(released);
        gauge!("yot_fiber_fibers_live").decrement(1.0);
        debug!("killed {fiber}");
        Ok(true)
    }

    /// Suspends the running fiber until `io` is readable.
    pub fn wait_readable<S>(&self, io: &S) -> impl Future<Output = Result<()>> + Send
    where
        S: AsRawFd + ?Sized,
    {
        self.wait_readable_fd(io.as_raw_fd())
    }

    pub async fn wait_readable_fd(&self, fd: RawFd) -> Result<()> {
        self.wait_any_fd(fd, Interest::READABLE).await.map(|_| ())
    }

    /// Suspends the running fiber until `io` is writable.
    pub fn wait_writable<S>(&self, io: &S) -> impl Future<Output = Result<()>> + Send
    where
        S: AsRawFd + ?Sized,
    {
        self.wait_writable_fd(io.as_raw_fd())
    }

    pub async fn wait_writable_fd(&self, fd: RawFd) -> Result<()> {
        self.wait_any_fd(fd, Interest::WRITABLE).await.map(|_| ())
    }

    /// Waits for any direction in `interest` and returns the ones that fired.
    ///
    /// Both registrations are dropped on wakeup, whichever side fired.
    pub fn wait_any<S>(
        &self,
        io: &S,
        interest: Interest,
    ) -> impl Future<Output = Result<Interest>> + Send
    where
        S: AsRawFd + ?Sized,
    {
        self.wait_any_fd(io.as_raw_fd(), interest)
    }

    pub async fn wait_any_fd(&self, fd: RawFd, interest: Interest) -> Result<Interest> {
        let wake = self
            .suspend(Request::Io {
                fd,
                interest,
                timeout: None,
            })
            .await?;
        match wake {
            Wake::Io(fired) => Ok(fired),
            Wake::Timer | Wake::Handoff(_) => Ok(interest),
        }
    }

    /// [`wait_any_fd`](Self::wait_any_fd) bounded by `timeout`.
    ///
    /// `Ok(None)` means the timeout elapsed first.
    pub async fn wait_for_single_fd(
        &self,
        fd: RawFd,
        interest: Interest,
        timeout: Option<Duration>,
    ) -> Result<Option<Interest>> {
        let wake = self
            .suspend(Request::Io {
                fd,
                interest,
                timeout,
            })
            .await?;
        match wake {
            Wake::Io(fired) => Ok(Some(fired)),
            Wake::Timer | Wake::Handoff(_) => Ok(None),
        }
    }

    /// Suspends the running fiber for at least `duration`.
    ///
    /// A zero duration still yields to the event loop once.
    pub async fn wait_sleep(&self, duration: Duration) -> Result<()> {
        self.suspend(Request::Sleep(duration)).await.map(|_| ())
    }

    /// Queues the running fiber on `lock` until [`notify_mutex`] hands the
    /// lock over.
    ///
    /// Returning `Ok` means the hand-off happened: the caller owns the lock
    /// and does not need to check again.
    ///
    /// [`notify_mutex`]: Self::notify_mutex
    pub async fn wait_mutex(&self, lock: LockId) -> Result<()> {
        self.suspend(Request::Mutex(lock)).await.map(|_| ())
    }

    /// Pops the next fiber waiting on `lock` and schedules it.
    ///
    /// Returns the fiber that received the hand-off, or `None` if the head of
    /// the queue had died; the dead entry is consumed either way, so callers
    /// keep notifying until a live waiter takes over or the queue is empty.
    ///
    /// # Errors
    ///
    /// `EmptyWaitQueue` if nobody waits on `lock`; `ForeignThread` if called
    /// off the scheduler's thread.
    pub fn notify_mutex(&self, lock: LockId) -> Result<Option<WaitHandle>> {
        self.shared.check_thread()?;
        let handed = self.shared.state().notify(self.shared.registry(), lock)?;
        if let Some(fiber) = handed {
            counter!("yot_fiber_mutex_handoffs_total").increment(1);
            debug!("handing {lock} to {fiber}");
        }
        Ok(handed)
    }

    /// Claims `lock` after the fiber it was handed to died before taking it
    /// and no other fiber was queued to receive it.
    ///
    /// Returns `true` at most once per such hand-off; the caller then owns
    /// the lock and is responsible for notifying or releasing it.
    pub fn reclaim_orphaned(&self, lock: LockId) -> bool {
        self.shared.check_thread().is_ok() && self.shared.state().reclaim(lock)
    }

    pub fn waiters(&self, lock: LockId) -> usize {
        self.shared.state().waiters(lock)
    }

    /// Marks the start of work that blocks the OS thread.
    pub fn enter_blocking_region(&self) -> Result<()> {
        self.shared.check_thread()?;
        let mut state = self.shared.state();
        let current = state.current;
        state.blocking.enter(current);
        Ok(())
    }

    /// Closes the innermost blocking region, recording the call site.
    #[track_caller]
    pub fn exit_blocking_region(&self) -> Result<Duration> {
        let location = Location::caller();
        self.shared.check_thread()?;
        self.shared.state().blocking.exit(location)
    }

    /// Runs `f` inside a blocking region.
    #[track_caller]
    pub fn blocking<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        self.enter_blocking_region()?;
        let value = f();
        self.exit_blocking_region()?;
        Ok(value)
    }

    /// The most recent finished blocking regions, oldest first.
    pub fn blocking_regions(&self) -> Vec<BlockingRegion> {
        self.shared.state().blocking.finished()
    }

    pub fn stats(&self) -> Stats {
        self.shared.state().stats()
    }

    fn suspend(&self, request: Request) -> Suspend<'_> {
        Suspend::new(&self.shared, request)
    }
}
