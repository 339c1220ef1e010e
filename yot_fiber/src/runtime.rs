//! The scheduler and its event loop.
//!
//! The scheduler owns the `mio` poller and drives every fiber on the thread
//! that created it. Fibers reach it through a [`Handle`] obtained from
//! [`Scheduler::handle`]; there is no thread-local or global scheduler.

use std::any::Any;
use std::future::Future;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Context, Waker};
use std::time::Instant;

use log::{debug, error, info, trace};
use metrics::{counter, gauge};
use mio::{Events, Poll};

use crate::config::Config;
use crate::coroutine::WaitHandle;
use crate::error::{Error, Result};
use crate::handle::{Handle, Shared};
use crate::state::{State, Step};

/// A single-threaded cooperative scheduler.
///
/// Each turn of [`run`](Self::run) polls the OS for readiness, resumes the
/// fibers whose fds became ready (readers first, then writers), then the
/// fibers whose sleep expired, then fibers that were spawned or handed a
/// lock. It returns once no fiber waits on anything.
pub struct Scheduler {
    poll: Poll,
    events: Events,
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Creates a scheduler owned by the calling thread, with default config.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    /// Creates a scheduler owned by the calling thread.
    ///
    /// If `config.metrics_port` is set, this also installs the global
    /// Prometheus exporter; installing it twice in one process fails.
    ///
    /// # Arguments
    ///
    /// * `config` - Poll buffer size, metrics port and blocking-log capacity
    ///
    /// # Returns
    ///
    /// Returns `Ok(Scheduler)` on success, or an `Io` error if the poller or
    /// the metrics exporter cannot be set up.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let mut scheduler = Scheduler::with_config(Config::default().metrics_port(9000))?;
    /// scheduler.spawn(async { /* ... */ })?;
    /// scheduler.run()?;
    /// ```
    pub fn with_config(config: Config) -> Result<Self> {
        if let Some(port) = config.metrics_port {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], port))
                .install()
                .map_err(io::Error::other)?;
            info!("metrics enabled at http://localhost:{port}/metrics");
        }

        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let shared = Arc::new(Shared::new(
            registry,
            State::new(config.blocking_log_capacity),
        ));

        Ok(Self {
            poll,
            events: Events::with_capacity(config.events_capacity),
            shared,
        })
    }

    pub fn handle(&self) -> Handle {
        Handle::new(self.shared.clone())
    }

    /// Spawns a fiber; see [`Handle::spawn`].
    pub fn spawn<F>(&self, future: F) -> Result<WaitHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle().spawn(future)
    }

    /// Runs fibers until none of them waits on anything.
    ///
    /// # Errors
    ///
    /// `ForeignThread` when called off the owning thread, `Deadlock` when the
    /// only fibers left wait on locks, `Io` when polling fails.
    pub fn run(&mut self) -> Result<()> {
        self.shared.check_thread()?;

        loop {
            let timeout = match self.shared.state().next_step(Instant::now()) {
                Step::Poll(timeout) => timeout,
                Step::Quiescent => {
                    debug!("scheduler quiescent");
                    return Ok(());
                }
                Step::Deadlock(waiters) => return Err(Error::Deadlock { waiters }),
            };

            if let Err(e) = self.poll.poll(&mut self.events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            let ready = self
                .shared
                .state()
                .ready_fibers(self.shared.registry(), &self.events);
            self.resume_all(ready);

            let expired = self
                .shared
                .state()
                .expired_fibers(self.shared.registry(), Instant::now());
            self.resume_all(expired);

            let runnable = self.shared.state().take_runnable();
            self.resume_all(runnable);
        }
    }

    fn resume_all(&self, fibers: Vec<WaitHandle>) {
        for fiber in fibers {
            self.resume(fiber);
        }
    }

    /// Runs one fiber until it suspends, finishes or panics.
    ///
    /// The state lock is released for the duration of the resume so the
    /// fiber can use its handle.
    fn resume(&self, fiber: WaitHandle) {
        let mut coroutine = {
            let mut state = self.shared.state();
            let Some(coroutine) = state
                .fibers
                .get_mut(fiber)
                .and_then(|entry| entry.coroutine.take())
            else {
                debug!("skipping {fiber}: no longer alive");
                return;
            };
            state.current = Some(fiber);
            coroutine
        };

        trace!("resuming {fiber}");
        counter!("yot_fiber_resumes_total").increment(1);
        let mut cx = Context::from_waker(Waker::noop());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| coroutine.resume(&mut cx)));

        let mut state = self.shared.state();
        state.current = None;
        match outcome {
            Ok(std::task::Poll::Pending) if state.is_waiting(fiber) => {
                if let Some(entry) = state.fibers.get_mut(fiber) {
                    entry.coroutine = Some(coroutine);
                }
                return;
            }
            Ok(std::task::Poll::Pending) => {
                error!("{fiber} suspended outside a scheduler wait; dropping it")
            }
            Ok(std::task::Poll::Ready(())) => trace!("{fiber} finished"),
            Err(payload) => {
                counter!("yot_fiber_fiber_panics_total").increment(1);
                error!("{fiber} panicked: {}", panic_message(&*payload));
            }
        }

        let released = state.release(self.shared.registry(), fiber);
        drop(state);
        drop(released);
        drop(coroutine);
        gauge!("yot_fiber_fibers_live").decrement(1.0);
    }
}

impl Drop for Scheduler {
    // Unfinished fibers own handles to this scheduler. Their destructors may
    // call back into the handle, so they run after the state lock is released.
    fn drop(&mut self) {
        let abandoned = self.shared.state().shutdown(self.shared.registry());
        if abandoned.is_empty() {
            return;
        }
        debug!("dropping {} unfinished fiber(s)", abandoned.len());
        gauge!("yot_fiber_fibers_live").decrement(abandoned.len() as f64);
        drop(abandoned);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
