//! Errors returned by scheduler operations.
//!
//! Protocol violations (double registration, notifying an empty wait-queue,
//! calling in from a foreign thread) are reported to the caller of the
//! offending operation. A waiter that died while queued is not an error and
//! never shows up here.

use std::io;
use std::os::fd::RawFd;

use thiserror::Error;

use crate::coroutine::WaitHandle;
use crate::reactor::Direction;
use crate::sync::LockId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("fd {fd} is already watched for {direction} by another fiber")]
    AlreadyWatched { fd: RawFd, direction: Direction },

    #[error("notify_mutex on {0} with no waiters")]
    EmptyWaitQueue(LockId),

    #[error("scheduler used from a thread that does not own it")]
    ForeignThread,

    #[error("{0} is already suspended on another wait")]
    AlreadySuspended(WaitHandle),

    #[error("wait operation used outside of a fiber")]
    NotInFiber,

    #[error("cannot kill {0} while it is running")]
    KillRunning(WaitHandle),

    #[error("exit_blocking_region without a matching enter_blocking_region")]
    UnbalancedBlockingRegion,

    #[error("deadlock: {waiters} fiber(s) wait on locks that nothing can release")]
    Deadlock { waiters: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}
