//! Readiness side of the scheduler.
//!
//! Fibers waiting for an fd to become readable or writable are tracked here,
//! and the fd is kept registered with the `mio` poller for exactly the
//! directions somebody waits on.

pub mod reactor;

use std::fmt;

use mio::Interest;

pub(crate) use reactor::ReadinessTable;

/// One side of an fd's readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Readable,
    Writable,
}

impl Direction {
    pub fn interest(self) -> Interest {
        match self {
            Direction::Readable => Interest::READABLE,
            Direction::Writable => Interest::WRITABLE,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Readable => f.write_str("readable"),
            Direction::Writable => f.write_str("writable"),
        }
    }
}
