//! Bookkeeping for spans that block the OS thread itself.
//!
//! The scheduler does not change its behaviour around these spans; it only
//! records them so a higher layer can decide to offload such work.

use std::collections::VecDeque;
use std::panic::Location;
use std::time::{Duration, Instant};

use metrics::histogram;

use crate::coroutine::WaitHandle;
use crate::error::{Error, Result};

/// A finished blocking region.
#[derive(Debug, Clone)]
pub struct BlockingRegion {
    /// Where `exit_blocking_region` was called.
    pub location: &'static Location<'static>,
    /// The fiber that was running, `None` if entered from outside any fiber.
    pub fiber: Option<WaitHandle>,
    pub elapsed: Duration,
}

pub(crate) struct BlockingLog {
    open: Vec<(Instant, Option<WaitHandle>)>,
    finished: VecDeque<BlockingRegion>,
    capacity: usize,
}

impl BlockingLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            open: Vec::new(),
            finished: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn enter(&mut self, fiber: Option<WaitHandle>) {
        self.open.push((Instant::now(), fiber));
    }

    /// Closes the innermost open region.
    pub fn exit(&mut self, location: &'static Location<'static>) -> Result<Duration> {
        let (started, fiber) = self.open.pop().ok_or(Error::UnbalancedBlockingRegion)?;
        let elapsed = started.elapsed();
        histogram!("yot_fiber_blocking_region_seconds").record(elapsed.as_secs_f64());

        if self.capacity > 0 {
            if self.finished.len() == self.capacity {
                self.finished.pop_front();
            }
            self.finished.push_back(BlockingRegion {
                location,
                fiber,
                elapsed,
            });
        }
        Ok(elapsed)
    }

    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn finished(&self) -> Vec<BlockingRegion> {
        self.finished.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_without_enter_is_rejected() {
        let mut log = BlockingLog::new(4);
        assert!(matches!(
            log.exit(Location::caller()),
            Err(Error::UnbalancedBlockingRegion)
        ));
    }

    #[test]
    fn nested_regions_close_innermost_first() {
        let mut log = BlockingLog::new(4);
        log.enter(None);
        log.enter(None);
        assert_eq!(log.depth(), 2);

        log.exit(Location::caller()).unwrap();
        assert_eq!(log.depth(), 1);
        log.exit(Location::caller()).unwrap();
        assert_eq!(log.depth(), 0);
        assert_eq!(log.finished().len(), 2);
    }

    #[test]
    fn keeps_only_the_latest_regions() {
        let mut log = BlockingLog::new(2);
        for _ in 0..5 {
            log.enter(None);
            log.exit(Location::caller()).unwrap();
        }
        assert_eq!(log.finished().len(), 2);

        let mut silent = BlockingLog::new(0);
        silent.enter(None);
        silent.exit(Location::caller()).unwrap();
        assert!(silent.finished().is_empty());
    }
}
