use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;

use log::{debug, warn};

use super::Direction;
use crate::coroutine::WaitHandle;
use crate::error::{Error, Result};

/// Maps watched fds to the fiber waiting on them, per direction.
///
/// # Architecture
///
/// - **Readers / writers**: independent tables, at most one waiter per fd
///   each. A second waiter is rejected instead of replacing the first.
/// - **Registered**: the interest currently registered with the poller for
///   each fd. It always equals the union of the directions with a waiter, so
///   a read waiter and a write waiter on the same fd share one registration.
///
/// The fd doubles as the `mio::Token`.
#[derive(Default)]
pub(crate) struct ReadinessTable {
    readers: HashMap<RawFd, WaitHandle>,
    writers: HashMap<RawFd, WaitHandle>,
    registered: HashMap<RawFd, Interest>,
}

impl ReadinessTable {
    /// Registers `fiber` as the waiter for every direction in `interest`.
    ///
    /// # Errors
    ///
    /// `AlreadyWatched` if any of the directions already has a waiter; in
    /// that case nothing is registered. `Io` if the poller refuses the fd.
    pub fn watch(
        &mut self,
        registry: &Registry,
        fd: RawFd,
        interest: Interest,
        fiber: WaitHandle,
    ) -> Result<()> {
        if interest.is_readable() && self.readers.contains_key(&fd) {
            return Err(Error::AlreadyWatched {
                fd,
                direction: Direction::Readable,
            });
        }
        if interest.is_writable() && self.writers.contains_key(&fd) {
            return Err(Error::AlreadyWatched {
                fd,
                direction: Direction::Writable,
            });
        }

        if interest.is_readable() {
            self.readers.insert(fd, fiber);
        }
        if interest.is_writable() {
            self.writers.insert(fd, fiber);
        }

        if let Err(e) = self.sync(registry, fd) {
            if interest.is_readable() {
                self.readers.remove(&fd);
            }
            if interest.is_writable() {
                self.writers.remove(&fd);
            }
            return Err(e.into());
        }

        debug!("{fiber} watching fd {fd} for {interest:?}");
        Ok(())
    }

    /// Drops the waiters for the directions in `interest`.
    ///
    /// Failing to update the poller is not fatal: the fd may already be
    /// closed, in which case the kernel dropped the registration itself.
    pub fn unwatch(&mut self, registry: &Registry, fd: RawFd, interest: Interest) {
        if interest.is_readable() {
            self.readers.remove(&fd);
        }
        if interest.is_writable() {
            self.writers.remove(&fd);
        }

        if let Err(e) = self.sync(registry, fd) {
            warn!("failed to update poller registration of fd {fd}: {e}");
            self.registered.remove(&fd);
        }
    }

    pub fn waiter(&self, fd: RawFd, direction: Direction) -> Option<WaitHandle> {
        match direction {
            Direction::Readable => self.readers.get(&fd).copied(),
            Direction::Writable => self.writers.get(&fd).copied(),
        }
    }

    pub fn readers(&self) -> usize {
        self.readers.len()
    }

    pub fn writers(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty() && self.writers.is_empty()
    }

    /// Brings the poller registration of `fd` in line with the waiters.
    fn sync(&mut self, registry: &Registry, fd: RawFd) -> io::Result<()> {
        let wanted = match (self.readers.contains_key(&fd), self.writers.contains_key(&fd)) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        };
        let token = Token(fd as usize);

        match (self.registered.get(&fd).copied(), wanted) {
            (None, Some(interest)) => registry.register(&mut SourceFd(&fd), token, interest)?,
            (Some(current), Some(interest)) if current != interest => {
                registry.reregister(&mut SourceFd(&fd), token, interest)?
            }
            (Some(_), None) => registry.deregister(&mut SourceFd(&fd))?,
            _ => {}
        }

        match wanted {
            Some(interest) => self.registered.insert(fd, interest),
            None => self.registered.remove(&fd),
        };
        Ok(())
    }
}
