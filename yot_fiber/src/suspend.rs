use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::coroutine::WaitHandle;
use crate::error::{Error, Result};
use crate::handle::Shared;
use crate::state::{Request, Wake};

/// The leaf future behind every wait operation.
///
/// The first poll registers the running fiber for `request` and suspends it.
/// The event loop resumes the fiber only after it took the wait out of every
/// table and recorded a [`Wake`], which the next poll hands back.
pub(crate) struct Suspend<'a> {
    shared: &'a Shared,
    request: Request,
    fiber: Option<WaitHandle>,
    woken: bool,
}

impl<'a> Suspend<'a> {
    pub fn new(shared: &'a Shared, request: Request) -> Self {
        Self {
            shared,
            request,
            fiber: None,
            woken: false,
        }
    }
}

impl Future for Suspend<'_> {
    type Output = Result<Wake>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        let Some(fiber) = this.fiber else {
            if let Err(e) = this.shared.check_thread() {
                return Poll::Ready(Err(e));
            }
            let mut state = this.shared.state();
            let Some(fiber) = state.current else {
                return Poll::Ready(Err(Error::NotInFiber));
            };
            return match state.register(this.shared.registry(), fiber, this.request) {
                Ok(()) => {
                    this.fiber = Some(fiber);
                    Poll::Pending
                }
                Err(e) => Poll::Ready(Err(e)),
            };
        };

        match this.shared.state().take_woken(fiber) {
            Some(wake) => {
                this.woken = true;
                Poll::Ready(Ok(wake))
            }
            None => Poll::Pending,
        }
    }
}

impl Drop for Suspend<'_> {
    // Dropped before the wakeup arrived: the fiber gave up on this wait.
    fn drop(&mut self) {
        if let (Some(fiber), false) = (self.fiber, self.woken) {
            self.shared.state().cancel(self.shared.registry(), fiber);
        }
    }
}
