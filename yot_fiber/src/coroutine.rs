//! Fibers and the handles that name them.
//!
//! The scheduler never switches stacks itself. A fiber is anything that can
//! be resumed until it reports it is finished: every `Future<Output = ()>`
//! qualifies. Suspension is a `Poll::Pending` returned from one of the wait
//! operations on [`Handle`](crate::Handle).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::state::{Wait, Wake};

/// A pinned, heap-allocated future that produces no output.
pub type FiberFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The suspend/resume capability the scheduler drives.
///
/// `resume` runs the fiber until its next suspension point. It returns
/// `Poll::Pending` when the fiber suspended inside a scheduler wait and
/// `Poll::Ready(())` once it has run to completion.
pub trait Coroutine: Send {
    fn resume(&mut self, cx: &mut Context<'_>) -> Poll<()>;
}

impl<F> Coroutine for Pin<Box<F>>
where
    F: Future<Output = ()> + Send + ?Sized,
{
    fn resume(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        self.as_mut().poll(cx)
    }
}

/// Identity of a fiber owned by a scheduler.
///
/// Handles compare by identity: a slot is only reused with a new generation,
/// so a handle to a finished or killed fiber never matches its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitHandle {
    index: u32,
    generation: u32,
}

impl fmt::Display for WaitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiber#{}.{}", self.index, self.generation)
    }
}

pub(crate) struct Fiber {
    /// `None` while the fiber is being resumed.
    pub coroutine: Option<Box<dyn Coroutine>>,
    /// What the fiber is currently registered on, if suspended.
    pub wait: Option<Wait>,
    /// Set by the event loop right before the resume that ends a wait.
    pub woken: Option<Wake>,
}

struct Slot {
    generation: u32,
    fiber: Option<Fiber>,
}

/// Generation-checked slab of fibers.
#[derive(Default)]
pub(crate) struct FiberTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl FiberTable {
    pub fn insert(&mut self, coroutine: Box<dyn Coroutine>) -> WaitHandle {
        let fiber = Fiber {
            coroutine: Some(coroutine),
            wait: None,
            woken: None,
        };
        self.live += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.fiber = Some(fiber);
            return WaitHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            fiber: Some(fiber),
        });
        WaitHandle {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, handle: WaitHandle) -> Option<&Fiber> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.fiber.as_ref())
    }

    pub fn get_mut(&mut self, handle: WaitHandle) -> Option<&mut Fiber> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.fiber.as_mut())
    }

    pub fn is_alive(&self, handle: WaitHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Frees the slot. The handle and every copy of it are dead afterwards.
    pub fn remove(&mut self, handle: WaitHandle) -> Option<Fiber> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?;
        let fiber = slot.fiber.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Some(fiber)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    /// Handles of every live fiber, in slot order.
    pub fn handles(&self) -> Vec<WaitHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.fiber.is_some())
            .map(|(index, slot)| WaitHandle {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) fn handles(n: usize) -> Vec<WaitHandle> {
    let mut table = FiberTable::default();
    (0..n)
        .map(|_| table.insert(Box::new(Box::pin(async {}))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle() -> Box<dyn Coroutine> {
        Box::new(Box::pin(async {}))
    }

    #[test]
    fn removed_handle_is_dead() {
        let mut table = FiberTable::default();
        let fiber = table.insert(idle());
        assert!(table.is_alive(fiber));
        assert_eq!(table.len(), 1);

        assert!(table.remove(fiber).is_some());
        assert!(!table.is_alive(fiber));
        assert!(table.remove(fiber).is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn reused_slot_gets_new_identity() {
        let mut table = FiberTable::default();
        let first = table.insert(idle());
        table.remove(first);

        let second = table.insert(idle());
        assert_ne!(first, second);
        assert!(!table.is_alive(first));
        assert!(table.is_alive(second));
        assert!(table.get_mut(first).is_none());
    }

    #[test]
    fn handles_lists_only_live_fibers() {
        let mut table = FiberTable::default();
        let first = table.insert(idle());
        let second = table.insert(idle());
        table.remove(first);

        assert_eq!(table.handles(), vec![second]);
    }

    #[test]
    fn boxed_future_resumes_to_completion() {
        let mut coroutine: Box<dyn Coroutine> = Box::new(Box::pin(async {}));
        let mut cx = Context::from_waker(std::task::Waker::noop());
        assert_eq!(coroutine.resume(&mut cx), Poll::Ready(()));
    }
}
