//! A single-threaded cooperative scheduler for fibers.
//!
//! Many fibers share one OS thread. A fiber runs until it has to wait for an
//! fd to become ready, for a sleep to expire or for a lock hand-off; it is
//! then suspended and resumed by the event loop once the condition holds.
//! It consists of:
//!
//! - [`runtime`]: the [`Scheduler`] and its event loop
//! - [`handle`]: the [`Handle`] fibers use to wait, spawn and hand off locks
//! - [`reactor`]: fds being waited on and their `mio` registrations
//! - [`coroutine`]: the resume capability and fiber identities
//! - [`sync`]: a fiber-aware [`Mutex`](sync::Mutex) built on the hand-off
//! - [`blocking`]: records of spans that block the OS thread
//!
//! ```ignore
//! #[yot_fiber::main]
//! async fn main(handle: yot_fiber::Handle) {
//!     handle.wait_sleep(std::time::Duration::from_millis(10)).await.unwrap();
//! }
//! ```

pub mod blocking;
pub mod config;
pub mod coroutine;
pub mod error;
pub mod handle;
pub mod reactor;
pub mod runtime;
pub mod sync;

mod state;
mod suspend;
mod timer;
mod wait_queue;

pub use config::Config;
pub use coroutine::{Coroutine, FiberFuture, WaitHandle};
pub use error::{Error, Result};
pub use handle::Handle;
pub use mio::Interest;
pub use runtime::Scheduler;
pub use state::Stats;
pub use sync::LockId;

pub use yot_fiber_macros::main;

/// Installs `env_logger`, configured through `RUST_LOG`.
///
/// Does nothing if a logger is already set.
pub fn init_logging() {
    let _ = env_logger::try_init();
}
