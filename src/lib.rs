//! Polyphony: a cooperative, single-threaded fiber scheduler for structured
//! concurrency.
//!
//! A fiber is a suspendable unit of execution — modeled here as a boxed,
//! pinned [`Future`](std::future::Future) rather than a stack-switched
//! coroutine (see DESIGN.md for why) — that suspends transparently on
//! timers, messages, and I/O readiness instead of blocking an OS thread.
//! Exactly one [`Scheduler`] drives all of this per OS thread; nothing
//! here is `Send`, by design.
//!
//! ```
//! use polyphony::{Scheduler, Fiber};
//! use std::time::Duration;
//!
//! let greeting: &str = Scheduler::run(|| async {
//!     let greeter = Fiber::spin(async {
//!         polyphony::sleep(Duration::from_millis(1)).await?;
//!         Ok("hello from a fiber")
//!     });
//!     greeter.await_result().await.unwrap().downcast::<&str>().unwrap()
//! });
//! assert_eq!(greeting, "hello from a fiber");
//! ```
//!
//! See `DESIGN.md` for the grounding behind each module.

mod backend;
mod error;
mod fiber;
mod mailbox;
mod outcome;
mod scheduler;
mod scope;
mod signal;
mod supervisor;
mod timer;
mod trace;
mod value;

pub mod api;
pub mod io;

pub use api::*;
pub use error::{Error, Result};
pub use fiber::{Fiber, State};
pub use outcome::Outcome;
pub use scope::{CancelHandle, CancelScope, Mode};
pub use signal::Signal;
pub use trace::{Frame, Location, Trace};
pub use value::Payload;

use std::any::Any;
use std::future::Future;

/// The thread-local event loop (spec §4.1). There is no handle to
/// construct — it exists implicitly on first use and this type is only a
/// namespace for the two ways user code drives it.
pub struct Scheduler;

impl Scheduler {
    /// Run `body` as the root fiber (spec §4.1: "the 'root' fiber when
    /// user code is not inside a spawned fiber") and drive the scheduler
    /// until every fiber it transitively spawns has finished, then return
    /// the root's result.
    ///
    /// `body` itself runs as an ordinary fiber, so every suspension point
    /// — `sleep`, `spin(..).await_result()`, `receive`, cancellation scopes
    /// — works the same way inside it as inside any spawned fiber.
    pub fn run<F, Fut, T>(body: F) -> T
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = T> + 'static,
        T: Any + Clone,
    {
        let root = Fiber::spin(async move { Ok(body().await) });
        scheduler::Scheduler::run_until_idle();
        match root
            .try_result()
            .expect("run_until_idle leaves the root fiber dead")
        {
            Outcome::Value(value) => value
                .downcast::<T>()
                .expect("root fiber's result type matches Scheduler::run's T"),
            Outcome::Failure(err) => {
                unreachable!("root fiber body is infallible by construction: {err}")
            }
        }
    }

    /// Drive the loop until idle without spawning a root fiber first —
    /// useful in tests that have already spawned their own top-level
    /// fibers via [`Fiber::spin`] and just need the scheduler to run them.
    pub fn run_until_idle() {
        scheduler::Scheduler::run_until_idle();
    }
}
