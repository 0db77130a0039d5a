//! I/O Integration Contract (spec §4.7): the seam between the scheduler and
//! whatever mechanism actually waits for readiness.
//!
//! The core never assumes epoll/kqueue/io_uring directly; it only requires
//! something implementing [`Backend`]. [`SmolBackend`] is the one
//! concrete implementation, built on `smol`'s own reactor the same way the
//! rest of this crate leans on `smol` for async plumbing. Readiness checks
//! use `smol::future::poll_once` — a single non-blocking poll with no real
//! waker plumbing, deliberately: the scheduler re-checks every registered
//! interest once per idle tick rather than being woken by the reactor
//! directly. That trade-off (documented in DESIGN.md) keeps the run loop a
//! single straightforward poll-everything-then-sleep-briefly cycle instead
//! of threading real `Waker`s back across `smol`'s background reactor.

use crate::fiber::types::FiberId;
use smol::future::poll_once;
use smol::{Async, Timer};
use std::cell::RefCell;
use std::os::fd::AsRawFd;
use std::rc::Rc;
use std::time::Duration;

/// How long the backend is willing to block when there is nothing runnable
/// and no timer due, just to avoid spinning the OS thread at 100% CPU.
pub(crate) const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// A non-blocking readiness probe for one I/O source. Implemented for
/// `smol::Async<T>` below; application code reaches this only indirectly,
/// through [`crate::io`].
pub trait IoReady {
    fn ready_readable(&self) -> bool;
    fn ready_writable(&self) -> bool;
}

impl<T: AsRawFd> IoReady for Async<T> {
    fn ready_readable(&self) -> bool {
        smol::block_on(poll_once(self.readable())).is_some()
    }

    fn ready_writable(&self) -> bool {
        smol::block_on(poll_once(self.writable())).is_some()
    }
}

/// The concrete I/O wrappers in [`crate::io`] need interior mutability to
/// perform a non-blocking read/write through a shared handle registered
/// with the backend; delegate straight through to the wrapped `Async<T>`.
impl<T: AsRawFd> IoReady for RefCell<Async<T>> {
    fn ready_readable(&self) -> bool {
        self.borrow().ready_readable()
    }

    fn ready_writable(&self) -> bool {
        self.borrow().ready_writable()
    }
}

struct Interest {
    fiber: FiberId,
    writable: bool,
    source: Rc<dyn IoReady>,
}

/// The contract §4.7 asks the Event Backend to satisfy: register interest
/// in a source on behalf of a waiting fiber, and report which fibers have
/// become ready since the last check.
pub(crate) trait Backend {
    fn register(&mut self, fiber: FiberId, source: Rc<dyn IoReady>, writable: bool);
    fn deregister(&mut self, fiber: FiberId);
    /// Drain every interest that is presently ready, returning their
    /// fibers. Interests that remain unready stay registered.
    fn poll_ready(&mut self) -> Vec<FiberId>;
    fn has_interests(&self) -> bool;
    fn idle_sleep(&self, duration: Duration);
}

#[derive(Default)]
pub(crate) struct SmolBackend {
    interests: Vec<Interest>,
}

impl SmolBackend {
    pub fn new() -> Self {
        Self {
            interests: Vec::new(),
        }
    }
}

impl Backend for SmolBackend {
    fn register(&mut self, fiber: FiberId, source: Rc<dyn IoReady>, writable: bool) {
        self.interests.push(Interest {
            fiber,
            writable,
            source,
        });
    }

    fn deregister(&mut self, fiber: FiberId) {
        self.interests.retain(|interest| interest.fiber != fiber);
    }

    fn poll_ready(&mut self) -> Vec<FiberId> {
        let mut ready = Vec::new();
        self.interests.retain(|interest| {
            let is_ready = if interest.writable {
                interest.source.ready_writable()
            } else {
                interest.source.ready_readable()
            };
            if is_ready {
                ready.push(interest.fiber);
            }
            !is_ready
        });
        ready
    }

    fn has_interests(&self) -> bool {
        !self.interests.is_empty()
    }

    fn idle_sleep(&self, duration: Duration) {
        smol::block_on(Timer::after(duration));
    }
}
