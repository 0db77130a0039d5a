//! The thread-local event loop (spec §4.1): owns the run queue, the timer
//! heap, the I/O backend, and the fiber slab, and alternates between
//! draining runnable fibers and blocking on whichever of those is next due.
//!
//! Exactly one [`Scheduler`] exists per OS thread that touches this crate,
//! lazily built on first use and torn down implicitly once nothing
//! references it. There is no cross-thread handle: fibers, timers and the
//! run queue are all `!Send`, by design (spec §5 "No shared mutable state
//! between schedulers").

mod queue;

use crate::backend::{Backend, IoReady, SmolBackend, IDLE_SLEEP};
use crate::error::Error;
use crate::fiber::types::{Continuation, FiberId, FiberSlot, FiberState, ScheduledValue, WaitReason};
use crate::outcome::Outcome;
use crate::signal::Signal;
use crate::timer::{TimerPayload, TimerService};
use crate::trace::Location;
use crate::value::Payload;
use queue::RunQueue;
use slab::Slab;
use smol::future::poll_once;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

thread_local! {
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::new());
}

pub(crate) struct Scheduler {
    slab: Slab<FiberSlot>,
    run_queue: RunQueue,
    timers: TimerService,
    backend: SmolBackend,
    current: Option<FiberId>,
    ref_count: usize,
}

impl Scheduler {
    fn new() -> Self {
        Self {
            slab: Slab::new(),
            run_queue: RunQueue::new(),
            timers: TimerService::new(),
            backend: SmolBackend::new(),
            current: None,
            ref_count: 0,
        }
    }

    /// Thread-local access point. Never held across an `.await` in calling
    /// code — every borrow here is synchronous and short-lived, which is
    /// what lets fiber bodies re-enter the scheduler (spawning children,
    /// sending messages) while one of their own ancestors is mid-poll.
    pub(crate) fn with<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
        SCHEDULER.with(|cell| f(&mut cell.borrow_mut()))
    }

    pub(crate) fn current_fiber() -> Option<FiberId> {
        Self::with(|s| s.current)
    }

    /// Create a new fiber as a child of the currently-polling fiber (or of
    /// the root, if called from outside any fiber body), enqueue it
    /// runnable, and return its id. Mirrors spec §4.2 `spin`.
    #[track_caller]
    pub(crate) fn spawn(continuation: Continuation) -> FiberId {
        let location = Location::caller();
        Self::with(|s| {
            let parent = s.current;
            let slot = FiberSlot::new(continuation, parent, location);
            let id = FiberId(s.slab.insert(slot));
            if let Some(parent_id) = parent {
                if let Some(parent_slot) = s.slab.get_mut(parent_id.0) {
                    parent_slot.children.insert(id);
                }
            }
            s.run_queue.push_back(id);
            log::trace!("fiber {id:?} spawned (parent {parent:?})");
            id
        })
    }

    /// Merge an incoming delivery into `fid`'s pending slot and (re)enqueue
    /// it if necessary. This is `Fiber::schedule`/`interrupt`/`stop`/
    /// `terminate`/timer-fire/io-ready all funnel through this one place
    /// (spec §4.2, §4.3 signal precedence).
    pub(crate) fn schedule_value(&mut self, fid: FiberId, incoming: ScheduledValue) {
        let Some(slot) = self.slab.get_mut(fid.0) else {
            return;
        };
        // Dead fibers take no further scheduling (spec §3 invariant).
        if slot.state.is_dead() {
            return;
        }
        let merged = ScheduledValue::merge(slot.scheduled_value.take(), incoming);
        if let ScheduledValue::Signal(signal) = &merged {
            log::debug!("fiber {fid:?} delivered signal {}", signal.name());
        }
        slot.scheduled_value = Some(merged);
        slot.state = FiberState::Runnable;
        if !slot.in_queue {
            slot.in_queue = true;
            self.run_queue.push_back(fid);
        }
    }

    pub(crate) fn fiber_ref(&mut self) {
        self.ref_count += 1;
    }

    pub(crate) fn fiber_unref(&mut self) {
        self.ref_count = self.ref_count.saturating_sub(1);
    }

    pub(crate) fn slot(&self, fid: FiberId) -> Option<&FiberSlot> {
        self.slab.get(fid.0)
    }

    pub(crate) fn slot_mut(&mut self, fid: FiberId) -> Option<&mut FiberSlot> {
        self.slab.get_mut(fid.0)
    }

    pub(crate) fn arm_timer(&mut self, delay: Duration, target: FiberId, payload: TimerPayload) -> crate::timer::TimerId {
        self.timers.arm(delay, target, payload)
    }

    pub(crate) fn arm_periodic(&mut self, period: Duration, target: FiberId, payload: TimerPayload) -> crate::timer::TimerId {
        self.timers.arm_periodic(period, target, payload)
    }

    pub(crate) fn cancel_timer(&mut self, id: crate::timer::TimerId) {
        self.timers.cancel(id);
    }

    pub(crate) fn register_io(&mut self, fiber: FiberId, source: Rc<dyn IoReady>, writable: bool) {
        self.backend.register(fiber, source, writable);
    }

    pub(crate) fn deregister_io(&mut self, fiber: FiberId) {
        self.backend.deregister(fiber);
    }

    /// Terminal transition for a fiber (spec §4.2 diagram). Wakes every
    /// `await_waiters` entry, detaches from the parent's `children`, and
    /// reattaches any still-live children to this fiber's own parent (or
    /// sets them adrift as new roots if it had none) rather than leaving
    /// them pointed at a dead parent. Since every fiber's `parent` is kept
    /// live by this same bubbling at the moment it is read here, one
    /// reassignment is enough — the invariant never requires walking past
    /// a grandparent (spec §3 "dead parent ⇒ bubble further up").
    fn complete(&mut self, fid: FiberId, result: Result<Payload, Error>) {
        // An uncaught cancellation signal reaching a fiber's root is not an
        // ordinary failure (spec §7.2 "distinguished from ordinary
        // failures"): it just kills the fiber, carrying whatever payload
        // the signal itself held (nil for `Cancel`/`Terminate`, the given
        // value for `Interrupt`/`MoveOn`). Only genuine application errors
        // become a recorded `Outcome::Failure` that `await_result` re-raises.
        let outcome = match result {
            Err(Error::Signal(signal)) => {
                log::debug!(
                    "fiber {fid:?} died from an uncaught {} signal",
                    signal.name()
                );
                let value = match signal {
                    Signal::Interrupt(v) | Signal::MoveOn(_, v) => v,
                    Signal::Cancel | Signal::Terminate => Payload::nil(),
                };
                Outcome::Value(value)
            }
            other => Outcome::from(other),
        };
        let (parent, children, waiters) = {
            let Some(slot) = self.slab.get_mut(fid.0) else {
                return;
            };
            slot.state = FiberState::Dead;
            slot.in_queue = false;
            slot.outcome = Some(outcome.clone());
            (
                slot.parent,
                std::mem::take(&mut slot.children),
                std::mem::take(&mut slot.await_waiters),
            )
        };
        log::trace!("fiber {fid:?} died (failure = {})", outcome.is_failure());

        if let Some(parent_id) = parent {
            if let Some(parent_slot) = self.slab.get_mut(parent_id.0) {
                parent_slot.children.remove(&fid);
            }
        }
        for child in children {
            if let Some(child_slot) = self.slab.get_mut(child.0) {
                if !child_slot.state.is_dead() {
                    child_slot.parent = parent;
                    if let Some(grandparent_id) = parent {
                        if let Some(grandparent_slot) = self.slab.get_mut(grandparent_id.0) {
                            grandparent_slot.children.insert(child);
                        }
                    }
                }
            }
        }
        for waiter in waiters {
            self.schedule_value(waiter, ScheduledValue::Value(Payload::nil()));
        }
    }

    /// Poll one fiber exactly once (§4.1 core loop step 1). The live
    /// continuation is pulled out of the slab into a local variable for the
    /// duration of the poll so that nested code running *inside* that poll
    /// (spawning children, sending messages, arming timers via
    /// [`Scheduler::switch_fiber`]) can freely re-borrow the thread-local
    /// scheduler without a double-borrow panic.
    fn poll_one(fid: FiberId) {
        let taken = Self::with(|s| {
            s.current = Some(fid);
            let slot = s.slab.get_mut(fid.0)?;
            slot.state = FiberState::Running;
            slot.in_queue = false;
            Some(std::mem::replace(
                &mut slot.continuation,
                Box::pin(std::future::pending()),
            ))
        });
        let Some(mut continuation) = taken else {
            return;
        };

        let polled = smol::block_on(poll_once(&mut continuation));

        Self::with(|s| {
            match polled {
                None => {
                    if let Some(slot) = s.slab.get_mut(fid.0) {
                        slot.continuation = continuation;
                    }
                }
                Some(result) => {
                    s.complete(fid, result);
                }
            }
            s.current = None;
        });
    }

    /// Whether the loop may exit: nothing runnable, nothing pending on the
    /// backend or timer heap, and no fiber has asked to be kept alive via
    /// [`Scheduler::fiber_ref`] (spec §4.1 "Referencing").
    fn is_idle(&self) -> bool {
        self.run_queue.is_empty()
            && self.ref_count == 0
            && self.timers.is_empty()
            && !self.backend.has_interests()
    }

    /// Drive the loop until idle. This is what the root context ("user code
    /// when not inside a spawned fiber", spec §4.1) calls to let spawned
    /// fibers actually run; it is also what every `#[test]` in this crate
    /// uses to bring a scenario to completion.
    pub(crate) fn run_until_idle() {
        loop {
            if let Some(fid) = Self::with(|s| s.run_queue.pop_front()) {
                Self::poll_one(fid);
                continue;
            }

            let now = Instant::now();
            let fired = Self::with(|s| s.timers.drain_expired(now));
            if !fired.is_empty() {
                for (fid, payload) in fired {
                    let value = match payload {
                        TimerPayload::Value => ScheduledValue::Value(Payload::nil()),
                        TimerPayload::Signal(signal) => ScheduledValue::Signal(signal),
                    };
                    Self::with(|s| s.schedule_value(fid, value));
                }
                continue;
            }

            let ready = Self::with(|s| s.backend.poll_ready());
            if !ready.is_empty() {
                for fid in ready {
                    Self::with(|s| s.schedule_value(fid, ScheduledValue::Value(Payload::nil())));
                }
                continue;
            }

            if Self::with(|s| s.is_idle()) {
                break;
            }

            let sleep_for = Self::with(|s| match s.timers.next_deadline() {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(IDLE_SLEEP),
                None => IDLE_SLEEP,
            });
            Self::with(|s| s.backend.idle_sleep(sleep_for));
        }
    }
}

/// The single suspension primitive (spec §4.1 `switch_fiber`): parks the
/// currently-polling fiber and hands control back to [`Scheduler::poll_one`]
/// (by returning `Pending`), running an arbitrary registration side effect
/// first (arming a timer, registering I/O interest, recording an
/// `await_waiters`/mailbox wait — or nothing at all, for a fiber that just
/// wants to be left `Waiting` until some other code calls
/// [`Scheduler::schedule_value`] on it directly).
pub(crate) struct Switch {
    register: Option<Box<dyn FnOnce(&mut Scheduler, FiberId)>>,
}

impl Switch {
    pub(crate) fn new(register: impl FnOnce(&mut Scheduler, FiberId) + 'static) -> Self {
        Self {
            register: Some(Box::new(register)),
        }
    }
}

impl Future for Switch {
    type Output = Result<Payload, Error>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.register.take() {
            Some(register) => {
                Scheduler::with(|s| {
                    let fid = s.current.expect("suspension attempted outside a fiber");
                    if let Some(slot) = s.slab.get_mut(fid.0) {
                        slot.state = FiberState::Waiting;
                        slot.in_queue = false;
                        slot.waiting_on = WaitReason::Other;
                    }
                    register(s, fid);
                });
                Poll::Pending
            }
            None => Scheduler::with(|s| {
                let fid = s.current.expect("suspension attempted outside a fiber");
                let value = s
                    .slab
                    .get_mut(fid.0)
                    .and_then(|slot| slot.scheduled_value.take())
                    .unwrap_or(ScheduledValue::Value(Payload::nil()));
                Poll::Ready(match value {
                    ScheduledValue::Value(v) => Ok(v),
                    ScheduledValue::Signal(signal) => Err(Error::Signal(signal)),
                })
            }),
        }
    }
}

pub(crate) fn switch_fiber(register: impl FnOnce(&mut Scheduler, FiberId) + 'static) -> Switch {
    Switch::new(register)
}
