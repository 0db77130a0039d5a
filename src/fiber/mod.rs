//! The fiber: a suspendable unit of execution with its own mailbox,
//! children, and post-mortem result (spec §3 "Fiber", §4.2).
//!
//! [`Fiber`] is a cheap, `Copy` handle — it's just a [`FiberId`] plus the
//! scheduler methods that make sense to call from outside a fiber body.
//! Everything it does is a thin wrapper over [`crate::scheduler::Scheduler`].

pub(crate) mod types;

use crate::error::Error;
use crate::outcome::Outcome;
use crate::scheduler::{switch_fiber, Scheduler};
use crate::signal::{ScopeId, Signal};
use crate::trace::{Frame, Location, Trace};
use crate::value::Payload;
use std::any::Any;
use std::future::Future;
use std::ops::Shl;
pub(crate) use types::FiberId;
use types::{FiberState, WaitReason};

/// A handle to a spawned fiber. Copy, hashable, and valid for as long as the
/// scheduler that issued it is alive — dead fibers remain queryable (their
/// `result` stays readable) but are otherwise inert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fiber {
    pub(crate) id: FiberId,
}

/// Coarse, externally visible fiber lifecycle state (spec §3 "Fiber").
/// Collapses the scheduler-internal `Runnable`/`Running` split, which
/// outside code has no use for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Runnable,
    Waiting,
    Dead,
}

impl Fiber {
    /// Spawn a new fiber running `body` to completion, as a child of the
    /// currently-polling fiber (or of the root). `body` must return
    /// `crate::Result<T>` for whatever payload type `T` it produces — an
    /// `Err` becomes the fiber's recorded failure (spec §4.2 "an uncaught
    /// exception aborts only the raising fiber; the error becomes that
    /// fiber's terminal result").
    #[track_caller]
    pub fn spin<Fut, T>(body: Fut) -> Fiber
    where
        Fut: Future<Output = crate::Result<T>> + 'static,
        T: Any,
    {
        let wrapped = async move { body.await.map(|v| Payload::new(v)) };
        let id = Scheduler::spawn(Box::pin(wrapped));
        Fiber { id }
    }

    /// Attach a human-readable tag, readable back via [`Fiber::tag`] and
    /// included in diagnostic logging. Chains off `spin`:
    /// `Fiber::spin(body).with_tag("worker")`.
    pub fn with_tag(self, tag: impl Into<String>) -> Fiber {
        Scheduler::with(|s| {
            if let Some(slot) = s.slot_mut(self.id) {
                slot.tag = Some(tag.into());
            }
        });
        self
    }

    /// Suspend the caller until this fiber dies, then return its result —
    /// or re-raise its failure, with the caller's location prepended to the
    /// composed trace (spec §7 "cross-fiber trace composition").
    #[track_caller]
    pub async fn await_result(&self) -> crate::Result<Payload> {
        let location = Location::caller();
        let id = self.id;
        let already = Scheduler::with(|s| s.slot(id).and_then(|slot| slot.outcome.clone()));
        let outcome = match already {
            Some(outcome) => outcome,
            None => {
                switch_fiber(move |s, waiter| match s.slot_mut(id) {
                    Some(slot) if !slot.state.is_dead() => {
                        slot.await_waiters.push(waiter);
                    }
                    _ => s.schedule_value(waiter, types::ScheduledValue::Value(Payload::nil())),
                })
                .await?;
                Scheduler::with(|s| s.slot(id).and_then(|slot| slot.outcome.clone()))
                    .expect("outcome must be set once the awaited fiber has woken its waiters")
            }
        };
        match outcome {
            Outcome::Value(value) => Ok(value),
            Outcome::Failure(err) => Err(err.raised_with(Trace::of(Frame::new(location, None)))),
        }
    }

    /// Schedule an ordinary resume value for this fiber (spec §4.2
    /// `schedule`). A no-op on a dead fiber.
    pub fn schedule(&self, value: Payload) {
        Scheduler::with(|s| s.schedule_value(self.id, types::ScheduledValue::Value(value)));
    }

    /// Deliver `Signal::Interrupt(value)` — a cancellable exception raised
    /// at this fiber's current suspension point (spec §4.2 `interrupt`).
    pub fn interrupt(&self, value: Payload) {
        Scheduler::with(|s| {
            s.schedule_value(self.id, types::ScheduledValue::Signal(Signal::Interrupt(value)))
        });
    }

    /// Deliver `Signal::MoveOn(value)` (spec §4.2 `stop`): the target
    /// unwinds silently to its outermost user frame, carrying `value` as
    /// its result. Tagged with a fresh, unmatched `ScopeId` so it is never
    /// caught by one of the target's own enclosing `CancelScope`s — it
    /// simply keeps unwinding until there is nothing left to unwind
    /// through, unlike `cancel_after`'s scope-bound `Cancel`.
    pub fn stop(&self, value: Payload) {
        Scheduler::with(|s| {
            s.schedule_value(
                self.id,
                types::ScheduledValue::Signal(Signal::MoveOn(ScopeId::next(), value)),
            )
        });
    }

    /// Deliver `Signal::Terminate` (spec §4.2 `terminate`): the
    /// highest-priority signal, unconditionally wins any race with a
    /// pending `MoveOn`/`Cancel`/`Interrupt`/value.
    pub fn terminate(&self) {
        Scheduler::with(|s| s.schedule_value(self.id, types::ScheduledValue::Signal(Signal::Terminate)));
    }

    /// Append a message to this fiber's mailbox, waking it immediately if
    /// it is presently suspended inside [`crate::api::receive`] (spec §4.2
    /// `send`). A no-op on a dead fiber.
    pub fn send(&self, msg: impl Any) {
        Scheduler::with(|s| {
            let Some(slot) = s.slot_mut(self.id) else {
                return;
            };
            if slot.state.is_dead() {
                return;
            }
            slot.mailbox.push(Payload::new(msg));
            if slot.state == FiberState::Waiting && slot.waiting_on == WaitReason::Receive {
                let message = slot.mailbox.pop().expect("just pushed");
                s.schedule_value(self.id, types::ScheduledValue::Value(message));
            }
        });
    }

    /// Pop one pending message without suspending, or `None` if the mailbox
    /// is empty (spec §4.2 `receive_pending`).
    pub fn receive_pending(&self) -> Option<Payload> {
        Scheduler::with(|s| s.slot_mut(self.id).and_then(|slot| slot.mailbox.pop()))
    }

    /// The fiber's post-mortem result, if it has died (spec §4.2 `result`).
    pub fn try_result(&self) -> Option<Outcome> {
        Scheduler::with(|s| s.slot(self.id).and_then(|slot| slot.outcome.clone()))
    }

    pub fn tag(&self) -> Option<String> {
        Scheduler::with(|s| s.slot(self.id).and_then(|slot| slot.tag.clone()))
    }

    pub fn location(&self) -> Option<Location> {
        Scheduler::with(|s| s.slot(self.id).map(|slot| slot.location))
    }

    pub fn state(&self) -> State {
        Scheduler::with(|s| match s.slot(self.id).map(|slot| slot.state) {
            Some(FiberState::Runnable) | Some(FiberState::Running) => State::Runnable,
            Some(FiberState::Waiting) => State::Waiting,
            Some(FiberState::Dead) | None => State::Dead,
        })
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), State::Runnable)
    }

    pub fn children(&self) -> Vec<Fiber> {
        Scheduler::with(|s| {
            s.slot(self.id)
                .map(|slot| slot.children.iter().map(|&id| Fiber { id }).collect())
                .unwrap_or_default()
        })
    }
}

/// `fiber << msg` is `fiber.send(msg)` (spec §4.2 `<<` alias for `send`).
impl<T: Any> Shl<T> for Fiber {
    type Output = Fiber;

    fn shl(self, msg: T) -> Fiber {
        self.send(msg);
        self
    }
}
