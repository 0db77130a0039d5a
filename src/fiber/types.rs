//! Scheduler-internal fiber bookkeeping.
//!
//! None of this is public API — [`crate::fiber::Fiber`] is the handle
//! application code holds. This module is the slab row a [`FiberId`]
//! indexes into: the suspended continuation, parentage, mailbox, and the
//! single pending [`ScheduledValue`] the scheduler coalesces deliveries
//! into (spec §4.3's signal-priority rule).

use crate::error::Error;
use crate::mailbox::Mailbox;
use crate::outcome::Outcome;
use crate::signal::Signal;
use crate::trace::Location;
use crate::value::Payload;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

/// A generational handle into the scheduler's fiber slab. Cheap to copy and
/// hash, stable for the lifetime of the scheduler that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberId(pub(crate) usize);

/// The three states named in spec §3 ("Fiber"), plus the internal
/// `Running` sub-state that distinguishes "on the run queue" from
/// "presently being polled" — needed to tell an implicit yield (the future
/// returned `Pending` and is still runnable) apart from an explicit
/// suspension (the future is parked waiting on a timer, message, or I/O
/// readiness).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    /// Queued, awaiting its turn on the run queue.
    Runnable,
    /// Presently being polled by the scheduler's run loop.
    Running,
    /// Suspended: parked on a timer, a mailbox receive, I/O readiness, or
    /// another fiber's completion.
    Waiting,
    /// Terminal. `outcome` on the slot is set and will never change again.
    Dead,
}

impl FiberState {
    pub fn is_dead(&self) -> bool {
        matches!(self, FiberState::Dead)
    }
}

/// A value queued for delivery the next time this fiber is polled: either
/// an ordinary resume value, or a signal that outranks it.
#[derive(Debug, Clone)]
pub(crate) enum ScheduledValue {
    Value(Payload),
    Signal(Signal),
}

impl ScheduledValue {
    /// Ranks a `Value` below every `Signal`, and orders `Signal`s by
    /// [`Signal::priority`]. Plain values don't have relative priority
    /// among themselves; the newest always replaces the previous one.
    fn rank(&self) -> i16 {
        match self {
            ScheduledValue::Value(_) => -1,
            ScheduledValue::Signal(signal) => signal.priority() as i16,
        }
    }

    /// Coalesce an incoming delivery with whatever is already pending for
    /// this fiber, per spec §4.3: a higher-priority signal pre-empts a
    /// lower one or a plain value; a plain value never displaces a pending
    /// signal, but does replace a pending plain value (the latest wins).
    pub fn merge(existing: Option<ScheduledValue>, incoming: ScheduledValue) -> ScheduledValue {
        match existing {
            None => incoming,
            Some(existing) => {
                if incoming.rank() >= existing.rank() {
                    incoming
                } else {
                    existing
                }
            }
        }
    }
}

pub(crate) type Continuation = Pin<Box<dyn Future<Output = Result<Payload, Error>>>>;

/// What a `Waiting` fiber is parked on. Only `Receive` needs to be
/// distinguished from everything else: `send` wakes a receiver eagerly, but
/// must never wake a fiber parked on a timer or `await` just because a
/// message arrived for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum WaitReason {
    #[default]
    Other,
    Receive,
}

/// One row of the scheduler's fiber table.
pub(crate) struct FiberSlot {
    pub state: FiberState,
    /// True while this fiber's id sits in the run queue, so `schedule`
    /// never pushes the same id twice (spec §3 invariant: "a fiber appears
    /// in the run queue at most once").
    pub in_queue: bool,
    pub continuation: Continuation,
    pub parent: Option<FiberId>,
    pub children: HashSet<FiberId>,
    pub mailbox: Mailbox,
    /// Coalesced pending delivery, consumed the next time this fiber is
    /// polled (spec §4.2 "scheduled_value").
    pub scheduled_value: Option<ScheduledValue>,
    pub tag: Option<String>,
    pub location: Location,
    /// Other fibers blocked in `await_result` on this one; each gets a
    /// clone of the terminal [`Outcome`] when it is set.
    pub await_waiters: Vec<FiberId>,
    /// Set exactly once, when `state` transitions to `Dead`.
    pub outcome: Option<Outcome>,
    /// What kind of wait this fiber is presently parked on, so `send` knows
    /// whether it's safe to wake it.
    pub waiting_on: WaitReason,
}

impl FiberSlot {
    pub fn new(continuation: Continuation, parent: Option<FiberId>, location: Location) -> Self {
        Self {
            state: FiberState::Runnable,
            in_queue: true,
            continuation,
            parent,
            children: HashSet::new(),
            mailbox: Mailbox::new(),
            scheduled_value: None,
            tag: None,
            location,
            await_waiters: Vec::new(),
            outcome: None,
            waiting_on: WaitReason::Other,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, FiberState::Runnable | FiberState::Running)
    }
}
