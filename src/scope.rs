//! Cancellation scopes (spec §4.3): `move_on_after`, `cancel_after`, and
//! the explicit `CancelScope` form. A scope guarantees its timer (if any)
//! is disarmed on every exit path, including when an unrelated signal
//! unwinds straight through it (spec §4.3 "scoped acquisition of the timer
//! resource with guaranteed release").

use crate::error::Error;
use crate::fiber::types::{FiberId, ScheduledValue};
use crate::scheduler::Scheduler;
use crate::signal::{ScopeId, Signal};
use crate::timer::TimerPayload;
use crate::value::Payload;
use std::any::Any;
use std::future::Future;
use std::time::Duration;

/// Which signal a [`CancelScope`] delivers when cancelled (spec §6
/// "CancelScope.mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Delivers `Signal::Cancel`: never caught by this scope, which only
    /// guarantees the timer is disarmed on exit.
    Cancel,
    /// Delivers `Signal::MoveOn`: caught at exactly this scope, converting
    /// the unwind into a value.
    Stop,
}

/// The explicit scope form (spec §4.3 `CancelScope(mode)`): exposes a
/// [`CancelHandle`] any fiber can call `cancel` on to arm the signal
/// immediately, independent of a timer.
pub struct CancelScope {
    mode: Mode,
    target: FiberId,
    id: ScopeId,
}

/// A cancellation handle detached from the scope's own lifetime — `Copy`,
/// safe to hand to another fiber (spec §4.3 "exposes a handle `c` with
/// `c.cancel!`").
#[derive(Debug, Clone, Copy)]
pub struct CancelHandle {
    mode: Mode,
    target: FiberId,
    id: ScopeId,
}

impl CancelHandle {
    /// Schedule this scope's signal into its target fiber (spec §4.3
    /// `c.cancel!`).
    pub fn cancel(&self, value: Payload) {
        let signal = match self.mode {
            Mode::Cancel => Signal::Cancel,
            Mode::Stop => Signal::MoveOn(self.id, value),
        };
        Scheduler::with(|s| s.schedule_value(self.target, ScheduledValue::Signal(signal)));
    }
}

impl CancelScope {
    /// Open a scope bound to the currently-running fiber.
    pub fn new(mode: Mode) -> Self {
        let target =
            Scheduler::current_fiber().expect("CancelScope::new requires a running fiber");
        Self {
            mode,
            target,
            id: ScopeId::next(),
        }
    }

    pub fn handle(&self) -> CancelHandle {
        CancelHandle {
            mode: self.mode,
            target: self.target,
            id: self.id,
        }
    }

    /// Run `body` under this scope, optionally arming a deadline. The
    /// timer (if any) is disarmed on every exit path: normal completion,
    /// this scope's own signal, or any other signal unwinding through it.
    pub async fn run<Fut>(self, deadline: Option<(Duration, Payload)>, body: Fut) -> crate::Result<Payload>
    where
        Fut: Future<Output = crate::Result<Payload>>,
    {
        let timer = deadline.map(|(delay, value)| {
            let payload = match self.mode {
                Mode::Cancel => TimerPayload::Signal(Signal::Cancel),
                Mode::Stop => TimerPayload::Signal(Signal::MoveOn(self.id, value)),
            };
            Scheduler::with(|s| s.arm_timer(delay, self.target, payload))
        });

        let result = body.await;

        if let Some(timer) = timer {
            Scheduler::with(|s| s.cancel_timer(timer));
        }

        match result {
            Err(Error::Signal(Signal::MoveOn(id, value)))
                if self.mode == Mode::Stop && id == self.id =>
            {
                Ok(value)
            }
            other => other,
        }
    }
}

/// `move_on_after(interval, with_value: v) { body }` (spec §4.3): times
/// `body` out after `delay`, yielding `with_value` instead of raising. Any
/// ordinary failure or outer signal `body` raises still propagates.
pub async fn move_on_after<Fut, T>(delay: Duration, with_value: T, body: Fut) -> crate::Result<T>
where
    Fut: Future<Output = crate::Result<T>>,
    T: Any + Clone,
{
    let scope = CancelScope::new(Mode::Stop);
    let default = with_value.clone();
    let wrapped = async move { body.await.map(Payload::new) };
    let result = scope
        .run(Some((delay, Payload::new(with_value))), wrapped)
        .await;
    result.map(|value| value.downcast::<T>().unwrap_or(default))
}

/// `cancel_after(interval) { body }` (spec §4.3): arms a `Cancel` deadline
/// around `body`. Unlike `move_on_after`, the scope never swallows it —
/// it only guarantees the timer is disarmed before the signal keeps
/// unwinding.
pub async fn cancel_after<Fut, T>(delay: Duration, body: Fut) -> crate::Result<T>
where
    Fut: Future<Output = crate::Result<T>>,
    T: Any + Clone,
{
    let scope = CancelScope::new(Mode::Cancel);
    let wrapped = async move { body.await.map(Payload::new) };
    let result = scope.run(Some((delay, Payload::nil())), wrapped).await;
    result.and_then(|value| {
        value
            .downcast::<T>()
            .map_err(|_| Error::failed("cancel_after: unexpected result type"))
    })
}
