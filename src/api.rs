//! Free-standing verbs (spec §6 "Host-language surface") that delegate to
//! the currently-running fiber and the thread-local scheduler. Everything
//! here is a thin wrapper: `spin` is `Fiber::spin`; `sleep` arms a one-shot
//! timer against the current fiber and suspends; `supervise` builds on
//! [`crate::supervisor::supervise`].

use crate::fiber::types::{ScheduledValue, WaitReason};
use crate::fiber::Fiber;
use crate::scheduler::{switch_fiber, Scheduler};
use crate::timer::TimerPayload;
use crate::value::Payload;
use std::any::Any;
use std::future::Future;
use std::time::{Duration, Instant};

pub use crate::scope::{cancel_after, move_on_after};
pub use crate::supervisor::supervise;

/// Spawn `body` as a child of the current fiber (spec §6 `spin`).
#[track_caller]
pub fn spin<Fut, T>(body: Fut) -> Fiber
where
    Fut: Future<Output = crate::Result<T>> + 'static,
    T: Any,
{
    Fiber::spin(body)
}

/// A fiber whose entire lifetime is a loop of `body`, optionally capped at
/// `rate` iterations per second; terminated by `stop`/`terminate` (spec §4.6
/// `spin_loop`).
#[track_caller]
pub fn spin_loop<F, Fut>(rate: Option<f64>, mut body: F) -> Fiber
where
    F: FnMut() -> Fut + 'static,
    Fut: Future<Output = crate::Result<()>> + 'static,
{
    Fiber::spin(async move {
        loop {
            let started = Instant::now();
            body().await?;
            match rate {
                Some(rate) if rate > 0.0 => {
                    let period = Duration::from_secs_f64(1.0 / rate);
                    let elapsed = started.elapsed();
                    if elapsed < period {
                        sleep(period - elapsed).await?;
                    } else {
                        snooze().await?;
                    }
                }
                _ => snooze().await?,
            }
        }
    })
}

/// Suspend the current fiber until `duration` elapses (spec §4.5 `sleep`).
pub async fn sleep(duration: Duration) -> crate::Result<()> {
    switch_fiber(move |s, target| {
        s.arm_timer(duration, target, TimerPayload::Value);
    })
    .await?;
    Ok(())
}

/// Suspend the current fiber forever. Keeps the scheduler alive via a
/// reference so the run loop does not exit out from under it (spec §4.5
/// "sleep with no duration is sleep_forever").
pub async fn sleep_forever() -> crate::Result<()> {
    Scheduler::with(|s| s.fiber_ref());
    let result = switch_fiber(|_, _| {}).await;
    Scheduler::with(|s| s.fiber_unref());
    result.map(|_| ())
}

/// Enqueue the current fiber at the tail of the run queue and yield once
/// (spec §4.1 "Fairness": `snooze` = "enqueue self, yield").
pub async fn snooze() -> crate::Result<()> {
    switch_fiber(|s, fid| {
        s.schedule_value(fid, ScheduledValue::Value(Payload::nil()));
    })
    .await?;
    Ok(())
}

/// Suspend indefinitely until some other code schedules, interrupts, or
/// terminates this fiber directly (spec §6 `suspend`) — the bare primitive
/// every higher-level suspension point builds on.
pub async fn suspend() -> crate::Result<Payload> {
    switch_fiber(|_, _| {}).await
}

/// `after(t) { block }` (spec §4.5): spawn a child fiber that sleeps `delay`
/// then runs `body`.
#[track_caller]
pub fn after<Fut, T>(delay: Duration, body: Fut) -> Fiber
where
    Fut: Future<Output = crate::Result<T>> + 'static,
    T: Any,
{
    Fiber::spin(async move {
        sleep(delay).await?;
        body.await
    })
}

/// `every(t) { block }` (spec §4.5): spawn a child fiber driven by a
/// periodic timer armed once for its whole lifetime; each fire runs `body`
/// again. The timer is disarmed if `body` ever raises.
#[track_caller]
pub fn every<F, Fut>(period: Duration, mut body: F) -> Fiber
where
    F: FnMut() -> Fut + 'static,
    Fut: Future<Output = crate::Result<()>> + 'static,
{
    Fiber::spin(async move {
        let fid = Scheduler::current_fiber().expect("every requires a running fiber");
        let timer = Scheduler::with(|s| s.arm_periodic(period, fid, TimerPayload::Value));
        let result = async {
            loop {
                switch_fiber(|_, _| {}).await?;
                body().await?;
            }
        }
        .await;
        Scheduler::with(|s| s.cancel_timer(timer));
        result
    })
}

/// `throttled_loop(rate, count: n?) { body }` (spec §4.6): drive `body` no
/// faster than `rate` iterations per second, sleeping the remainder of
/// each period after `body` completes. `count` bounds the iteration count;
/// `None` is unbounded. `body` receives the zero-based iteration index.
pub async fn throttled_loop<F, Fut>(rate: f64, count: Option<usize>, mut body: F) -> crate::Result<()>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = crate::Result<()>>,
{
    let period = Duration::from_secs_f64(1.0 / rate);
    let mut iteration = 0usize;
    loop {
        if let Some(limit) = count {
            if iteration >= limit {
                return Ok(());
            }
        }
        let started = Instant::now();
        body(iteration).await?;
        iteration += 1;
        let elapsed = started.elapsed();
        if elapsed < period {
            sleep(period - elapsed).await?;
        }
    }
}

/// Suspend until a message arrives in the current fiber's mailbox, or
/// return immediately if one is already queued (spec §4.2 `receive`).
pub async fn receive() -> crate::Result<Payload> {
    let fid = Scheduler::current_fiber().expect("receive requires a running fiber");
    if let Some(msg) = Scheduler::with(|s| s.slot_mut(fid).and_then(|slot| slot.mailbox.pop())) {
        return Ok(msg);
    }
    switch_fiber(move |s, target| {
        if let Some(slot) = s.slot_mut(target) {
            slot.waiting_on = WaitReason::Receive;
        }
    })
    .await
}

/// Drain every message presently queued, without suspending (spec §4.2
/// `receive_pending`).
pub fn receive_pending() -> Vec<Payload> {
    let fid = Scheduler::current_fiber().expect("receive_pending requires a running fiber");
    Scheduler::with(|s| {
        s.slot_mut(fid)
            .map(|slot| slot.mailbox.drain())
            .unwrap_or_default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::outcome::Outcome;
    use crate::scheduler::Scheduler as CoreScheduler;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn three_fibers_round_robin_through_snooze() {
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            spin::<_, ()>(async move {
                for _ in 0..3 {
                    order.borrow_mut().push(i);
                    snooze().await?;
                }
                Ok(())
            });
        }
        CoreScheduler::run_until_idle();
        assert_eq!(*order.borrow(), vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn receive_delivers_messages_sent_before_the_call_in_order() {
        let fiber = spin(async {
            let first = receive().await?.downcast::<i32>().unwrap();
            let second = receive().await?.downcast::<i32>().unwrap();
            Ok::<_, Error>((first, second))
        });
        fiber.send(1i32);
        fiber.send(2i32);
        CoreScheduler::run_until_idle();
        match fiber.try_result() {
            Some(Outcome::Value(v)) => assert_eq!(v.downcast::<(i32, i32)>().unwrap(), (1, 2)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn receive_pending_drains_without_blocking() {
        let fiber = spin(async {
            crate::api::sleep(Duration::from_millis(5)).await?;
            Ok::<_, Error>(receive_pending().len())
        });
        fiber.send("a");
        fiber.send("b");
        CoreScheduler::run_until_idle();
        match fiber.try_result() {
            Some(Outcome::Value(v)) => assert_eq!(v.downcast::<usize>().unwrap(), 2),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn throttled_loop_runs_exactly_count_times() {
        let counter = Rc::new(RefCell::new(0usize));
        let fiber = spin({
            let counter = counter.clone();
            async move {
                throttled_loop(1000.0, Some(3), |_| {
                    let counter = counter.clone();
                    async move {
                        *counter.borrow_mut() += 1;
                        Ok(())
                    }
                })
                .await
            }
        });
        CoreScheduler::run_until_idle();
        assert!(!fiber.try_result().unwrap().is_failure());
        assert_eq!(*counter.borrow(), 3);
    }
}
