//! Supervisor: a fiber coordinating the lifetimes of a set of children
//! (spec §4.4).
//!
//! The core scheduler has no built-in "wait for any of N fibers" primitive
//! (spec §4.1's `switch_fiber` only ever resumes with one coalesced
//! delivery at a time), so death order among several children is recovered
//! the same way ordinary application code would: one small watcher fiber
//! per child relays `(index, Outcome)` back to the supervisor over its
//! mailbox, in the true order each `await_result` resolves.

use crate::error::Error;
use crate::fiber::Fiber;
use crate::outcome::Outcome;
use crate::scheduler::Scheduler;

/// `supervise(*fibers) { |f, v| ... }` (spec §4.4): suspend the caller
/// until every fiber in `children` has died, invoking `on_event(child,
/// outcome)` once per death, in death order. Cascades `terminate` to every
/// still-live child if the supervisor itself is terminated, and awaits
/// their death before propagating (spec §4.4 "on its own termination").
///
/// Fails immediately with a usage error if `children` is empty (spec §7.3).
pub async fn supervise<F>(children: &[Fiber], mut on_event: F) -> crate::Result<()>
where
    F: FnMut(Fiber, Outcome),
{
    if children.is_empty() {
        return Err(Error::usage(
            "supervise requires at least one child fiber",
        ));
    }

    let supervisor_id =
        Scheduler::current_fiber().expect("supervise requires a running fiber");
    let supervisor = Fiber { id: supervisor_id };

    for (index, child) in children.iter().copied().enumerate() {
        Fiber::spin(async move {
            let outcome = match child.await_result().await {
                Ok(value) => Outcome::Value(value),
                Err(err) => Outcome::Failure(err),
            };
            supervisor.send((index, outcome));
            Ok::<(), Error>(())
        });
    }

    let mut remaining = children.len();
    let watch = async {
        while remaining > 0 {
            let (index, outcome) = crate::api::receive()
                .await?
                .downcast::<(usize, Outcome)>()
                .expect("supervise watcher always sends (usize, Outcome)");
            on_event(children[index], outcome);
            remaining -= 1;
        }
        Ok(())
    };
    let result = watch.await;

    if let Err(err) = &result {
        if err.is_terminate() {
            for child in children {
                child.terminate();
            }
            for child in children {
                let _ = child.await_result().await;
            }
        }
    }
    result
}
