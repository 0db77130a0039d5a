//! Black-box cancellation scenarios: timeouts, interruption, and
//! termination (spec §8 properties 4-6; scenarios S2, S3, S4).

use polyphony::{Fiber, Outcome, Payload, Scheduler};
use std::time::{Duration, Instant};

mod common;

/// S3 / property 4: `move_on_after(d) { sleep(10*d); :foo }` returns the
/// timeout value in time approximately `d`, not after the full sleep.
#[test]
fn s3_move_on_after_times_out_with_the_given_value() {
    common::init_logging();
    let started = Instant::now();
    let value = Scheduler::run(|| async {
        polyphony::move_on_after(Duration::from_millis(10), "bar", async {
            polyphony::sleep(Duration::from_millis(100)).await?;
            Ok("foo")
        })
        .await
        .unwrap()
    });
    assert_eq!(value, "bar");
    common::assert_elapsed_within(started, Duration::from_millis(10), Duration::from_millis(60));
}

/// `move_on_after` returns the body's own value when it finishes before
/// the deadline, and does not wait out the full timer.
#[test]
fn move_on_after_returns_body_value_when_body_finishes_first() {
    common::init_logging();
    let value = Scheduler::run(|| async {
        polyphony::move_on_after(Duration::from_millis(100), "bar", async { Ok("foo") })
            .await
            .unwrap()
    });
    assert_eq!(value, "foo");
}

/// S4 / property 5: `cancel_after(d) { sleep(10*d) }` raises `Cancel` at
/// the scope boundary in time approximately `d`; the caller can still
/// catch it as an ordinary error.
#[test]
fn s4_cancel_after_raises_cancel_caught_by_the_caller() {
    common::init_logging();
    let started = Instant::now();
    let value = Scheduler::run(|| async {
        let result = polyphony::cancel_after(Duration::from_millis(10), async {
            polyphony::sleep(Duration::from_millis(1000)).await?;
            Ok(())
        })
        .await;
        match result {
            Err(e) if e.is_cancel() => "cancelled",
            _ => "not cancelled",
        }
    });
    assert_eq!(value, "cancelled");
    common::assert_elapsed_within(started, Duration::from_millis(10), Duration::from_millis(60));
}

/// S2 / property 6: a fiber `interrupt`ed while sleeping transitions to
/// `dead` on the next turn, with a `nil` result rather than a recorded
/// failure (spec §7.2: cancellation signals are not ordinary failures).
#[test]
fn s2_interrupted_fiber_dies_with_nil_result() {
    common::init_logging();
    let fiber = Scheduler::run(|| async {
        let fiber = Fiber::spin(async {
            polyphony::sleep(Duration::from_secs(1)).await?;
            Ok(42i32)
        });
        Fiber::spin({
            let fiber = fiber;
            async move {
                fiber.interrupt(Payload::nil());
                Ok::<_, polyphony::Error>(())
            }
        });
        let _ = fiber.await_result().await;
        fiber
    });

    match fiber.try_result() {
        Some(Outcome::Value(v)) => assert!(v.is_nil()),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

/// A fiber `stop`ped while sleeping dies with a `nil` result too (spec
/// §4.2 `stop`: "schedule a `MoveOn`... the target unwinds silently to its
/// outermost user frame").
#[test]
fn stop_while_sleeping_kills_the_fiber_with_nil_result() {
    common::init_logging();
    let fiber = Scheduler::run(|| async {
        let fiber = Fiber::spin(async {
            polyphony::sleep(Duration::from_secs(1)).await?;
            Ok(42i32)
        });
        fiber.stop(Payload::nil());
        let _ = fiber.await_result().await;
        fiber
    });

    match fiber.try_result() {
        Some(Outcome::Value(v)) => assert!(v.is_nil()),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

/// `stop(value)` carries `value` through to the fiber's recorded result
/// rather than always landing as `nil` (spec §4.2 `stop(value=nil)`).
#[test]
fn stop_carries_its_value_through_to_the_result() {
    common::init_logging();
    let fiber = Scheduler::run(|| async {
        let fiber = Fiber::spin(async {
            polyphony::sleep(Duration::from_secs(1)).await?;
            Ok(42i32)
        });
        fiber.stop(Payload::new("stopped"));
        let _ = fiber.await_result().await;
        fiber
    });

    match fiber.try_result() {
        Some(Outcome::Value(v)) => assert_eq!(v.downcast::<&str>().unwrap(), "stopped"),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

/// `stop` delivers a `MoveOn`, never a `Cancel` — so code catching a
/// `sleep`'s error at the point of suspension can tell a `stop()` apart
/// from a genuine `cancel_after` cancellation via `Error::is_cancel()`
/// (the bug this test guards against: `stop` previously scheduled
/// `Signal::Cancel`, making the two indistinguishable at this point, even
/// though both happen to degrade to the same `Outcome::Value` once they
/// reach the fiber's root uncaught).
#[test]
fn stop_signal_is_not_mistaken_for_a_cancel_signal_at_the_suspension_point() {
    common::init_logging();
    let was_cancel = Scheduler::run(|| async {
        let fiber = Fiber::spin(async {
            let result = polyphony::sleep(Duration::from_secs(1000)).await;
            Ok(result.is_err() && result.unwrap_err().is_cancel())
        });
        fiber.stop(Payload::nil());
        fiber.await_result().await.unwrap().downcast::<bool>().unwrap()
    });
    assert!(!was_cancel);
}

/// Explicit `CancelScope` form: `c.cancel(value)` delivers the same way a
/// timer-armed `move_on_after` would, without waiting for a deadline.
#[test]
fn explicit_cancel_scope_stop_mode_is_caught_by_its_own_scope() {
    common::init_logging();
    let value = Scheduler::run(|| async {
        let scope = polyphony::CancelScope::new(polyphony::Mode::Stop);
        let handle = scope.handle();
        Fiber::spin(async move {
            handle.cancel(Payload::new("cancelled early"));
            Ok::<_, polyphony::Error>(())
        });
        let result = scope
            .run(None, async {
                polyphony::sleep(Duration::from_secs(1000)).await?;
                Ok(Payload::new("never"))
            })
            .await
            .unwrap();
        result.downcast::<&str>().unwrap()
    });
    assert_eq!(value, "cancelled early");
}
