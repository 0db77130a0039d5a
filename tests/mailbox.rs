//! Mailbox scenarios: FIFO delivery and non-blocking drains (spec §8
//! property 9), plus the pipe/concurrent-sleeper scenario S6.

use polyphony::{Fiber, Scheduler};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

mod common;

/// Property 9: messages sent before `receive` are delivered in send order.
#[test]
fn messages_sent_before_receive_are_delivered_in_order() {
    common::init_logging();
    let (first, second) = Scheduler::run(|| async {
        let fiber = Fiber::spin(async {
            let first = polyphony::receive().await?.downcast::<i32>().unwrap();
            let second = polyphony::receive().await?.downcast::<i32>().unwrap();
            Ok::<_, polyphony::Error>((first, second))
        });
        fiber.send(1i32);
        fiber.send(2i32);
        fiber.await_result().await.unwrap().downcast().unwrap()
    });
    assert_eq!((first, second), (1, 2));
}

/// Property 9: `receive_pending` empties the mailbox atomically — every
/// message queued before the call comes back in one drain, none left over.
#[test]
fn receive_pending_drains_the_whole_mailbox_at_once() {
    common::init_logging();
    let (drained, remaining) = Scheduler::run(|| async {
        let fiber = Fiber::spin(async {
            polyphony::sleep(Duration::from_millis(5)).await?;
            let drained = polyphony::receive_pending();
            let remaining = polyphony::receive_pending();
            Ok::<_, polyphony::Error>((drained.len(), remaining.len()))
        });
        fiber.send("a");
        fiber.send("b");
        fiber.send("c");
        fiber.await_result().await.unwrap().downcast().unwrap()
    });
    assert_eq!(drained, 3);
    assert_eq!(remaining, 0);
}

/// A fiber suspended in `receive` wakes immediately once `send` targets it,
/// rather than waiting for the next mailbox poll.
#[test]
fn send_wakes_a_fiber_parked_in_receive() {
    common::init_logging();
    let received = Scheduler::run(|| async {
        let fiber = Fiber::spin(async { Ok(polyphony::receive().await?.downcast::<&str>().unwrap()) });
        Fiber::spin({
            let fiber = fiber;
            async move {
                polyphony::sleep(Duration::from_millis(5)).await?;
                fiber.send("hi");
                Ok::<_, polyphony::Error>(())
            }
        });
        fiber.await_result().await.unwrap().downcast::<&str>().unwrap()
    });
    assert_eq!(received, "hi");
}

/// S6: a pipe writer writes "hello" then closes; the reader's `read`
/// returns "hello", while an unrelated sleeping fiber concurrently
/// increments a counter to 5 — I/O readiness waits never block timers.
#[test]
fn s6_pipe_transfer_runs_concurrently_with_an_unrelated_sleeper() {
    use polyphony::io::{pipe, readpartial, write};

    common::init_logging();
    let counter = Rc::new(RefCell::new(0));
    let counter_for_sleeper = counter.clone();

    let received = Scheduler::run(move || async move {
        let (reader, writer) = pipe().expect("pipe");

        Fiber::spin(async move {
            write(&writer, b"hello").await?;
            drop(writer);
            Ok::<_, polyphony::Error>(())
        });

        Fiber::spin(async move {
            for _ in 0..5 {
                polyphony::sleep(Duration::from_millis(1)).await?;
                *counter_for_sleeper.borrow_mut() += 1;
            }
            Ok::<_, polyphony::Error>(())
        });

        let mut buf = [0u8; 16];
        let n = readpartial(&reader, &mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    });

    assert_eq!(received, "hello");
    assert_eq!(*counter.borrow(), 5);
}
