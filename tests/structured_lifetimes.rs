//! Structured parent/child lifetime invariants (spec §3, §1(e)): a fiber's
//! children are always reachable from a live ancestor, never orphaned when
//! an intermediate fiber in the chain dies.

use polyphony::{Fiber, Scheduler, State};
use std::cell::RefCell;
use std::rc::Rc;

mod common;

/// Spec §3: "parent never points to a dead fiber ... dead parent ⇒ bubble
/// further up." When a worker dies while its own child (the grandchild) is
/// still running, the grandchild must be reattached to the worker's parent
/// rather than set adrift, so it remains visible in that ancestor's
/// `children()` — not lost the way an `S -> W -> G`, `W` dies, `G` orphaned
/// bug would lose it.
#[test]
fn grandchild_bubbles_up_to_its_grandparent_when_the_worker_dies() {
    common::init_logging();
    let grandchild_slot: Rc<RefCell<Option<Fiber>>> = Rc::new(RefCell::new(None));
    let slot_for_worker = grandchild_slot.clone();

    let supervisor = Scheduler::run(move || async move {
        let supervisor = Fiber::spin(async move {
            let worker = Fiber::spin(async move {
                let grandchild = Fiber::spin(async {
                    polyphony::suspend().await?;
                    Ok(())
                });
                *slot_for_worker.borrow_mut() = Some(grandchild);
                // Worker returns immediately, dying while the grandchild is
                // still parked in `suspend`.
                Ok(())
            });
            worker.await_result().await.unwrap();
            // Park here rather than returning immediately, so the bubbled
            // grandchild's new parentage is observable from outside before
            // `supervisor` itself dies and bubbles it again.
            polyphony::suspend().await?;
            Ok(())
        });
        supervisor
    });

    let grandchild = grandchild_slot.borrow().expect("grandchild was spawned");
    assert_eq!(grandchild.state(), State::Waiting);
    assert_eq!(supervisor.state(), State::Waiting);
    assert!(
        supervisor.children().contains(&grandchild),
        "grandchild should have bubbled up into the supervisor's own children set, not been orphaned"
    );
}
