//! Shared helpers for the black-box scenario tests (spec §8).

use std::sync::Once;
use std::time::{Duration, Instant};

static LOGGER: Once = Once::new();

/// Install `env_logger` once per test binary, so `RUST_LOG=polyphony=trace`
/// surfaces the scheduler's `log::trace!`/`debug!` calls (fiber spawns,
/// deaths, delivered signals) when a scenario misbehaves. Guarded by
/// `Once` because several `#[test]` functions in the same binary call this,
/// and `env_logger::init()` panics if installed twice.
pub fn init_logging() {
    LOGGER.call_once(|| {
        env_logger::init();
    });
}

/// Assert that `elapsed` is within `[floor, floor + slack]` — the
/// "returns after elapsed >= d and before d + epsilon" shape used by
/// several timing-sensitive scenarios (spec §8 property 3).
pub fn assert_elapsed_within(started: Instant, floor: Duration, slack: Duration) {
    let elapsed = started.elapsed();
    assert!(
        elapsed >= floor,
        "expected at least {floor:?} to have elapsed, got {elapsed:?}"
    );
    assert!(
        elapsed <= floor + slack,
        "expected at most {:?} to have elapsed, got {elapsed:?}",
        floor + slack
    );
}
