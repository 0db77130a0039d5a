//! Cancellation signals: tagged unwind reasons delivered to a fiber.
//!
//! These are not OS signals and not ordinary [`crate::Error`] values raised
//! by application code — they are the scheduler's own vocabulary for
//! interrupting a suspended fiber, per spec §3 and §4.3.

use crate::value::Payload;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a particular [`crate::scope::CancelScope`] so that a `MoveOn`
/// signal is only caught by the scope that armed it, even when scopes nest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A tagged unwind reason. See spec §3 "Signals".
///
/// `Clone` because a signal may need to be redelivered to several
/// `await_waiters` of the same fiber (e.g. a cascading `Terminate` reaching
/// a fiber with more than one awaiter).
#[derive(Debug, Clone)]
pub enum Signal {
    /// Silent unwind up to the scope identified by `ScopeId`; that scope
    /// converts it into a plain value instead of propagating it further.
    MoveOn(ScopeId, Payload),
    /// Unwind that surfaces as an error at the scope boundary unless caught;
    /// not swallowed by any scope automatically.
    Cancel,
    /// Supervisor-requested unwind. Ordinary `?`-based handlers should not
    /// intercept it — only resource guards (via `Drop`) run as it unwinds.
    Terminate,
    /// User-initiated abort. Behaves like `Terminate` but application code
    /// is permitted to catch it explicitly.
    Interrupt(Payload),
}

impl Signal {
    /// Precedence used when coalescing multiple pending deliveries to the
    /// same fiber (spec §4.3): `Terminate > Cancel > Interrupt > MoveOn`.
    pub fn priority(&self) -> u8 {
        match self {
            Signal::Terminate => 3,
            Signal::Cancel => 2,
            Signal::Interrupt(_) => 1,
            Signal::MoveOn(..) => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Signal::MoveOn(..) => "MoveOn",
            Signal::Cancel => "Cancel",
            Signal::Terminate => "Terminate",
            Signal::Interrupt(_) => "Interrupt",
        }
    }
}
