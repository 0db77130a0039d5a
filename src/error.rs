//! Error handling for the Polyphony fiber runtime
//!
//! This module defines the error types used throughout the scheduler,
//! following the same hand-rolled `Display` + `std::error::Error` shape the
//! rest of this crate's ancestry uses, generalized from one interpreter's
//! error kinds to the fiber runtime's.

use crate::signal::Signal;
use crate::trace::Trace;
use std::fmt;
use std::rc::Rc;

/// Error types for the Polyphony runtime
///
/// `Clone` so that a fiber's terminal failure can be handed to every
/// `await_waiters` entry and read again later via `result()`, the same way
/// a successful [`crate::Payload`] fans out (`Raised.source` and `Io` are
/// `Rc`-wrapped to make that cheap).
#[derive(Debug, Clone)]
pub enum Error {
    /// A cancellation signal reached a suspension point. `Cancel` and
    /// `Interrupt` surface here so application code can catch them with an
    /// ordinary `match`/`?`; `Terminate` also arrives this way but by
    /// convention is left unhandled so it keeps unwinding (spec §4.3, §7).
    Signal(Signal),

    /// A failure re-raised across `await()`, carrying the composed
    /// cross-fiber trace described in spec §7.
    Raised { source: Rc<Error>, trace: Trace },

    /// An ordinary application failure raised inside a fiber body.
    Failed(String),

    /// `supervise` was called with neither children nor a block (spec §4.4,
    /// §7.3).
    UsageError(String),

    /// An operation referenced a fiber id the scheduler no longer knows
    /// about (already reaped, or never valid).
    FiberNotFound,

    /// `resume_fiber`/`schedule` targeted a fiber that was not suspended.
    NotSuspended,

    /// A non-blocking I/O operation failed for a reason other than
    /// "would block".
    Io(Rc<std::io::Error>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Signal(Signal::Cancel) => write!(f, "cancelled"),
            Error::Signal(Signal::Terminate) => write!(f, "terminated"),
            Error::Signal(Signal::Interrupt(_)) => write!(f, "interrupted"),
            Error::Signal(Signal::MoveOn(..)) => write!(f, "moved on"),
            Error::Raised { source, trace } => {
                write!(f, "{source}\n--- spawned from ---\n{trace}")
            }
            Error::Failed(msg) => write!(f, "{msg}"),
            Error::UsageError(msg) => write!(f, "usage error: {msg}"),
            Error::FiberNotFound => write!(f, "fiber not found"),
            Error::NotSuspended => write!(f, "fiber is not suspended"),
            Error::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<Signal> for Error {
    fn from(signal: Signal) -> Self {
        Error::Signal(signal)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Rc::new(err))
    }
}

/// Result type alias for Polyphony operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::UsageError(message.into())
    }

    /// Compose `self` (a failing child's error) with the awaiter's own
    /// spawn-site trace, per spec §7's cross-fiber trace composition.
    pub fn raised_with(self, trace: Trace) -> Self {
        match self {
            // Avoid double-wrapping when a failure is re-raised repeatedly
            // up a chain of `await()`s; extend the existing trace instead.
            Error::Raised {
                source,
                trace: mut existing,
            } => {
                existing.0.extend(trace.0);
                Error::Raised {
                    source,
                    trace: existing,
                }
            }
            other => Error::Raised {
                source: Rc::new(other),
                trace,
            },
        }
    }

    /// Whether this error is a `Cancel` signal specifically (as opposed to
    /// `Interrupt`/`Terminate`/an ordinary failure).
    pub fn is_cancel(&self) -> bool {
        matches!(self, Error::Signal(Signal::Cancel))
    }

    pub fn is_terminate(&self) -> bool {
        matches!(self, Error::Signal(Signal::Terminate))
    }
}
