//! Source locations and the composed backtraces attached to fiber failures.
//!
//! A [`Trace`] is the language-neutral analogue of a call stack: a list of
//! [`Frame`]s captured at spawn sites. When a failing child is re-raised
//! through [`crate::fiber::Fiber::await_result`], its own trace is extended
//! with the frames captured at each ancestor's `spin` call, producing a
//! multi-level chain `[innermost, mid, outer]` per spec §7.

use std::fmt;

/// A source position, captured with `#[track_caller]` at fiber creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

impl Location {
    #[track_caller]
    pub fn caller() -> Self {
        let loc = std::panic::Location::caller();
        Self {
            file: loc.file(),
            line: loc.line(),
            column: loc.column(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// One entry in a composed trace: the spawn site and the fiber's tag, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub location: Location,
    pub tag: Option<String>,
}

impl Frame {
    pub fn new(location: Location, tag: Option<String>) -> Self {
        Self { location, tag }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{} (fiber {tag:?})", self.location),
            None => write!(f, "{}", self.location),
        }
    }
}

/// A composed backtrace: innermost frame first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace(pub Vec<Frame>);

impl Trace {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn of(frame: Frame) -> Self {
        Self(vec![frame])
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f, "\n--- spawned from ---")?;
            }
            write!(f, "{frame}")?;
        }
        Ok(())
    }
}
