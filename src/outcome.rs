//! A fiber's terminal state: the value it returned, or the failure it
//! raised (spec §3 "Fiber": `result` — "last-known return value or
//! failure, accessible post-mortem").
//!
//! `Outcome` is cheap to `Clone` (a [`crate::Payload`] clone, or an `Rc`
//! clone of the `Error`), which is what lets a completed fiber's result
//! reach every pending `await_waiters` entry and still answer later
//! `result()` queries without the scheduler having to guess how many
//! readers there will be.

use crate::error::Error;
use crate::value::Payload;

#[derive(Debug, Clone)]
pub enum Outcome {
    Value(Payload),
    Failure(Error),
}

impl Outcome {
    pub fn into_result(self) -> Result<Payload, Error> {
        match self {
            Outcome::Value(v) => Ok(v),
            Outcome::Failure(e) => Err(e),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }
}

impl From<Result<Payload, Error>> for Outcome {
    fn from(result: Result<Payload, Error>) -> Self {
        match result {
            Ok(v) => Outcome::Value(v),
            Err(e) => Outcome::Failure(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_result() {
        let outcome = Outcome::from(Ok::<_, Error>(Payload::new(7i32)));
        assert_eq!(outcome.into_result().unwrap().downcast::<i32>().unwrap(), 7);
    }

    #[test]
    fn failure_is_reported() {
        let outcome = Outcome::Failure(Error::failed("boom"));
        assert!(outcome.is_failure());
    }
}
