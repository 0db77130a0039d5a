//! Timer Service: armed one-shot/periodic wake-ups tied to fibers (spec §3
//! "Timer", §4.5).
//!
//! Entries live in a min-heap keyed by `fire_at`. Cancellation (scope exit,
//! `CancelScope::cancel!`, a loop's `count` bound being reached) is O(log n)
//! lazy deletion: the id is recorded as cancelled and the heap entry is
//! simply skipped when it would otherwise fire, rather than walked out of
//! the heap eagerly.

use crate::fiber::types::FiberId;
use crate::signal::Signal;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// What a firing timer delivers to its target fiber.
#[derive(Debug, Clone)]
pub enum TimerPayload {
    Value,
    Signal(Signal),
}

struct Entry {
    fire_at: Instant,
    id: TimerId,
    target: FiberId,
    payload: TimerPayload,
    /// `Some(period)` for a periodic timer (`every`); re-armed on each fire.
    period: Option<Duration>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    /// Reversed so `BinaryHeap` (a max-heap) pops the *earliest* `fire_at`.
    fn cmp(&self, other: &Self) -> Ordering {
        other.fire_at.cmp(&self.fire_at)
    }
}

#[derive(Default)]
pub(crate) struct TimerService {
    heap: BinaryHeap<Entry>,
    cancelled: HashSet<TimerId>,
    next_id: u64,
}

impl TimerService {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_id: 1,
        }
    }

    /// Arm a one-shot timer against `target`, firing after `delay`.
    pub fn arm(&mut self, delay: Duration, target: FiberId, payload: TimerPayload) -> TimerId {
        self.arm_at(Instant::now() + delay, target, payload, None)
    }

    /// Arm a periodic timer (`every`): the first fire is after `period`, and
    /// it re-arms itself for another `period` each time it fires.
    pub fn arm_periodic(
        &mut self,
        period: Duration,
        target: FiberId,
        payload: TimerPayload,
    ) -> TimerId {
        self.arm_at(Instant::now() + period, target, payload, Some(period))
    }

    fn arm_at(
        &mut self,
        fire_at: Instant,
        target: FiberId,
        payload: TimerPayload,
        period: Option<Duration>,
    ) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.heap.push(Entry {
            fire_at,
            id,
            target,
            payload,
            period,
        });
        id
    }

    /// Disarm a timer. Safe to call after it has already fired, or twice.
    pub fn cancel(&mut self, id: TimerId) {
        self.cancelled.insert(id);
    }

    pub fn is_empty(&self) -> bool {
        self.heap.iter().all(|entry| self.cancelled.contains(&entry.id))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap
            .iter()
            .filter(|entry| !self.cancelled.contains(&entry.id))
            .map(|entry| entry.fire_at)
            .min()
    }

    /// Pop every entry whose deadline has passed, re-arming periodic ones.
    /// Cancelled entries are dropped silently.
    pub fn drain_expired(&mut self, now: Instant) -> Vec<(FiberId, TimerPayload)> {
        let mut fired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.fire_at > now {
                break;
            }
            let entry = self.heap.pop().expect("peeked entry must pop");
            if self.cancelled.remove(&entry.id) {
                continue;
            }
            if let Some(period) = entry.period {
                self.heap.push(Entry {
                    fire_at: now + period,
                    id: entry.id,
                    target: entry.target,
                    payload: entry.payload.clone(),
                    period: Some(period),
                });
            }
            fired.push((entry.target, entry.payload));
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fid(n: usize) -> FiberId {
        FiberId(n)
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut timers = TimerService::new();
        let now = Instant::now();
        timers.arm_at(now + Duration::from_millis(20), fid(1), TimerPayload::Value, None);
        timers.arm_at(now + Duration::from_millis(5), fid(2), TimerPayload::Value, None);
        let fired = timers.drain_expired(now + Duration::from_millis(30));
        assert_eq!(fired[0].0, fid(2));
        assert_eq!(fired[1].0, fid(1));
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let mut timers = TimerService::new();
        let now = Instant::now();
        let id = timers.arm(Duration::from_millis(1), fid(1), TimerPayload::Value);
        timers.cancel(id);
        let fired = timers.drain_expired(now + Duration::from_millis(10));
        assert!(fired.is_empty());
    }

    #[test]
    fn periodic_timer_rearms() {
        let mut timers = TimerService::new();
        let now = Instant::now();
        timers.arm_periodic(Duration::from_millis(5), fid(1), TimerPayload::Value);
        let first = timers.drain_expired(now + Duration::from_millis(6));
        assert_eq!(first.len(), 1);
        assert!(!timers.is_empty());
        let second = timers.drain_expired(now + Duration::from_millis(12));
        assert_eq!(second.len(), 1);
    }
}
