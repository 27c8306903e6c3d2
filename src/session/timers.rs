//! Deadline queue for the session loop.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use crate::worker::Role;

/// Work that becomes due at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// Grab a frame and hand it to the vision worker.
    Capture,
    /// Restart a crashed worker instance.
    Restart { role: Role, generation: u64 },
    /// Run the move worker for the scheduled move.
    ExecuteMove,
}

#[derive(Debug)]
struct Entry {
    due: Instant,
    serial: u64,
    timer: Timer,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.serial == other.serial
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Max-heap: the earliest deadline, then the earliest insertion, is greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.serial.cmp(&self.serial))
    }
}

/// Timers ordered by deadline; equal deadlines fire in insertion order.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Entry>,
    serial: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_at(&mut self, due: Instant, timer: Timer) {
        self.serial += 1;
        self.heap.push(Entry {
            due,
            serial: self.serial,
            timer,
        });
    }

    pub fn schedule_in(&mut self, delay: Duration, timer: Timer) {
        self.schedule_at(Instant::now() + delay, timer);
    }

    /// Removes every pending `timer`.
    pub fn cancel(&mut self, timer: Timer) {
        self.heap.retain(|e| e.timer != timer);
    }

    pub fn is_scheduled(&self, timer: Timer) -> bool {
        self.heap.iter().any(|e| e.timer == timer)
    }

    /// Deadline of the next timer.
    pub fn next_due(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.due)
    }

    /// Pops the next timer if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<Timer> {
        if self.heap.peek()?.due > now {
            return None;
        }
        self.heap.pop().map(|e| e.timer)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earliest_deadline_first() {
        let mut q = TimerQueue::new();
        let now = Instant::now();
        q.schedule_at(now + Duration::from_millis(30), Timer::Capture);
        q.schedule_at(now + Duration::from_millis(10), Timer::ExecuteMove);
        q.schedule_at(
            now + Duration::from_millis(20),
            Timer::Restart {
                role: Role::Engine,
                generation: 2,
            },
        );

        assert_eq!(q.next_due(), Some(now + Duration::from_millis(10)));
        assert_eq!(q.pop_due(now), None);
        let later = now + Duration::from_millis(50);
        assert_eq!(q.pop_due(later), Some(Timer::ExecuteMove));
        assert!(matches!(q.pop_due(later), Some(Timer::Restart { .. })));
        assert_eq!(q.pop_due(later), Some(Timer::Capture));
        assert!(q.is_empty());
    }

    #[test]
    fn ties_fire_in_insertion_order() {
        let mut q = TimerQueue::new();
        let now = Instant::now();
        q.schedule_at(now, Timer::Capture);
        q.schedule_at(now, Timer::ExecuteMove);
        assert_eq!(q.pop_due(now), Some(Timer::Capture));
        assert_eq!(q.pop_due(now), Some(Timer::ExecuteMove));
    }

    #[test]
    fn cancel_removes_all_matching() {
        let mut q = TimerQueue::new();
        q.schedule_in(Duration::ZERO, Timer::Capture);
        q.schedule_in(Duration::from_secs(1), Timer::Capture);
        q.schedule_in(Duration::from_secs(1), Timer::ExecuteMove);
        q.cancel(Timer::Capture);
        assert_eq!(q.len(), 1);
        assert!(!q.is_scheduled(Timer::Capture));
        assert!(q.is_scheduled(Timer::ExecuteMove));
    }
}
