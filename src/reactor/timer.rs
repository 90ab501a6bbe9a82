//! Deferred callbacks for the event loop.
//!
//! The loop asks [`TimerQueue::next_remaining`] how long it may block, then
//! fires every callback whose deadline has passed. Callbacks run on the
//! thread driving the loop, in deadline order.

use std::time::{Duration, Instant};

pub(crate) type Callback = Box<dyn FnOnce() + Send>;

/// Identifies a scheduled callback so it can be cancelled before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TimerId(u64);

struct Timer {
    deadline: Instant,
    id: TimerId,
    callback: Callback,
}

#[derive(Default)]
pub(crate) struct TimerQueue {
    timers: Vec<Timer>,
    next_id: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, deadline: Instant, callback: Callback) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);

        self.timers.push(Timer {
            deadline,
            id,
            callback,
        });

        id
    }

    /// Returns `false` if the timer already fired or was never registered.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.timers.len();
        self.timers.retain(|timer| timer.id != id);

        self.timers.len() != before
    }

    /// Removes every expired timer and hands back its callback, earliest first.
    ///
    /// The callbacks are returned rather than invoked so the caller can run
    /// them without holding a borrow of the queue.
    pub(crate) fn take_expired(&mut self) -> Vec<Callback> {
        let now = Instant::now();

        let (mut expired, pending): (Vec<Timer>, Vec<Timer>) = self
            .timers
            .drain(..)
            .partition(|timer| timer.deadline <= now);
        self.timers = pending;

        expired.sort_by_key(|timer| timer.deadline);
        expired.into_iter().map(|timer| timer.callback).collect()
    }

    /// Time until the earliest deadline, zero if one has already passed.
    pub(crate) fn next_remaining(&self) -> Option<Duration> {
        let now = Instant::now();

        self.timers
            .iter()
            .map(|timer| timer.deadline.saturating_duration_since(now))
            .min()
    }
}
