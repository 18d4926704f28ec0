//! # Timer Events
//!
//! Purpose: Relative-time timers for the event loop.
//!
//! ## Design Principles
//! 1. **Small-N List**: Client-side loops carry a handful of timers (reconnect,
//!    heartbeats), so insertion is O(1) and the nearest-timer search is a
//!    linear scan.
//! 2. **Monotonic Clock**: Due times are `Instant`s; wall-clock jumps cannot
//!    stall or burst timers.
//! 3. **Drift-Free Requeue**: A requeued timer is rescheduled relative to the
//!    moment its handler returned, never to the missed due time.

use std::fmt;
use std::time::{Duration, Instant};

use crate::event_loop::EventLoop;

/// Identifier returned by `EventLoop::add_timer`, unique per loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a timer handler wants after it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Fire again after the given delay, measured from now.
    Requeue(Duration),
    /// Remove the timer.
    NoMore,
}

/// Stand-in deadline for delays past the clock's range.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Due time `delay` from now. Delays the clock cannot represent saturate to
/// a deadline that is never reached in practice.
pub(crate) fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

pub type TimerHandler = Box<dyn FnMut(&mut EventLoop, TimerId) -> TimerAction>;

struct TimerEvent {
    id: TimerId,
    when: Instant,
    // `None` only while the handler is running.
    handler: Option<TimerHandler>,
}

/// Timers owned by one event loop.
pub(crate) struct TimerList {
    next_id: u64,
    timers: Vec<TimerEvent>,
}

impl TimerList {
    pub(crate) fn new() -> Self {
        TimerList {
            next_id: 0,
            timers: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, delay: Duration, handler: TimerHandler) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.timers.push(TimerEvent {
            id,
            when: deadline_after(delay),
            handler: Some(handler),
        });
        id
    }

    pub(crate) fn remove(&mut self, id: TimerId) -> bool {
        match self.timers.iter().position(|t| t.id == id) {
            Some(idx) => {
                self.timers.swap_remove(idx);
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }

    /// Earliest due time among live timers.
    pub(crate) fn nearest(&self) -> Option<Instant> {
        self.timers.iter().map(|t| t.when).min()
    }

    /// Appends the ids of timers due at `now`.
    pub(crate) fn collect_due(&self, now: Instant, out: &mut Vec<TimerId>) {
        out.extend(self.timers.iter().filter(|t| t.when <= now).map(|t| t.id));
    }

    pub(crate) fn take_handler(&mut self, id: TimerId) -> Option<TimerHandler> {
        self.timers
            .iter_mut()
            .find(|t| t.id == id)
            .and_then(|t| t.handler.take())
    }

    /// Puts a handler back with a new due time. A timer removed while its
    /// handler ran stays removed.
    pub(crate) fn rearm(&mut self, id: TimerId, handler: TimerHandler, when: Instant) {
        if let Some(timer) = self.timers.iter_mut().find(|t| t.id == id) {
            timer.when = when;
            timer.handler = Some(handler);
        }
    }
}
