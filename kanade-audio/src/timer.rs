//! Deferred callbacks, expressed as completions the owner polls.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::completion::{self, Completer, Completion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// A pending timer: its id (for cancellation) and the signal that fires when it elapses.
#[derive(Debug)]
pub struct ScheduledTimer {
    pub id: TimerId,
    pub fired: Completion,
}

pub trait Timer {
    fn schedule(&self, delay: Duration) -> ScheduledTimer;
    /// Cancelling a timer that already fired (or never existed) does nothing.
    fn cancel(&self, id: TimerId);
}

struct PendingTimer {
    id: TimerId,
    deadline: Duration,
    completer: Completer,
}

#[derive(Default)]
struct FrameTimerState {
    now: Duration,
    next_id: u64,
    pending: Vec<PendingTimer>,
}

/// A timer driven by the game loop: nothing fires until [`FrameTimer::advance`] is called.
#[derive(Default)]
pub struct FrameTimer {
    state: Mutex<FrameTimerState>,
}

impl FrameTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Advances the clock and fires every timer that became due, earliest deadline first.
    pub fn advance(&self, delta: Duration) {
        let mut state = self.state.lock();
        state.now += delta;
        let now = state.now;

        let (mut due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
            .into_iter()
            .partition(|timer| timer.deadline <= now);
        state.pending = pending;
        drop(state);

        due.sort_by_key(|timer| timer.deadline);
        for timer in due {
            trace!("Timer {:?} fired", timer.id);
            timer.completer.complete();
        }
    }
}

impl Timer for FrameTimer {
    fn schedule(&self, delay: Duration) -> ScheduledTimer {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = TimerId(state.next_id);
        let (completer, fired) = completion::channel();
        let deadline = state.now + delay;
        state.pending.push(PendingTimer {
            id,
            deadline,
            completer,
        });
        ScheduledTimer { id, fired }
    }

    fn cancel(&self, id: TimerId) {
        let mut state = self.state.lock();
        // dropping the completer would look like a fire to the receiving side,
        // so the owner must also forget its `ScheduledTimer`
        state.pending.retain(|timer| timer.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_due() {
        let timer = FrameTimer::new();
        let scheduled = timer.schedule(Duration::from_millis(2000));

        timer.advance(Duration::from_millis(1999));
        assert!(!scheduled.fired.is_complete());
        timer.advance(Duration::from_millis(1));
        assert_eq!(timer.now(), Duration::from_millis(2000));
        assert!(scheduled.fired.is_complete());
        assert_eq!(timer.pending_count(), 0);
    }

    #[test]
    fn cancelled_timer_is_forgotten() {
        let timer = FrameTimer::new();
        let scheduled = timer.schedule(Duration::from_millis(10));
        let other = timer.schedule(Duration::from_millis(10));
        timer.cancel(scheduled.id);
        assert_eq!(timer.pending_count(), 1);

        timer.advance(Duration::from_millis(10));
        assert!(other.fired.is_complete());
    }

    #[test]
    fn zero_delay_fires_on_next_advance() {
        let timer = FrameTimer::new();
        let scheduled = timer.schedule(Duration::ZERO);
        assert!(!scheduled.fired.is_complete());
        timer.advance(Duration::ZERO);
        assert!(scheduled.fired.is_complete());
    }
}
