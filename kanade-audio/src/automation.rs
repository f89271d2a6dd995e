use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Idle,
    Ramping {
        values: (f32, f32),
        start: f64,
        duration: f64,
    },
}

/// Holds a gain value and the linear ramp (if any) scheduled on it.
///
/// Unlike a frame-stepped tweener this is evaluated against an absolute clock, the same one the
/// backend reports as its current time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainAutomation {
    state: State,
    value: f32,
}

impl GainAutomation {
    pub fn new(value: f32) -> Self {
        Self {
            state: State::Idle,
            value,
        }
    }

    /// Returns an linearly interpolated value between `a` and `b`.
    fn lerp(a: f32, b: f32, amount: f32) -> f32 {
        a + (b - a) * amount
    }

    pub fn value_at(&self, now: f64) -> f32 {
        match self.state {
            State::Idle => self.value,
            State::Ramping {
                values: (from, to),
                start,
                duration,
            } => {
                let elapsed = now - start;
                if elapsed >= duration {
                    to
                } else if elapsed <= 0.0 {
                    from
                } else {
                    Self::lerp(from, to, (elapsed / duration) as f32)
                }
            }
        }
    }

    /// The value the automation settles on once every scheduled change has run.
    pub fn target(&self) -> f32 {
        match self.state {
            State::Idle => self.value,
            State::Ramping {
                values: (_, to), ..
            } => to,
        }
    }

    /// Whether some change is still scheduled at `now`.
    pub fn is_idle(&self, now: f64) -> bool {
        match self.state {
            State::Idle => true,
            State::Ramping {
                start, duration, ..
            } => now - start >= duration,
        }
    }

    /// Jumps to the value, dropping whatever was scheduled.
    pub fn set(&mut self, value: f32) {
        self.state = State::Idle;
        self.value = value;
    }

    /// Starts a linear ramp from the value at `now`, replacing the previous ramp.
    pub fn ramp_to(&mut self, now: f64, value: f32, duration: Duration) {
        let current = self.value_at(now);
        if duration.is_zero() {
            self.set(value);
            return;
        }
        self.value = current;
        self.state = State::Ramping {
            values: (current, value),
            start: now,
            duration: duration.as_secs_f64(),
        };
    }

    /// Cancels the scheduled ramp, holding the value reached at `now`.
    pub fn cancel(&mut self, now: f64) {
        let current = self.value_at(now);
        self.set(current);
    }
}
