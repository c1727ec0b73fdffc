//! The simulated clock.
//!
//! Time advances only when the engine reaches the next scheduled instant.
//! The clock never moves backwards, may be capped by a ceiling, may snap
//! dates onto a quantization grid, and may optionally pace itself against
//! wall-clock time.

use crate::common::Time;
use crate::error::{SimError, SimResult};
use std::time::Duration;
use tracing::trace;

/// Outcome of [`Clock::advance_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The clock reached the requested date.
    Complete,
    /// The requested date lay beyond the ceiling; the clock stopped there.
    Truncated,
}

/// Holds simulated time.
#[derive(Debug, Clone)]
pub struct Clock {
    value: Time,
    maximum: Option<Time>,
    granularity: Option<Time>,
    realtime_scale: Option<f64>,
}

impl Clock {
    /// Creates a clock at `start` with no ceiling, grid or pacing.
    pub fn new(start: Time) -> Self {
        Self {
            value: start,
            maximum: None,
            granularity: None,
            realtime_scale: None,
        }
    }

    pub fn with_maximum(mut self, maximum: Option<Time>) -> Self {
        self.maximum = maximum;
        self
    }

    pub fn with_granularity(mut self, granularity: Option<Time>) -> Self {
        self.granularity = granularity.filter(|g| *g > 0.0);
        self
    }

    pub fn with_realtime_scale(mut self, scale: Option<f64>) -> Self {
        self.realtime_scale = scale.filter(|s| *s > 0.0);
        self
    }

    /// Current simulated time.
    #[inline]
    pub fn now(&self) -> Time {
        self.value
    }

    pub fn maximum(&self) -> Option<Time> {
        self.maximum
    }

    pub fn set_maximum(&mut self, maximum: Option<Time>) {
        self.maximum = maximum;
    }

    pub fn granularity(&self) -> Option<Time> {
        self.granularity
    }

    /// Returns `true` once the clock sits on its ceiling.
    pub fn at_maximum(&self) -> bool {
        matches!(self.maximum, Some(max) if self.value >= max)
    }

    /// Rewinds the clock for a fresh run. Only the engine calls this.
    pub(crate) fn reset(&mut self, start: Time) {
        self.value = start;
    }

    /// Rounds `t` to the nearest multiple of the granularity (half rounds up).
    ///
    /// Without a granularity `t` is returned unchanged.
    pub fn convert(&self, t: Time) -> Time {
        match self.granularity {
            Some(step) => ((t / step) + 0.5).floor() * step,
            None => t,
        }
    }

    /// Moves the clock forward to `t`.
    ///
    /// Fails with `InvalidAdvance` if `t` is behind the current value. When
    /// `t` exceeds the ceiling the clock only reaches the ceiling and
    /// `Advance::Truncated` is reported.
    pub fn advance_to(&mut self, t: Time) -> SimResult<Advance> {
        if t < self.value {
            return Err(SimError::InvalidAdvance {
                requested: t,
                current: self.value,
            });
        }
        let (target, outcome) = match self.maximum {
            Some(max) if t > max => (max.max(self.value), Advance::Truncated),
            _ => (t, Advance::Complete),
        };
        let elapsed = target - self.value;
        self.value = target;
        if let Some(scale) = self.realtime_scale {
            if elapsed > 0.0 {
                trace!("pacing {} simulated units", elapsed);
                std::thread::sleep(Duration::from_secs_f64(elapsed * scale));
            }
        }
        Ok(outcome)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(0.0)
    }
}
