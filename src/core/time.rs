//! Tick timing: a monotonically advancing clock and fixed-rate cadences

/// Identity of one engine tick.
///
/// `tick` distinguishes ticks even when `time` does not advance (paused or
/// zero-delta frames), which is what movement caching keys on.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TickStamp {
    pub tick: u64,
    /// Seconds since the clock started
    pub time: f64,
}

/// Clock advanced once per engine tick by the host's frame delta
#[derive(Debug, Default)]
pub struct TickClock {
    tick: u64,
    time: f64,
    delta: f32,
}

impl TickClock {
    /// Create a new clock at tick 0, time 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by `delta_secs` (negative deltas are clamped to zero)
    pub fn advance(&mut self, delta_secs: f32) -> TickStamp {
        self.delta = delta_secs.max(0.0);
        self.tick += 1;
        self.time += self.delta as f64;
        self.now()
    }

    /// Stamp of the most recent tick
    pub fn now(&self) -> TickStamp {
        TickStamp {
            tick: self.tick,
            time: self.time,
        }
    }

    /// Delta of the most recent tick in seconds
    pub fn delta_secs(&self) -> f32 {
        self.delta
    }
}

/// Fires at a fixed interval independent of the tick rate.
///
/// Leftover time carries into the next period, but at most one period is
/// kept so a long stall does not cause a burst of catch-up firings.
#[derive(Clone, Debug)]
pub struct Cadence {
    interval: f32,
    accumulated: f32,
}

impl Cadence {
    /// Create a cadence firing every `interval` seconds
    pub fn new(interval: f32) -> Self {
        Self {
            interval: interval.max(0.0),
            accumulated: 0.0,
        }
    }

    /// Accumulate `delta_secs`; returns true when the interval elapsed
    pub fn tick(&mut self, delta_secs: f32) -> bool {
        self.accumulated += delta_secs.max(0.0);
        if self.accumulated >= self.interval {
            self.accumulated = (self.accumulated - self.interval).min(self.interval);
            true
        } else {
            false
        }
    }

    /// Discard accumulated time
    pub fn reset(&mut self) {
        self.accumulated = 0.0;
    }

    pub fn interval(&self) -> f32 {
        self.interval
    }
}
