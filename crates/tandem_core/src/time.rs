//! Deterministic time system
//!
//! Fixed tick rate with an accumulator that turns variable wall-clock frames
//! into whole simulation ticks.

use std::time::Duration;

/// Simulation tick number (4 bytes on every wire format)
pub type Tick = u32;

/// Default simulation tick rate (60 Hz = 16.666ms per tick)
pub const DEFAULT_TICK_RATE_HZ: u32 = 60;

/// Highest supported tick rate; keeps every tick at least a millisecond long.
pub const MAX_TICK_RATE_HZ: u32 = 1_000;

/// Duration of one tick at `hz`. A zero rate falls back to the default and
/// rates above [`MAX_TICK_RATE_HZ`] are capped, so the result is never zero.
pub fn tick_duration(hz: u32) -> Duration {
    let hz = if hz == 0 { DEFAULT_TICK_RATE_HZ } else { hz.min(MAX_TICK_RATE_HZ) };
    Duration::from_nanos(1_000_000_000 / hz as u64)
}

/// Simulation time tracker
pub struct SimulationTime {
    tick_count: Tick,
    tick_duration: Duration,
    accumulated_time: Duration,
}

impl SimulationTime {
    pub fn new(hz: u32) -> Self {
        Self {
            tick_count: 0,
            tick_duration: tick_duration(hz),
            accumulated_time: Duration::ZERO,
        }
    }

    pub fn tick_count(&self) -> Tick {
        self.tick_count
    }

    pub fn advance_tick(&mut self) {
        self.tick_count = self.tick_count.wrapping_add(1);
        self.accumulated_time += self.tick_duration;
    }

    /// Jump to an adopted tick (resync, late join).
    pub fn reset_to(&mut self, tick: Tick) {
        self.tick_count = tick;
        self.accumulated_time = self.tick_duration * tick;
    }

    pub fn total_time(&self) -> Duration {
        self.accumulated_time
    }
}

impl Default for SimulationTime {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_RATE_HZ)
    }
}

/// Fixed-step accumulator for a render/driver loop.
///
/// `accumulate` is fed the real frame delta and returns how many fixed ticks
/// are due. Catch-up is capped so a long hitch does not spiral.
pub struct FixedTimestep {
    step: Duration,
    accumulator: Duration,
    max_steps_per_frame: u32,
}

impl FixedTimestep {
    pub fn new(hz: u32) -> Self {
        Self {
            step: tick_duration(hz),
            accumulator: Duration::ZERO,
            max_steps_per_frame: 8,
        }
    }

    pub fn with_max_steps(mut self, max_steps_per_frame: u32) -> Self {
        self.max_steps_per_frame = max_steps_per_frame.max(1);
        self
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn accumulate(&mut self, frame_delta: Duration) -> u32 {
        self.accumulator += frame_delta;
        let mut due = 0;
        while self.accumulator >= self.step && due < self.max_steps_per_frame {
            self.accumulator -= self.step;
            due += 1;
        }
        if due == self.max_steps_per_frame && self.accumulator >= self.step {
            // Drop the backlog rather than chase it forever.
            self.accumulator = Duration::from_nanos(
                (self.accumulator.as_nanos() % self.step.as_nanos()) as u64,
            );
        }
        due
    }

    /// Interpolation factor between the last two ticks, in `[0, 1)`.
    pub fn alpha(&self) -> f32 {
        self.accumulator.as_secs_f32() / self.step.as_secs_f32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_duration_handles_zero_rate() {
        assert_eq!(tick_duration(0), tick_duration(60));
        assert_eq!(tick_duration(50), Duration::from_millis(20));
    }

    #[test]
    fn tick_duration_is_never_zero() {
        assert_eq!(tick_duration(2_000_000_000), Duration::from_millis(1));
        assert_eq!(tick_duration(u32::MAX), tick_duration(MAX_TICK_RATE_HZ));

        let mut step = FixedTimestep::new(u32::MAX);
        assert_eq!(step.step(), Duration::from_millis(1));
        assert_eq!(step.accumulate(Duration::from_millis(1)), 1);
    }

    #[test]
    fn simulation_time_advances_and_resets() {
        let mut time = SimulationTime::new(50);
        time.advance_tick();
        time.advance_tick();
        assert_eq!(time.tick_count(), 2);
        assert_eq!(time.total_time(), Duration::from_millis(40));

        time.reset_to(10);
        assert_eq!(time.tick_count(), 10);
        assert_eq!(time.total_time(), Duration::from_millis(200));
    }

    #[test]
    fn accumulator_emits_whole_ticks() {
        let mut step = FixedTimestep::new(50);
        assert_eq!(step.accumulate(Duration::from_millis(10)), 0);
        assert_eq!(step.accumulate(Duration::from_millis(15)), 1);
        assert!((step.alpha() - 0.25).abs() < 1e-3);
        assert_eq!(step.accumulate(Duration::from_millis(40)), 2);
    }

    #[test]
    fn accumulator_caps_catch_up() {
        let mut step = FixedTimestep::new(50).with_max_steps(3);
        assert_eq!(step.accumulate(Duration::from_secs(1)), 3);
        assert!(step.alpha() < 1.0);
        assert_eq!(step.accumulate(Duration::ZERO), 0);
    }
}
