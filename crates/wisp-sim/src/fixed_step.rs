//! Fixed-timestep driver.
//!
//! Frames of arbitrary length are fed in; the driver runs zero or more steps
//! of exactly `dt` each and carries the remainder into the next frame, so
//! the coordinators always see the same tick length regardless of how the
//! run is sliced into report frames.

use std::time::Duration;

/// Fixed-timestep accumulator.
#[derive(Debug, Clone)]
pub struct FixedStep {
    dt: Duration,
    accumulator: Duration,
    elapsed: Duration,
    steps: u64,
}

impl FixedStep {
    /// A driver stepping `tick_rate` times per simulated second. A rate of
    /// zero is treated as one.
    pub fn from_tick_rate(tick_rate: u32) -> Self {
        Self {
            dt: Duration::from_secs(1) / tick_rate.max(1),
            accumulator: Duration::ZERO,
            elapsed: Duration::ZERO,
            steps: 0,
        }
    }

    /// Runs as many fixed steps as `frame` (plus the carried remainder)
    /// covers. Stops at the first step error. Returns the number of steps
    /// run.
    pub fn advance<E>(
        &mut self,
        frame: Duration,
        mut step: impl FnMut(Duration) -> Result<(), E>,
    ) -> Result<u32, E> {
        self.accumulator += frame;
        let mut ran = 0;
        while self.accumulator >= self.dt {
            step(self.dt)?;
            self.accumulator -= self.dt;
            self.elapsed += self.dt;
            self.steps += 1;
            ran += 1;
        }
        Ok(ran)
    }

    /// Length of one step.
    pub fn dt(&self) -> Duration {
        self.dt
    }

    /// Simulated time covered by completed steps.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Completed steps.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Frame time not yet consumed by a step.
    pub fn remainder(&self) -> Duration {
        self.accumulator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    fn count(stepper: &mut FixedStep, frame: Duration) -> u32 {
        stepper
            .advance(frame, |_| Ok::<(), ()>(()))
            .unwrap()
    }

    #[test]
    fn test_dt_from_tick_rate() {
        assert_eq!(FixedStep::from_tick_rate(100).dt(), 10 * MS);
        assert_eq!(FixedStep::from_tick_rate(0).dt(), Duration::from_secs(1));
    }

    #[test]
    fn test_single_step() {
        let mut stepper = FixedStep::from_tick_rate(100);
        assert_eq!(count(&mut stepper, 10 * MS), 1);
        assert_eq!(stepper.remainder(), Duration::ZERO);
    }

    #[test]
    fn test_multiple_steps() {
        let mut stepper = FixedStep::from_tick_rate(100);
        let mut seen = Vec::new();
        stepper
            .advance(30 * MS, |dt| {
                seen.push(dt);
                Ok::<(), ()>(())
            })
            .unwrap();
        assert_eq!(seen, [10 * MS; 3]);
        assert_eq!(stepper.elapsed(), 30 * MS);
        assert_eq!(stepper.steps(), 3);
    }

    #[test]
    fn test_partial_frame_is_carried() {
        let mut stepper = FixedStep::from_tick_rate(100);
        assert_eq!(count(&mut stepper, 5 * MS), 0);
        assert_eq!(stepper.remainder(), 5 * MS);
        assert_eq!(count(&mut stepper, 7 * MS), 1);
        assert_eq!(stepper.remainder(), 2 * MS);
    }

    #[test]
    fn test_zero_frame() {
        let mut stepper = FixedStep::from_tick_rate(60);
        assert_eq!(count(&mut stepper, Duration::ZERO), 0);
        assert_eq!(stepper.steps(), 0);
    }

    #[test]
    fn test_step_error_stops_the_frame() {
        let mut stepper = FixedStep::from_tick_rate(100);
        let mut calls = 0;
        let result = stepper.advance(50 * MS, |_| {
            calls += 1;
            if calls == 2 { Err("boom") } else { Ok(()) }
        });
        assert_eq!(result, Err("boom"));
        assert_eq!(calls, 2);
        assert_eq!(stepper.steps(), 1);
    }

    #[test]
    fn test_slicing_does_not_change_step_count() {
        let mut whole = FixedStep::from_tick_rate(60);
        let mut sliced = FixedStep::from_tick_rate(60);
        count(&mut whole, Duration::from_secs(3));
        for _ in 0..3 {
            count(&mut sliced, Duration::from_millis(700));
        }
        count(&mut sliced, Duration::from_millis(900));
        assert_eq!(whole.steps(), sliced.steps());
        assert_eq!(whole.remainder(), sliced.remainder());
    }
}
