use super::*;

/// Shortest time a ramp step is held.
pub const MIN_STEP_WIDTH: Duration = Duration::from_millis(100);

/// A piecewise-constant ramp from near zero up to a target rate.
///
/// The ramp has `min(floor(target), duration / MIN_STEP_WIDTH)` steps, at
/// least one. Each step lasts `duration / steps` and raises the rate by
/// `target / steps`, so a target of at least one op/s never rises by less
/// than one op/s per step and the final step runs at the target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RampSchedule {
    target: f64,
    steps: u64,
    width: Duration,
}

impl RampSchedule {
    pub fn new(target: f64, duration: Duration) -> Self {
        let by_rate = target.floor() as u64;
        let by_time = (duration.as_nanos() / MIN_STEP_WIDTH.as_nanos()) as u64;
        let steps = by_rate.min(by_time).max(1);
        let width = Duration::from_nanos((duration.as_nanos() / steps as u128) as u64);

        Self {
            target,
            steps,
            width,
        }
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn step_width(&self) -> Duration {
        self.width
    }

    /// Rate added by each step.
    pub fn increment(&self) -> f64 {
        self.target / self.steps as f64
    }

    /// Offset from the start of the ramp at which `step` begins.
    pub fn step_start(&self, step: u64) -> Duration {
        Duration::from_nanos((self.width.as_nanos() * step as u128) as u64)
    }

    /// The rate in effect `elapsed` after the ramp started.
    pub fn rate_at(&self, elapsed: Duration) -> f64 {
        let step = (elapsed.as_nanos() / self.width.as_nanos().max(1)) as u64;
        if step + 1 >= self.steps {
            self.target
        } else {
            (step + 1) as f64 * self.increment()
        }
    }

    /// The rate of every step, in order.
    pub fn rates(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.steps).map(|step| self.rate_at(self.step_start(step)))
    }

    /// Run the ramp on a dedicated thread, calling `apply` with the new rate
    /// at the start of every step after the first.
    pub(crate) fn spawn<F>(self, name: &str, apply: F) -> std::io::Result<()>
    where
        F: Fn(f64) + Send + 'static,
    {
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let start = Instant::now();
                for step in 1..self.steps {
                    let offset = self.step_start(step);
                    sleep_until(start + offset);
                    apply(self.rate_at(offset));
                    RAMP_STEP.increment();
                }
                debug!("ramp reached {:.2} ops/s", self.target);
            })?;
        Ok(())
    }
}
