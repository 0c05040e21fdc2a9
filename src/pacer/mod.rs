//! Admission control for the driver. A scheduler decides when a worker may
//! issue its next request, either by bounding the number of requests in
//! flight or by pacing them at a target rate. Every variant can ramp up to
//! its target over a configured duration.

use crate::config::{self, Distribution, Mode};
use crate::metrics::*;
use parking_lot::{Condvar, Mutex, RwLock};
use ringlog::*;
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};
use thiserror::Error;

mod concurrency;
mod poisson;
mod ramp;
mod rate;

pub use concurrency::ConcurrentScheduler;
pub use poisson::PoissonScheduler;
pub use ramp::{RampSchedule, MIN_STEP_WIDTH};
pub use rate::RateScheduler;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("rate must be a positive number of operations per second, got {0}")]
    InvalidRate(f64),
    #[error("concurrency must be at least 1")]
    InvalidConcurrency,
    #[error("failed to build ratelimiter: {0:?}")]
    Ratelimit(ratelimit::Error),
    #[error("failed to start ramp thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub trait Scheduler: Send + Sync {
    /// Block until the caller may issue one request.
    fn schedule(&self);

    /// Signal that a scheduled request finished.
    fn complete(&self) {}
}

/// Build the scheduler described by the config.
pub fn build(config: &config::Scheduler) -> Result<Arc<dyn Scheduler>, SchedulerError> {
    let ramp = config.ramp();

    let scheduler: Arc<dyn Scheduler> = match config.mode() {
        Mode::Concurrency => Arc::new(ConcurrentScheduler::new(config.max_concurrency(), ramp)?),
        Mode::Rate => match config.distribution() {
            Distribution::Uniform => Arc::new(RateScheduler::new(config.ops_per_second(), ramp)?),
            Distribution::Poisson => {
                Arc::new(PoissonScheduler::new(config.ops_per_second(), ramp)?)
            }
        },
    };

    Ok(scheduler)
}

fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        std::thread::sleep(deadline - now);
    }
}

fn validate_rate(rate: f64) -> Result<(), SchedulerError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        Err(SchedulerError::InvalidRate(rate))
    }
}

fn record_wait(start: Instant) {
    SCHEDULE.increment();
    let _ = SCHEDULE_WAIT.increment(start.elapsed().as_nanos() as u64);
}
