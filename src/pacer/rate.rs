use super::*;
use core::sync::atomic::{AtomicU64, Ordering};
use ratelimit::Ratelimiter;

// Longest single sleep while waiting for a token, so a limiter replaced by
// the ramp is picked up promptly.
const MAX_WAIT: Duration = Duration::from_millis(10);

/// Build a token bucket that admits `rate` operations per second.
pub(crate) fn ratelimiter(rate: f64) -> Result<Ratelimiter, SchedulerError> {
    validate_rate(rate)?;

    let amount = (rate / 1_000_000.0).ceil() as u64;

    // even though we might not have nanosecond level clock resolution, by
    // using a nanosecond level duration, we achieve more accurate ratelimits.
    let interval = Duration::from_nanos(((1_000_000_000.0 / (rate / amount as f64)) as u64).max(1));

    let capacity = std::cmp::max(100, amount);

    Ratelimiter::builder(amount, interval)
        .max_tokens(capacity)
        .build()
        .map_err(SchedulerError::Ratelimit)
}

// The limiter in use, replaced wholesale at each ramp step.
struct Limiter {
    current: RwLock<Arc<Ratelimiter>>,
    rate: AtomicU64,
}

impl Limiter {
    fn new(rate: f64) -> Result<Self, SchedulerError> {
        Ok(Self {
            current: RwLock::new(Arc::new(ratelimiter(rate)?)),
            rate: AtomicU64::new(rate.to_bits()),
        })
    }

    fn install(&self, rate: f64) {
        match ratelimiter(rate) {
            Ok(limiter) => {
                *self.current.write() = Arc::new(limiter);
                self.rate.store(rate.to_bits(), Ordering::Relaxed);
                debug!("rate set to {rate:.2} ops/s");
            }
            Err(e) => error!("failed to update rate to {rate}: {e}"),
        }
    }

    fn rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Relaxed))
    }

    fn wait(&self) {
        loop {
            let limiter = self.current.read().clone();
            match limiter.try_wait() {
                Ok(()) => return,
                Err(wait) => std::thread::sleep(wait.min(MAX_WAIT)),
            }
        }
    }
}

/// Issues requests at a uniform rate, optionally ramping up to it.
pub struct RateScheduler {
    limiter: Arc<Limiter>,
    target: f64,
    ramp: Option<RampSchedule>,
    start: Once,
}

impl RateScheduler {
    /// `rate` is in operations per second.
    pub fn new(rate: f64, ramp: Option<Duration>) -> Result<Self, SchedulerError> {
        validate_rate(rate)?;
        let ramp = ramp.map(|duration| RampSchedule::new(rate, duration));
        let initial = ramp.map(|r| r.rate_at(Duration::ZERO)).unwrap_or(rate);

        Ok(Self {
            limiter: Arc::new(Limiter::new(initial)?),
            target: rate,
            ramp,
            start: Once::new(),
        })
    }

    /// The rate currently being enforced.
    pub fn current_rate(&self) -> f64 {
        self.limiter.rate()
    }

    pub fn ramp(&self) -> Option<&RampSchedule> {
        self.ramp.as_ref()
    }

    fn begin(&self) {
        // a fresh limiter, so nothing accrued before the first request
        self.limiter.install(self.current_rate());

        let Some(ramp) = self.ramp else {
            return;
        };

        let limiter = self.limiter.clone();
        if let Err(e) = ramp.spawn("rate-ramp", move |rate| limiter.install(rate)) {
            error!("failed to start rate ramp, using the target rate: {e}");
            self.limiter.install(self.target);
        }
    }
}

impl Scheduler for RateScheduler {
    fn schedule(&self) {
        self.start.call_once(|| self.begin());
        let start = Instant::now();
        self.limiter.wait();
        record_wait(start);
    }
}
