use super::*;

struct Permits {
    available: usize,
    in_flight: usize,
}

struct Semaphore {
    permits: Mutex<Permits>,
    released: Condvar,
}

impl Semaphore {
    fn acquire(&self) {
        let mut permits = self.permits.lock();
        while permits.available == 0 {
            self.released.wait(&mut permits);
        }
        permits.available -= 1;
        permits.in_flight += 1;
    }

    fn release(&self) {
        let mut permits = self.permits.lock();
        if permits.in_flight == 0 {
            warn!("completion without a scheduled request ignored");
            return;
        }
        permits.in_flight -= 1;
        permits.available += 1;
        self.released.notify_one();
    }

    // add permits that were not available before
    fn grant(&self, count: usize) {
        let mut permits = self.permits.lock();
        permits.available += count;
        self.released.notify_all();
    }
}

/// Bounds the number of requests in flight. With a ramp, starts with no
/// permits and grants them one at a time so concurrency grows linearly to
/// the target over the ramp duration.
pub struct ConcurrentScheduler {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    ramp: Option<Duration>,
    start: Once,
}

impl ConcurrentScheduler {
    pub fn new(concurrency: usize, ramp: Option<Duration>) -> Result<Self, SchedulerError> {
        if concurrency == 0 {
            return Err(SchedulerError::InvalidConcurrency);
        }

        let initial = if ramp.is_some() { 0 } else { concurrency };

        Ok(Self {
            semaphore: Arc::new(Semaphore {
                permits: Mutex::new(Permits {
                    available: initial,
                    in_flight: 0,
                }),
                released: Condvar::new(),
            }),
            concurrency,
            ramp,
            start: Once::new(),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.semaphore.permits.lock().in_flight
    }

    pub fn available(&self) -> usize {
        self.semaphore.permits.lock().available
    }

    fn begin(&self) {
        let Some(ramp) = self.ramp else {
            return;
        };

        let semaphore = self.semaphore.clone();
        let concurrency = self.concurrency;
        let spawned = std::thread::Builder::new()
            .name("concurrency-ramp".to_string())
            .spawn(move || {
                let start = Instant::now();
                for permit in 1..=concurrency {
                    sleep_until(start + ramp.mul_f64(permit as f64 / concurrency as f64));
                    semaphore.grant(1);
                    RAMP_STEP.increment();
                }
                debug!("concurrency ramp reached {concurrency}");
            });

        if let Err(e) = spawned {
            error!("failed to start concurrency ramp, using full concurrency: {e}");
            self.semaphore.grant(concurrency);
        }
    }
}

impl Scheduler for ConcurrentScheduler {
    fn schedule(&self) {
        self.start.call_once(|| self.begin());
        let start = Instant::now();
        self.semaphore.acquire();
        record_wait(start);
    }

    fn complete(&self) {
        self.semaphore.release();
    }
}
