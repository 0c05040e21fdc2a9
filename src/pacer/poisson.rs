use super::*;
use core::sync::atomic::{AtomicU64, Ordering};
use rand::SeedableRng;
use rand_distr::{Distribution as _, Exp};
use rand_xoshiro::Xoshiro512PlusPlus;

// Longest gap drawn between two arrivals.
const MAX_GAP: Duration = Duration::from_secs(86_400);

struct Arrivals {
    next: Instant,
    rng: Xoshiro512PlusPlus,
}

struct State {
    // f64 bits, in operations per second
    rate: AtomicU64,
    arrivals: Mutex<Arrivals>,
}

impl State {
    fn rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Relaxed))
    }

    fn set_rate(&self, rate: f64) {
        self.rate.store(rate.to_bits(), Ordering::Relaxed);
        debug!("poisson rate set to {rate:.2} ops/s");
    }

    // Claim the next arrival time and draw the gap to the one after it.
    fn next_arrival(&self) -> Instant {
        let mut arrivals = self.arrivals.lock();
        let now = Instant::now();
        if arrivals.next < now {
            arrivals.next = now;
        }

        let arrival = arrivals.next;
        if let Ok(exp) = Exp::new(self.rate()) {
            let gap = Duration::try_from_secs_f64(exp.sample(&mut arrivals.rng))
                .map_or(MAX_GAP, |gap| gap.min(MAX_GAP));
            arrivals.next += gap;
        }
        arrival
    }
}

/// Issues requests with exponentially distributed gaps whose mean matches the
/// target rate, optionally ramping up to it.
pub struct PoissonScheduler {
    state: Arc<State>,
    target: f64,
    ramp: Option<RampSchedule>,
    start: Once,
}

impl PoissonScheduler {
    /// `rate` is in operations per second.
    pub fn new(rate: f64, ramp: Option<Duration>) -> Result<Self, SchedulerError> {
        validate_rate(rate)?;
        let ramp = ramp.map(|duration| RampSchedule::new(rate, duration));
        let initial = ramp.map(|r| r.rate_at(Duration::ZERO)).unwrap_or(rate);

        Ok(Self {
            state: Arc::new(State {
                rate: AtomicU64::new(initial.to_bits()),
                arrivals: Mutex::new(Arrivals {
                    next: Instant::now(),
                    rng: Xoshiro512PlusPlus::from_entropy(),
                }),
            }),
            target: rate,
            ramp,
            start: Once::new(),
        })
    }

    pub fn current_rate(&self) -> f64 {
        self.state.rate()
    }

    fn begin(&self) {
        let Some(ramp) = self.ramp else {
            return;
        };

        let state = self.state.clone();
        if let Err(e) = ramp.spawn("poisson-ramp", move |rate| state.set_rate(rate)) {
            error!("failed to start poisson ramp, using the target rate: {e}");
            self.state.set_rate(self.target);
        }
    }
}

impl Scheduler for PoissonScheduler {
    fn schedule(&self) {
        self.start.call_once(|| self.begin());
        let start = Instant::now();
        sleep_until(self.state.next_arrival());
        record_wait(start);
    }
}
