use metriken::{metric, AtomicHistogram, Counter, Gauge, LazyCounter, LazyGauge};

/*
 * Object pool
 */

#[metric(name = "pool/objects/available")]
pub static POOL_AVAILABLE: LazyGauge = LazyGauge::new(Gauge::default);

#[metric(name = "pool/objects/reading")]
pub static POOL_READING: LazyGauge = LazyGauge::new(Gauge::default);

#[metric(name = "pool/objects/updating")]
pub static POOL_UPDATING: LazyGauge = LazyGauge::new(Gauge::default);

#[metric(name = "pool/add")]
pub static POOL_ADD: LazyCounter = LazyCounter::new(Counter::default);

#[metric(name = "pool/get")]
pub static POOL_GET: LazyCounter = LazyCounter::new(Counter::default);

#[metric(name = "pool/get_once/retry")]
pub static POOL_GET_ONCE_RETRY: LazyCounter = LazyCounter::new(Counter::default);

#[metric(name = "pool/remove")]
pub static POOL_REMOVE: LazyCounter = LazyCounter::new(Counter::default);

#[metric(name = "pool/update")]
pub static POOL_UPDATE: LazyCounter = LazyCounter::new(Counter::default);

#[metric(name = "pool/exhausted")]
pub static POOL_EXHAUSTED: LazyCounter = LazyCounter::new(Counter::default);

#[metric(name = "pool/persist/total")]
pub static PERSIST: LazyCounter = LazyCounter::new(Counter::default);

#[metric(name = "pool/persist/exception")]
pub static PERSIST_EX: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "pool/persist/latency",
    metadata = { unit = "nanoseconds" }
)]
pub static PERSIST_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(name = "pool/persist/surplus")]
pub static PERSIST_SURPLUS: LazyCounter = LazyCounter::new(Counter::default);

#[metric(name = "pool/persist/borrowed")]
pub static PERSIST_BORROWED: LazyCounter = LazyCounter::new(Counter::default);

/*
 * Scheduler
 */

#[metric(name = "scheduler/schedule")]
pub static SCHEDULE: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "scheduler/wait",
    metadata = { unit = "nanoseconds" }
)]
pub static SCHEDULE_WAIT: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(name = "scheduler/ramp/step")]
pub static RAMP_STEP: LazyCounter = LazyCounter::new(Counter::default);

/*
 * Simulated workload
 */

#[metric(name = "request/total")]
pub static REQUEST: LazyCounter = LazyCounter::new(Counter::default);

#[metric(name = "request/unavailable")]
pub static REQUEST_UNAVAILABLE: LazyCounter = LazyCounter::new(Counter::default);

#[metric(name = "response/ok")]
pub static RESPONSE_OK: LazyCounter = LazyCounter::new(Counter::default);

#[metric(name = "response/exception")]
pub static RESPONSE_EX: LazyCounter = LazyCounter::new(Counter::default);
