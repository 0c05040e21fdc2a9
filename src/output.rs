use crate::metrics::*;
use crate::pool::ObjectManager;
use core::sync::atomic::{AtomicBool, Ordering};
use ringlog::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[derive(Clone, Copy, Default)]
struct Snapshot {
    requests: u64,
    ok: u64,
    ex: u64,
    unavailable: u64,
    persists: u64,
    persist_ex: u64,
    surplus: u64,
    borrowed: u64,
}

impl Snapshot {
    fn capture() -> Self {
        Self {
            requests: REQUEST.value(),
            ok: RESPONSE_OK.value(),
            ex: RESPONSE_EX.value(),
            unavailable: REQUEST_UNAVAILABLE.value(),
            persists: PERSIST.value(),
            persist_ex: PERSIST_EX.value(),
            surplus: PERSIST_SURPLUS.value(),
            borrowed: PERSIST_BORROWED.value(),
        }
    }

    fn delta(&self, previous: &Self) -> Self {
        Self {
            requests: self.requests - previous.requests,
            ok: self.ok - previous.ok,
            ex: self.ex - previous.ex,
            unavailable: self.unavailable - previous.unavailable,
            persists: self.persists - previous.persists,
            persist_ex: self.persist_ex - previous.persist_ex,
            surplus: self.surplus - previous.surplus,
            borrowed: self.borrowed - previous.borrowed,
        }
    }
}

/// Log a summary of the previous window every `interval` until the test
/// ends.
pub async fn log(interval: Duration, pool: Arc<ObjectManager>, running: Arc<AtomicBool>) {
    let mut previous = Snapshot::capture();
    let mut window_start = Instant::now();

    while running.load(Ordering::Relaxed) {
        sleep(interval).await;

        let current = Snapshot::capture();
        let window = current.delta(&previous);
        let elapsed = window_start.elapsed().as_secs_f64();
        previous = current;
        window_start = Instant::now();

        info!("-----");
        info!(
            "Requests: {} rate: {:.2}/s ok: {} ex: {} unavailable: {}",
            window.requests,
            window.requests as f64 / elapsed,
            window.ok,
            window.ex,
            window.unavailable
        );
        info!(
            "Pool: objects: {} reading: {} updating: {}",
            pool.len(),
            pool.checked_out_for_read(),
            pool.checked_out_for_update()
        );
        info!(
            "Persist: passes: {} ex: {} surplus: {} borrowed: {}",
            window.persists, window.persist_ex, window.surplus, window.borrowed
        );
    }
}
