//! A simulated driver. Worker threads pick weighted object commands, wait on
//! the scheduler and drive the object pool exactly as a load test would, with
//! the outcome of each request drawn at random instead of coming back from a
//! storage service.

use crate::config::{Command, Config, ObjectCommand, ObjectVerb};
use crate::metrics::*;
use crate::pacer::Scheduler;
use crate::pool::{ObjectManager, PoolError};
use crate::record::{ObjectName, ObjectRecord, Retention};
use core::sync::atomic::{AtomicBool, Ordering};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore, SeedableRng};
use rand_distr::{Distribution, WeightedAliasIndex, WeightedError};
use rand_xoshiro::{Seed512, Xoshiro512PlusPlus};
use ringlog::*;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::runtime::{Builder, Runtime};

// retention added by each extend-retention request
const RETENTION_EXTENSION_SECS: u64 = 3600;

/// Spawn `threads` blocking workers that generate requests until `running`
/// is cleared.
pub fn launch_workload(
    generator: Generator,
    config: &Config,
    running: Arc<AtomicBool>,
) -> std::io::Result<Runtime> {
    debug!("Launching workload...");

    let threads = config.general().threads();

    let workload_rt = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(1)
        .max_blocking_threads(threads)
        .build()?;

    // initialize a PRNG from the configured seed. We then use this to generate
    // unique seeds for each workload thread.
    let mut rng = match config.workload().initial_seed() {
        Some(seed) => Xoshiro512PlusPlus::seed_from_u64(seed),
        None => Xoshiro512PlusPlus::from_entropy(),
    };

    for _ in 0..threads {
        let generator = generator.clone();
        let running = running.clone();

        let mut seed = [0; 64];
        rng.fill_bytes(&mut seed);

        workload_rt.spawn_blocking(move || {
            // since this seed is unique, each workload thread should produce
            // requests in a different sequence
            let mut rng = Xoshiro512PlusPlus::from_seed(Seed512(seed));

            while running.load(Ordering::Relaxed) {
                generator.generate(&mut rng);
            }
        });
    }

    Ok(workload_rt)
}

#[derive(Clone)]
pub struct Generator {
    pool: Arc<ObjectManager>,
    scheduler: Arc<dyn Scheduler>,
    commands: Vec<ObjectCommand>,
    command_dist: WeightedAliasIndex<usize>,
    name_len: usize,
    version_len: usize,
    object_size: u64,
    containers: u32,
    success_ratio: f64,
}

impl Generator {
    pub fn new(
        config: &Config,
        pool: Arc<ObjectManager>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, WeightedError> {
        let workload = config.workload();

        let commands = workload.commands().to_vec();
        let command_dist =
            WeightedAliasIndex::new(commands.iter().map(|c| c.weight()).collect())?;

        Ok(Self {
            pool,
            scheduler,
            commands,
            command_dist,
            name_len: config.pool().name_len() as usize,
            version_len: config.pool().version_len() as usize,
            object_size: workload.object_size(),
            containers: workload.containers(),
            success_ratio: 1.0 - workload.failure_ratio(),
        })
    }

    /// Issue one request.
    pub fn generate(&self, rng: &mut dyn RngCore) {
        let command = self.commands[self.command_dist.sample(rng)];

        self.scheduler.schedule();
        REQUEST.increment();
        let result = self.execute(&command, rng);
        self.scheduler.complete();

        match result {
            Ok(true) => {
                RESPONSE_OK.increment();
            }
            Ok(false) => {
                RESPONSE_EX.increment();
            }
            Err(e) if e.is_retryable() => {
                REQUEST_UNAVAILABLE.increment();
            }
            Err(PoolError::TestEnded) | Err(PoolError::Terminated) => {}
            Err(e) => {
                error!("{:?} request failed: {e}", command.verb());
                RESPONSE_EX.increment();
            }
        }
    }

    // Run one command against the pool. Returns whether the simulated request
    // succeeded.
    fn execute(&self, command: &ObjectCommand, rng: &mut dyn RngCore) -> Result<bool, PoolError> {
        match command.verb() {
            ObjectVerb::Write => {
                let record = self.new_object(rng);
                let success = self.outcome(rng);
                if success {
                    self.pool.add(record)?;
                }
                Ok(success)
            }
            ObjectVerb::Read => {
                let record = self.pool.get()?;
                let success = self.outcome(rng);
                self.pool.get_complete(&record);
                Ok(success)
            }
            ObjectVerb::Metadata => {
                let record = self.pool.get_once()?;
                let success = self.outcome(rng);
                self.pool.get_complete(&record);
                Ok(success)
            }
            ObjectVerb::Delete => {
                // a failed delete leaves the object in an unknown state, so
                // it is not returned to the pool
                self.pool.remove()?;
                Ok(self.outcome(rng))
            }
            ObjectVerb::Overwrite | ObjectVerb::LegalHold | ObjectVerb::ExtendRetention => {
                let original = self.pool.remove_for_update()?;
                let success = self.outcome(rng);
                let record = if success {
                    self.mutate(command.verb(), original, rng)
                } else {
                    original
                };
                self.pool.update_object(record)?;
                Ok(success)
            }
            ObjectVerb::MultiDelete => self.multi_delete(command.cardinality(), rng),
        }
    }

    fn multi_delete(&self, cardinality: usize, rng: &mut dyn RngCore) -> Result<bool, PoolError> {
        let mut names: Vec<ObjectName> = Vec::with_capacity(cardinality);
        for _ in 0..cardinality {
            match self.pool.get() {
                Ok(record) => {
                    self.pool.get_complete(&record);
                    if !names.contains(&record.name) {
                        names.push(record.name);
                    }
                }
                Err(PoolError::Exhausted) => break,
                Err(e) => return Err(e),
            }
        }

        let mut checked_out = Vec::with_capacity(names.len());
        for name in &names {
            match self.pool.remove_object(name) {
                Ok(record) => checked_out.push(record),
                // taken by another request since we looked
                Err(e) if e.is_retryable() => continue,
                Err(e) => {
                    self.restore(checked_out);
                    return Err(e);
                }
            }
        }

        if checked_out.is_empty() {
            return Err(PoolError::Exhausted);
        }

        let mut success = true;
        for record in checked_out {
            if self.outcome(rng) {
                if self
                    .pool
                    .get_object_from_updating_cache(&record.name)?
                    .is_some()
                {
                    self.pool.remove_updated_object_by_name(&record.name)?;
                }
            } else {
                success = false;
                self.pool.update_object(record)?;
            }
        }

        Ok(success)
    }

    fn restore(&self, records: Vec<ObjectRecord>) {
        for record in records {
            if let Err(e) = self.pool.update_object(record) {
                debug!("failed to restore object: {e}");
            }
        }
    }

    fn mutate(&self, verb: ObjectVerb, mut record: ObjectRecord, rng: &mut dyn RngCore) -> ObjectRecord {
        match verb {
            ObjectVerb::Overwrite => {
                record.size = self.object_size;
                if self.version_len > 0 {
                    record.version = Some(self.version_token(rng));
                }
            }
            ObjectVerb::LegalHold => {
                record.legal_holds = record.legal_holds.saturating_add(1);
            }
            ObjectVerb::ExtendRetention => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                let current = match record.retention {
                    Retention::Until(secs) => secs.max(now),
                    Retention::Unset | Retention::Inherit => now,
                };
                record.retention = Retention::Until(current + RETENTION_EXTENSION_SECS);
            }
            _ => {}
        }
        record
    }

    fn new_object(&self, rng: &mut dyn RngCore) -> ObjectRecord {
        let suffix = if self.containers > 0 {
            Some(rng.gen_range(0..self.containers))
        } else {
            None
        };

        let mut record = ObjectRecord::new(
            ObjectName::random(self.name_len, rng),
            self.object_size,
            suffix,
        );
        if self.version_len > 0 {
            record.version = Some(self.version_token(rng));
        }
        record
    }

    fn version_token(&self, rng: &mut dyn RngCore) -> String {
        (0..self.version_len)
            .map(|_| rng.sample(Alphanumeric) as char)
            .collect()
    }

    fn outcome(&self, rng: &mut dyn RngCore) -> bool {
        rng.gen_bool(self.success_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacer::ConcurrentScheduler;
    use std::time::Duration;

    fn config(dir: &std::path::Path, commands: &str, failure_ratio: f64) -> Config {
        format!(
            r#"
[general]
threads = 2

[pool]
directory = {:?}
version_len = 8

[scheduler]
mode = "concurrency"
concurrency = 4

[workload]
containers = 3
failure_ratio = {failure_ratio}
initial_seed = 42
{commands}
"#,
            dir.to_str().unwrap()
        )
        .parse()
        .unwrap()
    }

    fn generator(config: &Config) -> (Generator, Arc<ObjectManager>) {
        let pool = Arc::new(
            ObjectManager::new(config.pool(), Arc::new(AtomicBool::new(true))).unwrap(),
        );
        let scheduler = Arc::new(ConcurrentScheduler::new(4, None).unwrap());
        (
            Generator::new(config, pool.clone(), scheduler).unwrap(),
            pool,
        )
    }

    const WRITES: &str = r#"
[[workload.commands]]
verb = "write"
"#;

    const MIXED: &str = r#"
[[workload.commands]]
verb = "write"
weight = 6

[[workload.commands]]
verb = "read"

[[workload.commands]]
verb = "metadata"

[[workload.commands]]
verb = "overwrite"

[[workload.commands]]
verb = "legal_hold"

[[workload.commands]]
verb = "extend_retention"

[[workload.commands]]
verb = "delete"

[[workload.commands]]
verb = "multi_delete"
cardinality = 3
"#;

    #[test]
    fn writes_fill_the_pool() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), WRITES, 0.0);
        let (generator, pool) = generator(&config);
        let mut rng = Xoshiro512PlusPlus::seed_from_u64(1);

        for _ in 0..100 {
            generator.generate(&mut rng);
        }
        assert_eq!(pool.len(), 100);

        let record = pool.get().unwrap();
        assert_eq!(record.name.len(), 18);
        assert_eq!(record.version.as_ref().map(|v| v.len()), Some(8));
        assert!(record.container_suffix.unwrap() < 3);
        pool.get_complete(&record);
    }

    #[test]
    fn failed_writes_are_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), WRITES, 1.0);
        let (generator, pool) = generator(&config);
        let mut rng = Xoshiro512PlusPlus::seed_from_u64(1);

        for _ in 0..20 {
            generator.generate(&mut rng);
        }
        assert!(pool.is_empty());
    }

    #[test]
    fn mixed_workload_leaves_no_checkouts() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), MIXED, 0.2);
        let (generator, pool) = generator(&config);
        let mut rng = Xoshiro512PlusPlus::seed_from_u64(7);

        for _ in 0..2000 {
            generator.generate(&mut rng);
        }

        assert!(!pool.is_empty());
        assert_eq!(pool.checked_out_for_read(), 0);
        assert_eq!(pool.checked_out_for_update(), 0);
        pool.persist().unwrap();
    }

    #[test]
    fn mutations_update_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), WRITES, 0.0);
        let (generator, _pool) = generator(&config);
        let mut rng = Xoshiro512PlusPlus::seed_from_u64(3);

        let record = ObjectRecord::new(ObjectName::new(vec![1; 18]), 10, None);
        let held = generator.mutate(ObjectVerb::LegalHold, record.clone(), &mut rng);
        assert_eq!(held.legal_holds, 1);

        let retained = generator.mutate(ObjectVerb::ExtendRetention, record.clone(), &mut rng);
        let Retention::Until(first) = retained.retention else {
            panic!("retention not set");
        };
        let extended = generator.mutate(ObjectVerb::ExtendRetention, retained, &mut rng);
        assert_eq!(extended.retention, Retention::Until(first + RETENTION_EXTENSION_SECS));

        let overwritten = generator.mutate(ObjectVerb::Overwrite, record, &mut rng);
        assert_eq!(overwritten.size, 1024);
        assert_eq!(overwritten.version.map(|v| v.len()), Some(8));
    }

    #[test]
    fn launched_workers_stop_with_the_test() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), MIXED, 0.0);
        let (generator, pool) = generator(&config);
        let running = Arc::new(AtomicBool::new(true));

        let runtime = launch_workload(generator, &config, running.clone()).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        running.store(false, Ordering::Relaxed);
        runtime.shutdown_timeout(Duration::from_secs(1));

        assert!(!pool.is_empty());
    }
}
