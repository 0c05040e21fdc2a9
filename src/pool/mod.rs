//! The object pool tracks which objects are believed to exist on the target
//! and hands them out to workers so that reads and deletes only touch objects
//! that are present and not in use by another operation.
//!
//! Locks are always acquired in the order persist, pool, read-tracking. The
//! persist lock is held shared by every mutating operation and exclusively by
//! the persistence pass, which lets a pass rebalance files against a stable
//! view of the pool.

use crate::config::{self, ConfigError};
use crate::metrics::*;
use crate::record::{ObjectName, ObjectRecord, RecordError};
use ahash::AHashMap;
use core::sync::atomic::{AtomicBool, Ordering};
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use rand::thread_rng;
use ringlog::*;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

mod file;
mod set;

pub use file::{ObjectFile, ObjectStore};
pub use set::RandomSet;

// random picks before falling back to a scan when choosing a record that is
// not being read
const PICK_ATTEMPTS: usize = 16;

const GET_ONCE_BACKOFF_MIN: Duration = Duration::from_micros(100);
const GET_ONCE_BACKOFF_MAX: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no eligible object in the pool")]
    Exhausted,
    #[error("object pool has been shut down")]
    Terminated,
    #[error("test has ended")]
    TestEnded,
    #[error("object {0} is not available")]
    Unavailable(ObjectName),
    #[error(transparent)]
    Format(#[from] RecordError),
    #[error("failed to persist object pool: {0}")]
    Persistence(#[from] std::io::Error),
    #[error("corrupt object file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PoolError {
    /// Errors the caller may retry after other operations make progress.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Exhausted | Self::Unavailable(_))
    }
}

#[derive(Default)]
struct Pool {
    available: RandomSet,
    updating: AHashMap<ObjectName, ObjectRecord>,
}

impl Pool {
    fn len(&self) -> usize {
        self.available.len() + self.updating.len()
    }

    // Pick random records that are not being read and remove them from the
    // available set.
    fn take_unread(&mut self, reading: &AHashMap<ObjectName, usize>, count: usize) -> Vec<ObjectRecord> {
        let mut candidates: Vec<usize> = (0..self.available.len())
            .filter(|i| !reading.contains_key(&self.available.at(*i).name))
            .collect();

        let (chosen, _) = candidates.partial_shuffle(&mut thread_rng(), count);
        let mut chosen = chosen.to_vec();
        // descending, so each swap only moves a record we have not chosen
        chosen.sort_unstable_by(|a, b| b.cmp(a));

        chosen
            .into_iter()
            .map(|i| self.available.swap_remove_at(i))
            .collect()
    }
}

struct PersistTask {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the set of live objects and their persistence. Shared between
/// workers behind an `Arc`.
pub struct ObjectManager {
    persist: RwLock<ObjectStore>,
    pool: RwLock<Pool>,
    reading: RwLock<AHashMap<ObjectName, usize>>,
    running: Arc<AtomicBool>,
    terminated: AtomicBool,
    task: Mutex<Option<PersistTask>>,
}

impl ObjectManager {
    /// Load the pool from its save file and start periodic persistence.
    /// `running` is cleared by the driver when the test ends.
    pub fn open(config: &config::Pool, running: Arc<AtomicBool>) -> Result<Arc<Self>, PoolError> {
        let manager = Arc::new(Self::new(config, running)?);
        manager.start(config.persist_interval())?;
        Ok(manager)
    }

    /// Load the pool without starting the persistence task.
    pub fn new(config: &config::Pool, running: Arc<AtomicBool>) -> Result<Self, PoolError> {
        let store = ObjectStore::open(config)?;

        let mut pool = Pool::default();
        for record in store.load()? {
            pool.available.insert(record);
        }

        info!(
            "object pool: {} objects, save file {}, {} objects per file",
            pool.len(),
            store.path(store.save_index()).display(),
            store.max_objects()
        );

        let manager = Self {
            persist: RwLock::new(store),
            pool: RwLock::new(pool),
            reading: RwLock::new(AHashMap::new()),
            running,
            terminated: AtomicBool::new(false),
            task: Mutex::new(None),
        };
        manager.record_gauges(&manager.pool.read());
        Ok(manager)
    }

    fn start(self: &Arc<Self>, interval: Duration) -> Result<(), PoolError> {
        let (stop, signal) = mpsc::channel::<()>();
        let weak = Arc::downgrade(self);

        let handle = std::thread::Builder::new()
            .name("pool-persist".to_string())
            .spawn(move || loop {
                match signal.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = manager.persist() {
                    error!("{e}");
                }
            })?;

        *self.task.lock() = Some(PersistTask { stop, handle });
        Ok(())
    }

    /// Record a successfully written object. An object with the same name is
    /// replaced.
    pub fn add(&self, mut record: ObjectRecord) -> Result<(), PoolError> {
        let store = self.persist.read();
        self.check_terminated()?;

        check_name(&store, &record)?;
        store.conform(&mut record);

        let mut pool = self.pool.write();
        if let Some(existing) = pool.updating.get_mut(&record.name) {
            *existing = record;
        } else {
            pool.available.insert(record);
        }

        POOL_ADD.increment();
        self.record_gauges(&pool);
        Ok(())
    }

    /// Check out a random object for reading. The caller must call
    /// `get_complete` when the read finishes.
    pub fn get(&self) -> Result<ObjectRecord, PoolError> {
        self.check_running()?;

        let pool = self.pool.read();
        let record = pool
            .available
            .sample(&mut thread_rng())
            .cloned()
            .ok_or_else(exhausted)?;

        let mut reading = self.reading.write();
        *reading.entry(record.name.clone()).or_insert(0) += 1;

        POOL_GET.increment();
        POOL_READING.set(reading.len() as i64);
        Ok(record)
    }

    /// Like `get`, but the object returned is not being read by anyone else.
    /// Blocks with backoff while every object is being read.
    pub fn get_once(&self) -> Result<ObjectRecord, PoolError> {
        let mut backoff = GET_ONCE_BACKOFF_MIN;

        loop {
            self.check_running()?;

            {
                let pool = self.pool.read();
                if pool.available.is_empty() {
                    return Err(exhausted());
                }

                let mut reading = self.reading.write();
                if let Some(i) = find_unread(&pool.available, &reading) {
                    let record = pool.available.at(i).clone();
                    reading.insert(record.name.clone(), 1);
                    POOL_GET.increment();
                    POOL_READING.set(reading.len() as i64);
                    return Ok(record);
                }
            }

            POOL_GET_ONCE_RETRY.increment();
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(GET_ONCE_BACKOFF_MAX);
        }
    }

    /// Release a read checkout taken with `get` or `get_once`.
    pub fn get_complete(&self, record: &ObjectRecord) {
        let mut reading = self.reading.write();
        let remaining = match reading.get_mut(&record.name) {
            Some(count) => {
                *count -= 1;
                *count
            }
            None => {
                warn!("read completed for {} which was not checked out", record.name);
                return;
            }
        };
        if remaining == 0 {
            reading.remove(&record.name);
        }
        POOL_READING.set(reading.len() as i64);
    }

    /// Remove a random object that is not being read, for an operation that
    /// destroys it.
    pub fn remove(&self) -> Result<ObjectRecord, PoolError> {
        let _store = self.persist.read();
        self.check_terminated()?;

        let mut pool = self.pool.write();
        let record = self.pick_unread(&mut pool)?;

        POOL_REMOVE.increment();
        self.record_gauges(&pool);
        Ok(record)
    }

    /// Check out a random object that is not being read for a mutating
    /// operation. It is restored or committed with `update_object`.
    pub fn remove_for_update(&self) -> Result<ObjectRecord, PoolError> {
        let _store = self.persist.read();
        self.check_terminated()?;

        let mut pool = self.pool.write();
        let record = self.pick_unread(&mut pool)?;
        pool.updating.insert(record.name.clone(), record.clone());

        POOL_REMOVE.increment();
        self.record_gauges(&pool);
        Ok(record)
    }

    /// Check out a specific object for a mutating operation.
    pub fn remove_object(&self, name: &ObjectName) -> Result<ObjectRecord, PoolError> {
        let _store = self.persist.read();
        self.check_terminated()?;

        let mut pool = self.pool.write();
        if self.reading.read().contains_key(name) {
            return Err(PoolError::Unavailable(name.clone()));
        }
        let record = pool
            .available
            .remove(name)
            .ok_or_else(|| PoolError::Unavailable(name.clone()))?;
        pool.updating.insert(name.clone(), record.clone());

        POOL_REMOVE.increment();
        self.record_gauges(&pool);
        Ok(record)
    }

    /// Return an object to the available set, ending any update checkout.
    /// Used both to restore the original after a failed mutation and to
    /// commit new metadata after a successful one.
    pub fn update_object(&self, mut record: ObjectRecord) -> Result<(), PoolError> {
        let store = self.persist.read();
        self.check_terminated()?;
        check_name(&store, &record)?;
        store.conform(&mut record);

        let mut pool = self.pool.write();
        pool.updating.remove(&record.name);
        pool.available.insert(record);

        POOL_UPDATE.increment();
        self.record_gauges(&pool);
        Ok(())
    }

    /// Drop an update checkout without returning the object to the pool.
    pub fn remove_updated_object(&self, record: &ObjectRecord) -> Result<Option<ObjectRecord>, PoolError> {
        self.remove_updated_object_by_name(&record.name)
    }

    pub fn remove_updated_object_by_name(&self, name: &ObjectName) -> Result<Option<ObjectRecord>, PoolError> {
        let _store = self.persist.read();
        self.check_terminated()?;

        let mut pool = self.pool.write();
        let record = pool.updating.remove(name);
        self.record_gauges(&pool);
        Ok(record)
    }

    pub fn get_object_from_updating_cache(&self, name: &ObjectName) -> Result<Option<ObjectRecord>, PoolError> {
        self.check_terminated()?;
        Ok(self.pool.read().updating.get(name).cloned())
    }

    /// Objects in the pool, including those checked out for update.
    pub fn len(&self) -> usize {
        self.pool.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn checked_out_for_read(&self) -> usize {
        self.reading.read().len()
    }

    pub fn checked_out_for_update(&self) -> usize {
        self.pool.read().updating.len()
    }

    /// Run one persistence pass: move surplus objects out to other files or
    /// borrow objects back from them, then rewrite the save file.
    pub fn persist(&self) -> Result<(), PoolError> {
        let store = self.persist.write();
        self.check_terminated()?;
        self.persist_pass(&store)
    }

    /// Stop periodic persistence, flush the pool one last time and reject
    /// every further operation.
    pub fn shutdown(&self) -> Result<(), PoolError> {
        let task = self.task.lock().take();
        if let Some(task) = task {
            drop(task.stop);
            if task.handle.join().is_err() {
                warn!("object pool persistence thread panicked");
            }
        }

        let store = self.persist.write();
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Err(PoolError::Terminated);
        }

        let result = self.persist_pass(&store);
        match &result {
            Ok(()) => info!("object pool saved with {} objects", self.len()),
            Err(e) => error!("final object pool flush failed: {e}"),
        }
        result
    }

    fn persist_pass(&self, store: &ObjectStore) -> Result<(), PoolError> {
        let start = Instant::now();
        PERSIST.increment();

        let result = self.rebalance(store).and_then(|()| {
            let snapshot: Vec<ObjectRecord> = {
                let pool = self.pool.read();
                pool.available
                    .iter()
                    .chain(pool.updating.values())
                    .cloned()
                    .collect()
            };
            store.save(&snapshot)
        });

        let _ = PERSIST_LATENCY.increment(start.elapsed().as_nanos() as u64);
        if result.is_err() {
            PERSIST_EX.increment();
        }
        result
    }

    fn rebalance(&self, store: &ObjectStore) -> Result<(), PoolError> {
        let max = store.max_objects();

        let mut surplus = {
            let mut pool = self.pool.write();
            let count = pool.len();
            if count > max {
                let reading = self.reading.read();
                pool.take_unread(&reading, count - max)
            } else {
                Vec::new()
            }
        };

        if !surplus.is_empty() {
            let total = surplus.len();
            let result = store.write_surplus(&mut surplus);
            PERSIST_SURPLUS.add((total - surplus.len()) as u64);

            if !surplus.is_empty() {
                let mut pool = self.pool.write();
                for record in surplus {
                    pool.available.insert(record);
                }
                self.record_gauges(&pool);
            }
            return result;
        }

        let count = self.len();
        if count < max {
            let mut borrowed = Vec::new();
            let result = store.borrow(max - count, &mut borrowed);

            if !borrowed.is_empty() {
                PERSIST_BORROWED.add(borrowed.len() as u64);
                let mut pool = self.pool.write();
                for record in borrowed {
                    if pool.updating.contains_key(&record.name) {
                        warn!("borrowed object {} is already checked out", record.name);
                        continue;
                    }
                    pool.available.insert(record);
                }
                self.record_gauges(&pool);
            }
            result?;
        }

        Ok(())
    }

    // Choose a random available record that is not being read and remove it
    // from the available set.
    fn pick_unread(&self, pool: &mut Pool) -> Result<ObjectRecord, PoolError> {
        let reading = self.reading.read();
        let available = &mut pool.available;
        if available.is_empty() {
            return Err(exhausted());
        }

        match find_unread(available, &reading) {
            Some(i) => Ok(available.swap_remove_at(i)),
            None => Err(exhausted()),
        }
    }

    fn check_terminated(&self) -> Result<(), PoolError> {
        if self.terminated.load(Ordering::Acquire) {
            Err(PoolError::Terminated)
        } else {
            Ok(())
        }
    }

    fn check_running(&self) -> Result<(), PoolError> {
        self.check_terminated()?;
        if self.running.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(PoolError::TestEnded)
        }
    }

    fn record_gauges(&self, pool: &Pool) {
        POOL_AVAILABLE.set(pool.available.len() as i64);
        POOL_UPDATING.set(pool.updating.len() as i64);
    }
}

impl Drop for ObjectManager {
    fn drop(&mut self) {
        // closing the channel ends the persistence thread at its next wakeup
        if let Some(task) = self.task.get_mut().take() {
            drop(task.stop);
        }
    }
}

// Records must fit the name field of the pool's file format.
fn check_name(store: &ObjectStore, record: &ObjectRecord) -> Result<(), PoolError> {
    let name_len = store.format().fields().name as usize;
    if record.name.len() != name_len {
        return Err(RecordError::NameLength {
            expected: name_len,
            actual: record.name.len(),
        }
        .into());
    }
    Ok(())
}

// Index of a random available record that is not being read. A few random
// picks are tried before scanning from a random offset.
fn find_unread(available: &RandomSet, reading: &AHashMap<ObjectName, usize>) -> Option<usize> {
    if available.is_empty() {
        return None;
    }

    let mut rng = thread_rng();
    for _ in 0..PICK_ATTEMPTS {
        let i = available.random_index(&mut rng);
        if !reading.contains_key(&available.at(i).name) {
            return Some(i);
        }
    }

    let len = available.len();
    let offset = available.random_index(&mut rng);
    (0..len)
        .map(|k| (offset + k) % len)
        .find(|i| !reading.contains_key(&available.at(*i).name))
}

fn exhausted() -> PoolError {
    POOL_EXHAUSTED.increment();
    PoolError::Exhausted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FileFormat, Retention};
    use std::collections::HashSet;
    use std::path::Path;

    fn pool_config(dir: &Path, max_objects: usize, version_len: u8, file_index: i64) -> config::Pool {
        let record_len = FileFormat::current(18, version_len).unwrap().record_len();
        toml::from_str(&format!(
            "directory = {:?}\nmax_bytes = {}\nversion_len = {}\nfile_index = {}\npersist_interval = \"50ms\"",
            dir.to_str().unwrap(),
            max_objects * record_len,
            version_len,
            file_index
        ))
        .unwrap()
    }

    fn running() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(true))
    }

    fn record(id: u16) -> ObjectRecord {
        let mut name = vec![0; 18];
        name[..2].copy_from_slice(&id.to_be_bytes());
        ObjectRecord::new(ObjectName::new(name), id as u64, None)
    }

    fn file_len(path: &Path) -> usize {
        ObjectFile::new(path).read().unwrap().1.len()
    }

    #[test]
    fn surplus_then_borrow() {
        let dir = tempfile::tempdir().unwrap();
        let config = pool_config(dir.path(), 8, 0, 0);
        let store = ObjectStore::open(&config).unwrap();

        // an existing surplus file with two records
        ObjectFile::new(store.path(1))
            .write(store.format(), &[record(100), record(101)])
            .unwrap();

        let manager = ObjectManager::new(&config, running()).unwrap();
        for id in 0..10 {
            manager.add(record(id)).unwrap();
        }
        manager.persist().unwrap();

        assert_eq!(manager.len(), 8);
        assert_eq!(file_len(&store.path(0)), 8);
        assert_eq!(file_len(&store.path(1)), 4);

        // drop below the bound and borrow everything back
        for _ in 0..5 {
            manager.remove().unwrap();
        }
        manager.persist().unwrap();

        assert_eq!(manager.len(), 7);
        assert_eq!(file_len(&store.path(0)), 7);
        assert!(!store.path(1).exists());
    }

    #[test]
    fn surplus_respects_file_bound() {
        let dir = tempfile::tempdir().unwrap();
        let config = pool_config(dir.path(), 8, 0, 0);
        let manager = ObjectManager::new(&config, running()).unwrap();
        for id in 0..30 {
            manager.add(record(id)).unwrap();
        }
        manager.persist().unwrap();

        let store = ObjectStore::open(&config).unwrap();
        let indices = store.indices().unwrap();
        assert_eq!(indices, vec![0, 1, 2, 3]);

        let mut names = HashSet::new();
        for index in indices {
            let (_, records) = ObjectFile::new(store.path(index)).read().unwrap();
            assert!(records.len() <= 8);
            for r in records {
                assert!(names.insert(r.name));
            }
        }
        assert_eq!(names.len(), 30);
    }

    #[test]
    fn surplus_skips_records_being_read() {
        let dir = tempfile::tempdir().unwrap();
        let config = pool_config(dir.path(), 1, 0, 0);
        let manager = ObjectManager::new(&config, running()).unwrap();
        manager.add(record(1)).unwrap();
        manager.add(record(2)).unwrap();

        let held = manager.get().unwrap();
        manager.persist().unwrap();

        // the record being read stays in memory
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.remove_object(&held.name).err().map(|e| e.is_retryable()), Some(true));
        manager.get_complete(&held);
        assert_eq!(manager.remove_object(&held.name).unwrap(), held);
    }

    #[test]
    fn v1_records_are_up_converted() {
        let dir = tempfile::tempdir().unwrap();
        let config = pool_config(dir.path(), 8, 8, 0);

        let mut raw = Vec::new();
        FileFormat::v1()
            .encode(&ObjectRecord::new(ObjectName::new(vec![7; 18]), 512, Some(2)), &mut raw)
            .unwrap();
        std::fs::write(dir.path().join("id_0.object"), raw).unwrap();

        let manager = ObjectManager::new(&config, running()).unwrap();
        let record = manager.get().unwrap();
        assert_eq!(record.size, 512);
        assert_eq!(record.container_suffix, Some(2));
        assert_eq!(record.version.as_deref(), Some(""));
        assert_eq!(record.legal_holds, 0);
        assert_eq!(record.retention, Retention::Unset);
        manager.get_complete(&record);

        manager.persist().unwrap();
        let (format, records) = ObjectFile::new(dir.path().join("id_0.object")).read().unwrap();
        assert_eq!(format, FileFormat::current(18, 8).unwrap());
        assert_eq!(records, vec![record]);
    }

    #[test]
    fn highest_file_is_loaded_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = pool_config(dir.path(), 8, 0, 3);
        let store = ObjectStore::open(&config).unwrap();
        store.save(&[record(1), record(2)]).unwrap();

        let config = pool_config(dir.path(), 8, 0, -1);
        let manager = ObjectManager::new(&config, running()).unwrap();
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ObjectManager::new(&pool_config(dir.path(), 8, 0, 0), running()).unwrap();

        assert!(matches!(manager.get(), Err(PoolError::Exhausted)));
        assert!(matches!(manager.get_once(), Err(PoolError::Exhausted)));
        assert!(matches!(manager.remove(), Err(PoolError::Exhausted)));

        manager.add(record(1)).unwrap();
        let read = manager.get().unwrap();
        assert!(matches!(manager.remove(), Err(PoolError::Exhausted)));
        assert!(matches!(manager.remove_for_update(), Err(PoolError::Exhausted)));
        assert!(matches!(
            manager.remove_object(&read.name),
            Err(PoolError::Unavailable(_))
        ));

        manager.get_complete(&read);
        assert_eq!(manager.remove().unwrap(), read);
        assert!(manager.is_empty());
    }

    #[test]
    fn read_refcount() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ObjectManager::new(&pool_config(dir.path(), 8, 0, 0), running()).unwrap();
        manager.add(record(1)).unwrap();

        let a = manager.get().unwrap();
        let b = manager.get().unwrap();
        assert_eq!(a, b);
        assert_eq!(manager.checked_out_for_read(), 1);

        manager.get_complete(&a);
        assert!(matches!(manager.remove(), Err(PoolError::Exhausted)));

        manager.get_complete(&b);
        assert_eq!(manager.checked_out_for_read(), 0);

        // extra completions are clamped
        manager.get_complete(&b);
        assert_eq!(manager.checked_out_for_read(), 0);
        assert!(manager.remove().is_ok());
    }

    #[test]
    fn get_once_waits_for_reader() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ObjectManager::new(&pool_config(dir.path(), 8, 0, 0), running()).unwrap());
        manager.add(record(1)).unwrap();

        let held = manager.get_once().unwrap();
        let releaser = {
            let manager = manager.clone();
            let held = held.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                manager.get_complete(&held);
            })
        };

        let again = manager.get_once().unwrap();
        assert_eq!(again, held);
        releaser.join().unwrap();
        assert_eq!(manager.checked_out_for_read(), 1);
    }

    #[test]
    fn test_end_stops_reads() {
        let dir = tempfile::tempdir().unwrap();
        let running = running();
        let manager = ObjectManager::new(&pool_config(dir.path(), 8, 0, 0), running.clone()).unwrap();
        manager.add(record(1)).unwrap();
        let held = manager.get_once().unwrap();

        running.store(false, Ordering::Relaxed);
        assert!(matches!(manager.get_once(), Err(PoolError::TestEnded)));
        assert!(matches!(manager.get(), Err(PoolError::TestEnded)));

        // in-flight operations may still complete
        manager.get_complete(&held);
        manager.add(record(2)).unwrap();
    }

    #[test]
    fn update_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ObjectManager::new(&pool_config(dir.path(), 8, 0, 0), running()).unwrap();
        manager.add(record(1)).unwrap();
        manager.add(record(2)).unwrap();

        let original = manager.remove_for_update().unwrap();
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.checked_out_for_update(), 1);
        assert_eq!(
            manager.get_object_from_updating_cache(&original.name).unwrap(),
            Some(original.clone())
        );

        // commit new metadata
        manager
            .update_object(original.clone().with_legal_holds(1))
            .unwrap();
        assert_eq!(manager.checked_out_for_update(), 0);
        assert!(manager
            .get_object_from_updating_cache(&original.name)
            .unwrap()
            .is_none());
        let updated = manager.remove_object(&original.name).unwrap();
        assert_eq!(updated.legal_holds, 1);

        // a successful delete discards the checkout
        assert_eq!(
            manager.remove_updated_object(&updated).unwrap(),
            Some(updated.clone())
        );
        assert_eq!(manager.len(), 1);
        assert!(manager.remove_updated_object_by_name(&updated.name).unwrap().is_none());
    }

    #[test]
    fn add_replaces_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ObjectManager::new(&pool_config(dir.path(), 8, 0, 0), running()).unwrap();
        manager.add(record(1)).unwrap();
        manager.add(record(1).with_retention(Retention::Inherit)).unwrap();
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.remove().unwrap().retention, Retention::Inherit);

        let short = ObjectRecord::new(ObjectName::new(vec![1; 4]), 1, None);
        assert!(matches!(
            manager.add(short),
            Err(PoolError::Format(RecordError::NameLength { .. }))
        ));
    }

    #[test]
    fn exclusive_checkouts_under_contention() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ObjectManager::new(&pool_config(dir.path(), 1000, 0, 0), running()).unwrap());
        for id in 0..16 {
            manager.add(record(id)).unwrap();
        }

        let held: Arc<Mutex<HashSet<ObjectName>>> = Arc::new(Mutex::new(HashSet::new()));
        let readers: Arc<Mutex<AHashMap<ObjectName, usize>>> = Arc::new(Mutex::new(AHashMap::new()));

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let manager = manager.clone();
                let held = held.clone();
                let readers = readers.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        if (i + t) % 2 == 0 {
                            let Ok(record) = manager.get() else { continue };
                            *readers.lock().entry(record.name.clone()).or_insert(0) += 1;
                            assert!(!held.lock().contains(&record.name));
                            *readers.lock().get_mut(&record.name).unwrap() -= 1;
                            manager.get_complete(&record);
                        } else {
                            let Ok(record) = manager.remove_for_update() else { continue };
                            assert!(held.lock().insert(record.name.clone()));
                            assert_eq!(readers.lock().get(&record.name).copied().unwrap_or(0), 0);
                            held.lock().remove(&record.name);
                            manager.update_object(record).unwrap();
                        }
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(manager.len(), 16);
        assert_eq!(manager.checked_out_for_read(), 0);
        assert_eq!(manager.checked_out_for_update(), 0);
    }

    #[test]
    fn periodic_persistence_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let config = pool_config(dir.path(), 8, 0, 0);
        let manager = ObjectManager::open(&config, running()).unwrap();
        manager.add(record(1)).unwrap();
        manager.add(record(2)).unwrap();

        let path = dir.path().join("id_0.object");
        let deadline = Instant::now() + Duration::from_secs(5);
        while !path.exists() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(path.exists());

        manager.add(record(3)).unwrap();
        manager.shutdown().unwrap();
        assert_eq!(file_len(&path), 3);

        assert!(matches!(manager.add(record(4)), Err(PoolError::Terminated)));
        assert!(matches!(manager.get(), Err(PoolError::Terminated)));
        assert!(matches!(manager.persist(), Err(PoolError::Terminated)));
        assert!(matches!(manager.shutdown(), Err(PoolError::Terminated)));

        let reopened = ObjectManager::new(&config, running()).unwrap();
        assert_eq!(reopened.len(), 3);
    }

    #[test]
    fn get_once_finds_the_last_unread_object() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ObjectManager::new(&pool_config(dir.path(), 4096, 0, 0), running()).unwrap();
        for id in 0..2000 {
            manager.add(record(id)).unwrap();
        }
        for _ in 0..1999 {
            manager.get_once().unwrap();
        }

        let start = Instant::now();
        let last = manager.get_once().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(manager.checked_out_for_read(), 2000);
        assert!(matches!(manager.remove(), Err(PoolError::Exhausted)));

        manager.get_complete(&last);
        assert_eq!(manager.remove().unwrap(), last);
    }

    #[test]
    fn failed_surplus_write_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let config = pool_config(dir.path(), 8, 0, 0);
        let store = ObjectStore::open(&config).unwrap();

        // a directory where the surplus file would go
        std::fs::create_dir(store.path(1)).unwrap();

        let manager = ObjectManager::new(&config, running()).unwrap();
        for id in 0..10 {
            manager.add(record(id)).unwrap();
        }
        assert!(matches!(manager.persist(), Err(PoolError::Persistence(_))));
        assert_eq!(manager.len(), 10);

        std::fs::remove_dir(store.path(1)).unwrap();
        manager.persist().unwrap();
        assert_eq!(manager.len(), 8);
        assert_eq!(file_len(&store.path(0)), 8);
        assert_eq!(file_len(&store.path(1)), 2);
    }

    #[test]
    fn update_rejects_wrong_name_width() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ObjectManager::new(&pool_config(dir.path(), 8, 0, 0), running()).unwrap();
        manager.add(record(1)).unwrap();

        let original = manager.remove_for_update().unwrap();
        let short = ObjectRecord::new(ObjectName::new(vec![1; 10]), 5, None);
        assert!(matches!(
            manager.update_object(short),
            Err(PoolError::Format(RecordError::NameLength { expected: 18, actual: 10 }))
        ));
        let long = ObjectRecord::new(ObjectName::new(vec![2; 20]), 5, None);
        assert!(matches!(manager.add(long), Err(PoolError::Format(_))));

        manager.update_object(original).unwrap();
        manager.persist().unwrap();
        assert_eq!(file_len(&dir.path().join("id_0.object")), 1);
    }
}
