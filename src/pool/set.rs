use crate::record::{ObjectName, ObjectRecord};
use ahash::AHashMap;
use rand::Rng;

/// A set of records keyed by name that supports uniform random selection and
/// removal in constant time.
#[derive(Default)]
pub struct RandomSet {
    records: Vec<ObjectRecord>,
    index: AHashMap<ObjectName, usize>,
}

impl RandomSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert a record, replacing any record with the same name. Returns the
    /// replaced record.
    pub fn insert(&mut self, record: ObjectRecord) -> Option<ObjectRecord> {
        if let Some(&i) = self.index.get(&record.name) {
            return Some(std::mem::replace(&mut self.records[i], record));
        }
        self.index.insert(record.name.clone(), self.records.len());
        self.records.push(record);
        None
    }

    pub fn get(&self, name: &ObjectName) -> Option<&ObjectRecord> {
        self.index.get(name).map(|&i| &self.records[i])
    }

    pub fn contains(&self, name: &ObjectName) -> bool {
        self.index.contains_key(name)
    }

    pub fn remove(&mut self, name: &ObjectName) -> Option<ObjectRecord> {
        let i = *self.index.get(name)?;
        Some(self.swap_remove_at(i))
    }

    pub fn at(&self, i: usize) -> &ObjectRecord {
        &self.records[i]
    }

    /// Pick a uniformly random position. The set must not be empty.
    pub fn random_index<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        rng.gen_range(0..self.records.len())
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&ObjectRecord> {
        if self.is_empty() {
            None
        } else {
            Some(&self.records[self.random_index(rng)])
        }
    }

    /// Remove the record at position `i`, moving the last record into its
    /// place.
    pub fn swap_remove_at(&mut self, i: usize) -> ObjectRecord {
        let record = self.records.swap_remove(i);
        self.index.remove(&record.name);
        if let Some(moved) = self.records.get(i) {
            self.index.insert(moved.name.clone(), i);
        }
        record
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectRecord> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro512PlusPlus;

    fn record(id: u8) -> ObjectRecord {
        ObjectRecord::new(ObjectName::new(vec![id; 18]), id as u64, None)
    }

    #[test]
    fn insert_replaces_by_name() {
        let mut set = RandomSet::new();
        assert!(set.insert(record(1)).is_none());
        assert!(set.insert(record(2)).is_none());

        let replaced = set.insert(record(1).with_legal_holds(3)).unwrap();
        assert_eq!(replaced.legal_holds, 0);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(&record(1).name).unwrap().legal_holds, 3);
    }

    #[test]
    fn removal_keeps_index_consistent() {
        let mut set = RandomSet::new();
        for id in 0..10 {
            set.insert(record(id));
        }

        assert_eq!(set.remove(&record(0).name), Some(record(0)));
        assert!(set.remove(&record(0).name).is_none());
        let removed = set.swap_remove_at(3);
        assert!(!set.contains(&removed.name));

        assert_eq!(set.len(), 8);
        for (i, r) in set.iter().enumerate() {
            assert_eq!(set.get(&r.name), Some(set.at(i)));
        }
    }

    #[test]
    fn sampling() {
        let mut rng = Xoshiro512PlusPlus::seed_from_u64(7);
        let mut set = RandomSet::new();
        assert!(set.sample(&mut rng).is_none());

        for id in 0..4 {
            set.insert(record(id));
        }
        let mut seen = [false; 4];
        for _ in 0..200 {
            seen[set.sample(&mut rng).unwrap().size as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}
