//! # Shard + Database
//!
//! Purpose: partitions a database's key space into `NUM_SHARDS` power-of-
//! two buckets, each independently lockable via its own hash map, plus
//! the database object that owns a fixed shard array.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::hashmap::{djb2_hash, ConcurrentHashMap};
use crate::value::Entry;

/// `shard_id = DJB2(key) & (num_shards - 1)`. `num_shards` must be a
/// power of two; callers (the `Config`) are responsible for that.
pub fn pick_shard(key: &[u8], num_shards: usize) -> usize {
    (djb2_hash(key) as usize) & (num_shards - 1)
}

pub struct Shard {
    map: ConcurrentHashMap<Arc<Entry>>,
    count: AtomicUsize,
}

impl Shard {
    fn new() -> Self {
        Shard {
            map: ConcurrentHashMap::new(),
            count: AtomicUsize::new(0),
        }
    }

    pub fn map(&self) -> &ConcurrentHashMap<Arc<Entry>> {
        &self.map
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn put(&self, key: Arc<[u8]>, entry: Arc<Entry>) {
        use crate::hashmap::PutOutcome;
        if self.map.put(key, entry) == PutOutcome::Added {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn remove(&self, key: &[u8]) -> bool {
        if self.map.remove(key) {
            self.count.fetch_sub(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<Arc<Entry>> {
        self.map.get(key)
    }

    pub fn clear(&self) {
        self.map.clear();
        self.count.store(0, Ordering::Relaxed);
    }
}

pub struct Database {
    pub id: u64,
    name: RwLock<Option<String>>,
    shards: Vec<Shard>,
    num_shards: usize,
}

impl Database {
    pub fn new(id: u64, num_shards: usize) -> Self {
        assert!(num_shards.is_power_of_two(), "num_shards must be a power of two");
        let shards = (0..num_shards).map(|_| Shard::new()).collect();
        Database {
            id,
            name: RwLock::new(None),
            shards,
            num_shards,
        }
    }

    pub fn name(&self) -> Option<String> {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: Option<String>) {
        *self.name.write() = name;
    }

    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    pub fn shard_for(&self, key: &[u8]) -> &Shard {
        &self.shards[pick_shard(key, self.num_shards)]
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn total_entries(&self) -> usize {
        self.shards.iter().map(|s| s.count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_shard_is_deterministic() {
        let a = pick_shard(b"hello", 16);
        let b = pick_shard(b"hello", 16);
        assert_eq!(a, b);
        assert!(a < 16);
    }

    #[test]
    fn database_routes_same_key_to_same_shard() {
        let db = Database::new(0, 16);
        let key: Arc<[u8]> = Arc::from(b"k".as_slice());
        let entry = Entry::new_integer(key.clone(), 1);
        db.shard_for(&key).put(key.clone(), entry);
        assert!(db.shard_for(&key).get(&key).is_some());
        assert_eq!(db.total_entries(), 1);
    }
}
