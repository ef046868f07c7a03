//! # Concurrent Hash Map
//!
//! Purpose: an open-addressed hash table with per-bucket locks and
//! incremental resize, so a single shard's readers and writers only ever
//! contend on the buckets they actually touch.
//!
//! ## Design Principles
//!
//! 1. **Quadratic probing over a power-of-two table**: `(index + i*i) &
//!    (capacity - 1)` keeps probe sequences branch-free and guarantees
//!    every slot is visited before repeating, as long as capacity stays a
//!    power of two.
//! 2. **DJB2-family hash, not a random-seeded hasher**: shard and bucket
//!    placement must be a pure function of the key bytes (spec invariant:
//!    `shard_of(K) = DJB2(K) mod NUM_SHARDS`), so this map does not use
//!    `ahash`/`RandomState` the way the sibling in-memory engine would.
//! 3. **Incremental migration**: a resize swaps in a doubled table
//!    immediately but migrates old buckets in small batches on the
//!    following `put`/`get`/`remove` calls, so no single caller pays for
//!    the whole rehash. Until migration finishes, `old_table` is still
//!    consulted by every operation for keys the migrator hasn't reached
//!    yet — see `old_table_get`/`old_table_remove`/`old_table_try_update`.
//! 4. **Tombstones, not holes**: a removed bucket becomes a tombstone
//!    (reclaimable by a later `put`) rather than clearing occupancy,
//!    which would otherwise break the probe chain for keys inserted
//!    after it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

pub const INITIAL_CAPACITY: usize = 16;
const LOAD_FACTOR_THRESHOLD: f64 = 0.75;
const RESIZE_WORK_INCREMENT: usize = 64;

/// Result of a `put`, mirroring the source's `HM_ACTION_*` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Added,
    Modified,
    Failed,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Occupancy {
    Empty,
    Occupied,
    Tombstone,
}

struct Bucket<V> {
    state: Occupancy,
    key: Option<Arc<[u8]>>,
    value: Option<V>,
}

impl<V> Bucket<V> {
    fn empty() -> Self {
        Bucket {
            state: Occupancy::Empty,
            key: None,
            value: None,
        }
    }
}

struct Table<V> {
    buckets: Vec<RwLock<Bucket<V>>>,
    migrating: Vec<AtomicBool>,
    capacity: usize,
}

impl<V> Table<V> {
    fn new(capacity: usize) -> Self {
        let mut buckets = Vec::with_capacity(capacity);
        let mut migrating = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            buckets.push(RwLock::new(Bucket::empty()));
            migrating.push(AtomicBool::new(false));
        }
        Table {
            buckets,
            migrating,
            capacity,
        }
    }
}

/// DJB2-family multiplicative hash: `31*h + byte`, masked to the table's
/// capacity. Exposed so callers that need the same placement function
/// (shard selection) can reuse it.
pub fn djb2_hash(key: &[u8]) -> u64 {
    let mut hash: u64 = 0;
    for &b in key {
        hash = hash.wrapping_mul(31).wrapping_add(b as u64);
    }
    hash
}

fn quad_probe(index: usize, i: usize, capacity: usize) -> usize {
    (index.wrapping_add(i.wrapping_mul(i))) & (capacity - 1)
}

pub struct ConcurrentHashMap<V> {
    table: RwLock<Arc<Table<V>>>,
    old_table: RwLock<Option<Arc<Table<V>>>>,
    size: AtomicUsize,
    resize_mutex: Mutex<()>,
    is_resizing: AtomicBool,
    resize_progress: AtomicUsize,
}

impl<V: Clone> ConcurrentHashMap<V> {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        ConcurrentHashMap {
            table: RwLock::new(Arc::new(Table::new(capacity))),
            old_table: RwLock::new(None),
            size: AtomicUsize::new(0),
            resize_mutex: Mutex::new(()),
            is_resizing: AtomicBool::new(false),
            resize_progress: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self) -> Arc<Table<V>> {
        self.table.read().clone()
    }

    /// Migrates up to `RESIZE_WORK_INCREMENT` buckets from the old table
    /// into the current one. A no-op when no resize is in flight.
    fn resize_increment(&self) {
        if !self.is_resizing.load(Ordering::Acquire) {
            return;
        }

        let _guard = self.resize_mutex.lock();
        let old = {
            let old_table = self.old_table.read();
            match old_table.clone() {
                Some(t) => t,
                None => return,
            }
        };
        let new = self.current();

        let start = self.resize_progress.load(Ordering::Acquire);
        let end = (start + RESIZE_WORK_INCREMENT).min(old.capacity);

        for i in start..end {
            while old.migrating[i].swap(true, Ordering::AcqRel) {
                std::hint::spin_loop();
            }

            let mut slot = old.buckets[i].write();
            if slot.state == Occupancy::Occupied {
                let key = slot.key.clone().unwrap();
                let value = slot.value.clone().unwrap();
                insert_into(&new, key, value);
            }
            // A migrated-out slot becomes a tombstone, not a hole: a
            // direct old-table probe racing this migration (see
            // `old_table_get`/`old_table_remove`/`old_table_try_update`)
            // must keep scanning past it exactly as it would past a
            // removed key, or it could wrongly stop short of a
            // not-yet-migrated key that originally collided and probed
            // past this one.
            slot.state = Occupancy::Tombstone;
            slot.key = None;
            slot.value = None;

            old.migrating[i].store(false, Ordering::Release);
        }

        self.resize_progress.store(end, Ordering::Release);

        if end == old.capacity {
            *self.old_table.write() = None;
            self.is_resizing.store(false, Ordering::Release);
        }
    }

    fn resize_if_needed(&self) {
        let current = self.current();
        let load_factor = self.size.load(Ordering::Relaxed) as f64 / current.capacity as f64;
        if load_factor < LOAD_FACTOR_THRESHOLD {
            return;
        }

        if self.is_resizing.swap(true, Ordering::AcqRel) {
            return;
        }

        let _guard = self.resize_mutex.lock();
        let new_capacity = current.capacity << 1;
        let new_table = Arc::new(Table::new(new_capacity));

        *self.old_table.write() = Some(current);
        *self.table.write() = new_table;
        self.resize_progress.store(0, Ordering::Release);
        drop(_guard);

        self.resize_increment();
    }

    /// While a resize is in flight, `old` still holds the authoritative
    /// copy of any key `resize_increment` hasn't migrated out yet. A
    /// lookup, removal or write that only ever consulted the new table
    /// would wrongly treat such a key as absent, or worse — a `put`
    /// would plant a fresh duplicate in the new table that a later
    /// migration of the stale old entry would silently clobber, losing
    /// the update and leaving `size` double-counted. So every public
    /// operation falls back to `old_table` (see `old_table_get` et al.)
    /// whenever the new table doesn't have the key and a resize is
    /// still draining.
    fn old_table(&self) -> Option<Arc<Table<V>>> {
        if !self.is_resizing.load(Ordering::Acquire) {
            return None;
        }
        self.old_table.read().clone()
    }

    pub fn put(&self, key: Arc<[u8]>, value: V) -> PutOutcome {
        if key.is_empty() {
            return PutOutcome::Failed;
        }

        self.resize_if_needed();
        self.resize_increment();

        if let Some(old) = self.old_table() {
            if old_table_try_update(&old, &key, &value) {
                return PutOutcome::Modified;
            }
        }

        let table = self.current();
        match insert_into(&table, key, value) {
            PutOutcome::Added => {
                self.size.fetch_add(1, Ordering::Relaxed);
                PutOutcome::Added
            }
            other => other,
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<V> {
        self.resize_increment();

        let table = self.current();
        if let Some(value) = get_from(&table, key) {
            return Some(value);
        }

        match self.old_table() {
            Some(old) => old_table_get(&old, key),
            None => None,
        }
    }

    pub fn remove(&self, key: &[u8]) -> bool {
        self.resize_increment();

        let table = self.current();
        if remove_from(&table, key) {
            self.size.fetch_sub(1, Ordering::Relaxed);
            return true;
        }

        if let Some(old) = self.old_table() {
            if old_table_remove(&old, key) {
                self.size.fetch_sub(1, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    /// Empties every bucket in the current table and resets `size` to
    /// zero. Used by snapshot import to wipe a shard before repopulating
    /// it. Does not touch an in-flight resize's old table; callers only
    /// use this on shards they are about to fully repopulate anyway.
    pub fn clear(&self) {
        let table = self.current();
        for bucket in &table.buckets {
            *bucket.write() = Bucket::empty();
        }
        self.size.store(0, Ordering::Relaxed);
    }

    /// Snapshots every live `(key, value)` pair. Used by the snapshot
    /// codec and the TTL sweeper, both of which need to enumerate a
    /// shard's contents under its own lock rather than this map's.
    pub fn iter_snapshot(&self) -> Vec<(Arc<[u8]>, V)> {
        let table = self.current();
        let mut out = Vec::new();
        for bucket in &table.buckets {
            let slot = bucket.read();
            if slot.state == Occupancy::Occupied {
                if let (Some(k), Some(v)) = (slot.key.clone(), slot.value.clone()) {
                    out.push((k, v));
                }
            }
        }
        out
    }
}

fn insert_into<V: Clone>(table: &Table<V>, key: Arc<[u8]>, value: V) -> PutOutcome {
    let capacity = table.capacity;
    let start_index = (djb2_hash(&key) as usize) & (capacity - 1);
    let mut index = start_index;
    let mut first_tombstone: Option<usize> = None;

    for i in 0..capacity {
        if i > 0 {
            index = quad_probe(start_index, i, capacity);
        }
        let mut bucket = table.buckets[index].write();
        match bucket.state {
            Occupancy::Occupied if bucket.key.as_deref() == Some(&key[..]) => {
                bucket.value = Some(value);
                return PutOutcome::Modified;
            }
            Occupancy::Tombstone => {
                if first_tombstone.is_none() {
                    first_tombstone = Some(index);
                }
            }
            Occupancy::Empty => {
                let target = first_tombstone.unwrap_or(index);
                drop(bucket);
                let mut slot = table.buckets[target].write();
                slot.state = Occupancy::Occupied;
                slot.key = Some(key);
                slot.value = Some(value);
                return PutOutcome::Added;
            }
            Occupancy::Occupied => {}
        }
    }

    PutOutcome::Failed
}

/// Plain probe-and-read over any table. Used for the new/current table,
/// which is never touched by a background migrator, so a bare `RwLock`
/// read is enough — no need to coordinate with `migrating`.
fn get_from<V: Clone>(table: &Table<V>, key: &[u8]) -> Option<V> {
    let capacity = table.capacity;
    let start_index = (djb2_hash(key) as usize) & (capacity - 1);
    let mut index = start_index;

    for i in 0..capacity {
        if i > 0 {
            index = quad_probe(start_index, i, capacity);
        }
        let bucket = table.buckets[index].read();
        match bucket.state {
            Occupancy::Empty => return None,
            Occupancy::Occupied if bucket.key.as_deref() == Some(key) => {
                return bucket.value.clone();
            }
            _ => {}
        }
    }
    None
}

fn remove_from<V>(table: &Table<V>, key: &[u8]) -> bool {
    let capacity = table.capacity;
    let start_index = (djb2_hash(key) as usize) & (capacity - 1);
    let mut index = start_index;

    for i in 0..capacity {
        if i > 0 {
            index = quad_probe(start_index, i, capacity);
        }
        let mut bucket = table.buckets[index].write();
        match bucket.state {
            Occupancy::Empty => return false,
            Occupancy::Occupied if bucket.key.as_deref() == Some(key) => {
                bucket.state = Occupancy::Tombstone;
                bucket.key = None;
                bucket.value = None;
                return true;
            }
            _ => {}
        }
    }
    false
}

/// Old-table probes guard each visited bucket with its own `migrating`
/// flag, the same one `resize_increment` holds while moving that bucket,
/// so a direct access here and the background migrator never observe
/// each other's half-moved state.
fn old_table_get<V: Clone>(old: &Table<V>, key: &[u8]) -> Option<V> {
    let capacity = old.capacity;
    let start_index = (djb2_hash(key) as usize) & (capacity - 1);
    let mut index = start_index;

    for i in 0..capacity {
        if i > 0 {
            index = quad_probe(start_index, i, capacity);
        }
        while old.migrating[index].swap(true, Ordering::AcqRel) {
            std::hint::spin_loop();
        }
        let bucket = old.buckets[index].read();
        let state = bucket.state;
        let hit = state == Occupancy::Occupied && bucket.key.as_deref() == Some(key);
        let value = if hit { bucket.value.clone() } else { None };
        drop(bucket);
        old.migrating[index].store(false, Ordering::Release);

        if hit {
            return value;
        }
        if state == Occupancy::Empty {
            return None;
        }
    }
    None
}

fn old_table_remove<V>(old: &Table<V>, key: &[u8]) -> bool {
    let capacity = old.capacity;
    let start_index = (djb2_hash(key) as usize) & (capacity - 1);
    let mut index = start_index;

    for i in 0..capacity {
        if i > 0 {
            index = quad_probe(start_index, i, capacity);
        }
        while old.migrating[index].swap(true, Ordering::AcqRel) {
            std::hint::spin_loop();
        }
        let mut bucket = old.buckets[index].write();
        let state = bucket.state;
        let hit = state == Occupancy::Occupied && bucket.key.as_deref() == Some(key);
        if hit {
            bucket.state = Occupancy::Tombstone;
            bucket.key = None;
            bucket.value = None;
        }
        drop(bucket);
        old.migrating[index].store(false, Ordering::Release);

        if hit {
            return true;
        }
        if state == Occupancy::Empty {
            return false;
        }
    }
    false
}

/// Updates the value in place if `key` is still sitting unmigrated in
/// the old table. Returns `false` if it isn't there, meaning the caller
/// should fall through to inserting into the current table instead.
fn old_table_try_update<V: Clone>(old: &Table<V>, key: &[u8], value: &V) -> bool {
    let capacity = old.capacity;
    let start_index = (djb2_hash(key) as usize) & (capacity - 1);
    let mut index = start_index;

    for i in 0..capacity {
        if i > 0 {
            index = quad_probe(start_index, i, capacity);
        }
        while old.migrating[index].swap(true, Ordering::AcqRel) {
            std::hint::spin_loop();
        }
        let mut bucket = old.buckets[index].write();
        let state = bucket.state;
        let hit = state == Occupancy::Occupied && bucket.key.as_deref() == Some(key);
        if hit {
            bucket.value = Some(value.clone());
        }
        drop(bucket);
        old.migrating[index].store(false, Ordering::Release);

        if hit {
            return true;
        }
        if state == Occupancy::Empty {
            return false;
        }
    }
    false
}

impl<V: Clone> Default for ConcurrentHashMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Arc<[u8]> {
        Arc::from(s.as_bytes())
    }

    #[test]
    fn put_get_roundtrip() {
        let map: ConcurrentHashMap<i64> = ConcurrentHashMap::new();
        assert_eq!(map.put(key("a"), 1), PutOutcome::Added);
        assert_eq!(map.get(b"a"), Some(1));
    }

    #[test]
    fn put_modifies_existing_key() {
        let map: ConcurrentHashMap<i64> = ConcurrentHashMap::new();
        map.put(key("a"), 1);
        assert_eq!(map.put(key("a"), 2), PutOutcome::Modified);
        assert_eq!(map.get(b"a"), Some(2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn remove_then_reinsert_roundtrips() {
        let map: ConcurrentHashMap<i64> = ConcurrentHashMap::new();
        map.put(key("a"), 1);
        assert!(map.remove(b"a"));
        map.put(key("a"), 2);
        assert_eq!(map.get(b"a"), Some(2));
    }

    #[test]
    fn size_tracks_distinct_inserts() {
        let map: ConcurrentHashMap<i64> = ConcurrentHashMap::new();
        for i in 0..64 {
            map.put(Arc::from(format!("key-{i}").into_bytes()), i);
        }
        assert_eq!(map.len(), 64);
        for i in 0..64 {
            assert_eq!(map.get(format!("key-{i}").as_bytes()), Some(i));
        }
    }

    #[test]
    fn triggers_resize_past_load_factor() {
        let map: ConcurrentHashMap<i64> = ConcurrentHashMap::with_capacity(16);
        for i in 0..32 {
            map.put(Arc::from(format!("k{i}").into_bytes()), i);
        }
        assert_eq!(map.len(), 32);
        for i in 0..32 {
            assert_eq!(map.get(format!("k{i}").as_bytes()), Some(i));
        }
    }

    #[test]
    fn get_on_missing_key_scans_past_tombstones() {
        let map: ConcurrentHashMap<i64> = ConcurrentHashMap::with_capacity(4);
        map.put(key("a"), 1);
        map.put(key("b"), 2);
        map.remove(b"a");
        assert_eq!(map.get(b"b"), Some(2));
        assert_eq!(map.get(b"missing"), None);
    }

    #[test]
    fn mid_resize_access_finds_not_yet_migrated_keys() {
        // With a 256-bucket old table and a 64-bucket work increment, the
        // put that trips the resize only migrates a quarter of it before
        // returning. Stop right there so the rest of the test runs with
        // `old_table` still holding most of the live keys.
        let map: ConcurrentHashMap<i64> = ConcurrentHashMap::with_capacity(256);
        let mut keys = Vec::new();
        let mut triggered = false;
        for i in 0..300 {
            let k = format!("k{i}");
            map.put(Arc::from(k.clone().into_bytes()), i);
            keys.push(k);
            if map.is_resizing.load(Ordering::Acquire) {
                triggered = true;
                break;
            }
        }
        assert!(triggered, "expected a resize to have started");
        assert!(map.resize_progress.load(Ordering::Acquire) < 256);

        for (i, k) in keys.iter().enumerate() {
            assert_eq!(map.get(k.as_bytes()), Some(i as i64), "key {k} missing mid-resize");
        }
        assert_eq!(map.len(), keys.len());

        let first = keys[0].clone();
        assert_eq!(map.put(Arc::from(first.clone().into_bytes()), 999), PutOutcome::Modified);
        assert_eq!(map.get(first.as_bytes()), Some(999));
        assert_eq!(map.len(), keys.len());

        let last = keys.last().unwrap().clone();
        assert!(map.remove(last.as_bytes()));
        assert_eq!(map.get(last.as_bytes()), None);
        assert_eq!(map.len(), keys.len() - 1);
    }
}
