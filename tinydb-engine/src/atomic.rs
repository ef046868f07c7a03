//! # Atomic Operations
//!
//! Purpose: the store/get/increment facade used by the command executor.
//! Every operation picks the key's shard and does all its work under that
//! one shard lock — no nesting across shards, per the concurrency model.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::shard::Database;
use crate::value::{now_unix, Entry, Value};

/// Outcome of `incr`, mirroring the three cases in §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrOutcome {
    Value(i64),
    WrongType,
}

/// Stores `value` under `key`, clearing any previous TTL — a fresh write
/// is never born expiring. Any previous entry is simply dropped (no
/// explicit destructor call needed; `Arc`'s refcount handles it).
pub fn store(db: &Database, key: Arc<[u8]>, value: Value) {
    let entry = Entry::new(key.clone(), value);
    db.shard_for(&key).put(key, entry);
}

/// Looks up `key`, lazily evicting it first if its TTL has passed.
/// Returns `None` for an absent or just-expired key.
pub fn get(db: &Database, key: &[u8]) -> Option<Arc<Entry>> {
    let shard = db.shard_for(key);
    let entry = shard.get(key)?;
    if entry.is_expired(now_unix()) {
        shard.remove(key);
        return None;
    }
    Some(entry)
}

/// `incr`: absent or expired key is installed as integer `1`; an integer
/// key is fetch-added; any other type is left untouched and reported.
pub fn incr(db: &Database, key: &[u8]) -> IncrOutcome {
    let shard = db.shard_for(key);

    match shard.get(key) {
        Some(entry) if !entry.is_expired(now_unix()) => match &entry.value {
            Value::Integer(counter) => {
                IncrOutcome::Value(counter.fetch_add(1, Ordering::AcqRel) + 1)
            }
            _ => IncrOutcome::WrongType,
        },
        _ => {
            let key_owned: Arc<[u8]> = Arc::from(key);
            let entry = Entry::new_integer(key_owned.clone(), 1);
            shard.put(key_owned, entry);
            IncrOutcome::Value(1)
        }
    }
}

/// Concatenates `suffix` onto an existing string value. Returns `false`
/// for an absent key or a key of a non-string type.
pub fn append(db: &Database, key: &[u8], suffix: &[u8]) -> bool {
    let shard = db.shard_for(key);
    match shard.get(key) {
        Some(entry) if !entry.is_expired(now_unix()) => match &entry.value {
            Value::String(lock) => {
                let mut current = lock.write();
                let mut bytes = current.to_vec();
                bytes.extend_from_slice(suffix);
                *current = Arc::from(bytes);
                true
            }
            _ => false,
        },
        _ => false,
    }
}

pub fn delete(db: &Database, key: &[u8]) -> bool {
    db.shard_for(key).remove(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Arc<[u8]> {
        Arc::from(s.as_bytes())
    }

    #[test]
    fn store_then_get_roundtrips() {
        let db = Database::new(0, 16);
        store(&db, key("k"), Value::String(parking_lot::RwLock::new(Arc::from(b"v".as_slice()))));
        let entry = get(&db, b"k").unwrap();
        match &entry.value {
            Value::String(s) => assert_eq!(&**s.read(), b"v"),
            _ => panic!("wrong type"),
        }
    }

    #[test]
    fn incr_on_absent_key_starts_at_one() {
        let db = Database::new(0, 16);
        assert_eq!(incr(&db, b"c"), IncrOutcome::Value(1));
        assert_eq!(incr(&db, b"c"), IncrOutcome::Value(2));
        assert_eq!(incr(&db, b"c"), IncrOutcome::Value(3));
    }

    #[test]
    fn incr_on_string_key_is_wrong_type() {
        let db = Database::new(0, 16);
        store(&db, key("c"), Value::String(parking_lot::RwLock::new(Arc::from(b"x".as_slice()))));
        assert_eq!(incr(&db, b"c"), IncrOutcome::WrongType);
    }

    #[test]
    fn append_on_absent_key_fails() {
        let db = Database::new(0, 16);
        assert!(!append(&db, b"missing", b"x"));
    }

    #[test]
    fn expired_key_reads_as_absent_and_decrements_shard() {
        let db = Database::new(0, 16);
        store(&db, key("k"), Value::Integer(std::sync::atomic::AtomicI64::new(1)));
        let entry = get(&db, b"k").unwrap();
        entry.set_ttl(1);
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert_eq!(db.shard_for(b"k").count(), 1);
        assert!(get(&db, b"k").is_none());
        assert_eq!(db.shard_for(b"k").count(), 0);
    }
}
