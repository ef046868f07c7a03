//! # Entry Model
//!
//! Purpose: the tagged value union and the per-key entry wrapper that
//! carries TTL bookkeeping alongside it.
//!
//! Mutation lives inside the variant (`AtomicI64` for integers, an
//! `RwLock<Arc<[u8]>>` for strings) rather than forcing every `incr` or
//! `append` to rewrite the hash-map bucket — the bucket only gets
//! rewritten when a key's *type* changes (e.g. `set` over an existing
//! integer).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use tinydb_common::EntryType;

use crate::list::ListValue;

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

pub enum Value {
    Integer(AtomicI64),
    String(RwLock<Arc<[u8]>>),
    List(Arc<ListValue>),
    Object,
}

impl Value {
    pub fn entry_type(&self) -> EntryType {
        match self {
            Value::Integer(_) => EntryType::Integer,
            Value::String(_) => EntryType::String,
            Value::List(_) => EntryType::List,
            Value::Object => EntryType::Object,
        }
    }
}

/// A stored key/value pair plus its optional expiry. `has_ttl` is true
/// iff `expiry != 0`, matching the source's convention of `0` meaning
/// "no TTL" rather than "expires at the epoch".
pub struct Entry {
    pub key: Arc<[u8]>,
    pub value: Value,
    has_ttl: AtomicBool,
    expiry: AtomicI64,
}

impl Entry {
    pub fn new(key: Arc<[u8]>, value: Value) -> Arc<Self> {
        Arc::new(Entry {
            key,
            value,
            has_ttl: AtomicBool::new(false),
            expiry: AtomicI64::new(0),
        })
    }

    pub fn new_string(key: Arc<[u8]>, bytes: Arc<[u8]>) -> Arc<Self> {
        Self::new(key, Value::String(RwLock::new(bytes)))
    }

    pub fn new_integer(key: Arc<[u8]>, n: i64) -> Arc<Self> {
        Self::new(key, Value::Integer(AtomicI64::new(n)))
    }

    pub fn new_list(key: Arc<[u8]>, list: Arc<ListValue>) -> Arc<Self> {
        Self::new(key, Value::List(list))
    }

    pub fn set_ttl(&self, seconds: i64) {
        if seconds <= 0 {
            self.clear_ttl();
            return;
        }
        self.expiry.store(now_unix() + seconds, Ordering::Release);
        self.has_ttl.store(true, Ordering::Release);
    }

    pub fn clear_ttl(&self) {
        self.has_ttl.store(false, Ordering::Release);
        self.expiry.store(0, Ordering::Release);
    }

    pub fn has_ttl(&self) -> bool {
        self.has_ttl.load(Ordering::Acquire)
    }

    pub fn expiry(&self) -> i64 {
        self.expiry.load(Ordering::Acquire)
    }

    /// `-2` if no TTL is set, `0` if expired but not yet swept, else the
    /// number of seconds remaining. Callers handle the "absent key" `-1`
    /// case themselves since that's a property of the lookup, not the entry.
    pub fn ttl_remaining(&self, now: i64) -> i64 {
        if !self.has_ttl() {
            return -2;
        }
        let remaining = self.expiry() - now;
        if remaining <= 0 {
            0
        } else {
            remaining
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.has_ttl() && now >= self.expiry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_ttl_then_clear_resets_has_ttl() {
        let entry = Entry::new_string(Arc::from(b"k".as_slice()), Arc::from(b"v".as_slice()));
        entry.set_ttl(10);
        assert!(entry.has_ttl());
        entry.set_ttl(0);
        assert!(!entry.has_ttl());
    }

    #[test]
    fn ttl_remaining_without_ttl_is_minus_two() {
        let entry = Entry::new_integer(Arc::from(b"k".as_slice()), 1);
        assert_eq!(entry.ttl_remaining(now_unix()), -2);
    }

    #[test]
    fn is_expired_true_once_past_expiry() {
        let entry = Entry::new_integer(Arc::from(b"k".as_slice()), 1);
        entry.set_ttl(1);
        assert!(!entry.is_expired(now_unix()));
        assert!(entry.is_expired(now_unix() + 2));
    }
}
