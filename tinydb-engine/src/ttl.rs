//! # TTL Engine
//!
//! Purpose: per-key expiry bookkeeping plus the background sweeper that
//! reclaims expired keys that no one has lazily touched yet.
//!
//! `Entry::set_ttl`/`ttl_remaining`/`is_expired` (in `value.rs`) carry the
//! per-key half of this; this module owns the cross-database sweep and
//! the supervisor thread that drives it on an interval, matching
//! `tinydb_ttl.c`'s `ttl_cleanup_thread`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::info;

use crate::context::{DatabaseManager, RuntimeContext};
use crate::value::now_unix;

/// `Get_TTL` sentinel for an absent key. Kept here (not on `Entry`, which
/// has no notion of "absent") since it's a property of the lookup.
pub const TTL_ABSENT: i64 = -1;
/// `Get_TTL` sentinel for a key with no TTL set.
pub const TTL_NONE: i64 = -2;

/// Sweeps every database's every shard for expired entries, removing
/// them and decrementing shard counts. Returns the number of keys swept.
pub fn sweep_expired(manager: &DatabaseManager) -> usize {
    let now = now_unix();
    let mut swept = 0;

    for db in manager.databases() {
        for shard in db.shards() {
            let expired_keys: Vec<Arc<[u8]>> = shard
                .map()
                .iter_snapshot()
                .into_iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(k, _)| k)
                .collect();

            for key in expired_keys {
                if shard.remove(&key) {
                    swept += 1;
                }
            }
        }
    }

    swept
}

/// Handle to the background sweeper thread. Dropping it does not stop
/// the thread — callers must call `stop()` explicitly, mirroring the
/// source's `Stop_TTL_Cleanup`.
pub struct TtlSweeperHandle {
    running: Arc<AtomicBool>,
    interval_seconds: Arc<AtomicU64>,
    join: Option<JoinHandle<()>>,
}

impl TtlSweeperHandle {
    pub fn start(context: Arc<RuntimeContext>, interval_seconds: u64) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let interval = Arc::new(AtomicU64::new(interval_seconds.max(1)));

        let running_thread = running.clone();
        let interval_thread = interval.clone();
        let join = std::thread::spawn(move || {
            info!("ttl sweeper started");
            while running_thread.load(Ordering::Acquire) {
                let secs = interval_thread.load(Ordering::Acquire);
                std::thread::sleep(Duration::from_secs(secs));
                if !running_thread.load(Ordering::Acquire) {
                    break;
                }
                let swept = sweep_expired(&context.databases);
                if swept > 0 {
                    info!(swept, "ttl sweep cycle complete");
                }
            }
            info!("ttl sweeper stopped");
        });

        TtlSweeperHandle {
            running,
            interval_seconds: interval,
            join: Some(join),
        }
    }

    pub fn set_interval(&self, seconds: u64) {
        self.interval_seconds.store(seconds.max(1), Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for TtlSweeperHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// `Get_TTL`: `-1` if the key is absent, `-2` if it has no TTL, `0` if
/// expired-but-not-swept, else seconds remaining.
pub fn get_ttl(db: &crate::shard::Database, key: &[u8]) -> i64 {
    match crate::atomic::get(db, key) {
        Some(entry) => entry.ttl_remaining(now_unix()),
        None => TTL_ABSENT,
    }
}

/// `Set_TTL`: fails (returns `false`) if the key is absent.
pub fn set_ttl(db: &crate::shard::Database, key: &[u8], seconds: i64) -> bool {
    match crate::atomic::get(db, key) {
        Some(entry) => {
            entry.set_ttl(seconds);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DatabaseManager;
    use crate::value::Value;
    use std::sync::atomic::AtomicI64;

    #[test]
    fn set_and_get_ttl_roundtrip() {
        let manager = DatabaseManager::new(1, 16);
        let db = &manager.databases()[0];
        crate::atomic::store(
            db,
            Arc::from(b"k".as_slice()),
            Value::Integer(AtomicI64::new(1)),
        );
        assert!(set_ttl(db, b"k", 30));
        let remaining = get_ttl(db, b"k");
        assert!(remaining > 0 && remaining <= 30);
    }

    #[test]
    fn get_ttl_on_absent_key_is_minus_one() {
        let manager = DatabaseManager::new(1, 16);
        let db = &manager.databases()[0];
        assert_eq!(get_ttl(db, b"missing"), TTL_ABSENT);
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let manager = DatabaseManager::new(1, 16);
        {
            let db = &manager.databases()[0];
            crate::atomic::store(
                db,
                Arc::from(b"k".as_slice()),
                Value::Integer(AtomicI64::new(1)),
            );
            set_ttl(db, b"k", 1);
        }
        std::thread::sleep(Duration::from_millis(1100));
        let swept = sweep_expired(&manager);
        assert_eq!(swept, 1);
    }
}
