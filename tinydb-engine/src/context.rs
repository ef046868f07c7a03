//! # Database Manager & Runtime Context
//!
//! Purpose: the composition root for the engine half of TinyDB — the
//! fixed array of databases and the user table that the command executor
//! and background threads share. The source tracks one process-wide
//! "active" `(database, user)` pair; here that pair lives per connection
//! instead (`tinydb_server::executor::ConnectionState`), since a single
//! shared pointer isn't safe across concurrently served connections.

use parking_lot::RwLock;

use crate::shard::Database;
use crate::user::UserManager;

pub struct DatabaseManager {
    databases: Vec<Database>,
    num_shards: usize,
}

impl DatabaseManager {
    pub fn new(num_databases: u64, num_shards: usize) -> Self {
        let databases = (0..num_databases)
            .map(|id| Database::new(id, num_shards))
            .collect();
        DatabaseManager {
            databases,
            num_shards,
        }
    }

    pub fn databases(&self) -> &[Database] {
        &self.databases
    }

    pub fn database(&self, id: u64) -> Option<&Database> {
        self.databases.iter().find(|d| d.id == id)
    }

    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    /// Copies every shard's entries from `imported` into the live
    /// database with the same id, clearing each live shard first. This
    /// manager's database count is fixed at startup, so an imported
    /// database with no matching live id is skipped with a warning
    /// rather than grafted on.
    pub fn apply_imported(&self, imported: Vec<Database>) {
        for imported_db in imported {
            let Some(live_db) = self.database(imported_db.id) else {
                tracing::warn!(id = imported_db.id, "skipping imported database with no live slot");
                continue;
            };
            live_db.set_name(imported_db.name());
            for (shard_index, imported_shard) in imported_db.shards().iter().enumerate() {
                let live_shard = &live_db.shards()[shard_index];
                live_shard.clear();
                for (key, entry) in imported_shard.map().iter_snapshot() {
                    live_shard.put(key, entry);
                }
            }
        }
    }
}

/// Process-wide state: database manager, user manager, and config that
/// both the event server and the background threads (TTL sweeper,
/// snapshotter) hold a shared reference to.
pub struct RuntimeContext {
    pub databases: DatabaseManager,
    pub users: RwLock<UserManager>,
}

impl RuntimeContext {
    pub fn new(num_databases: u64, num_shards: usize) -> Self {
        RuntimeContext {
            databases: DatabaseManager::new(num_databases, num_shards),
            users: RwLock::new(UserManager::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_creates_requested_database_count() {
        let manager = DatabaseManager::new(3, 16);
        assert_eq!(manager.databases().len(), 3);
        assert!(manager.database(1).is_some());
        assert!(manager.database(5).is_none());
    }

    #[test]
    fn apply_imported_repopulates_matching_database() {
        use crate::value::{Entry, Value};
        use std::sync::atomic::AtomicI64;
        use std::sync::Arc;

        let manager = DatabaseManager::new(1, 16);
        manager.database(0).unwrap().shard_for(b"stale").put(
            Arc::from(b"stale".as_slice()),
            Entry::new_integer(Arc::from(b"stale".as_slice()), 1),
        );

        let scratch = Database::new(0, 16);
        scratch.shard_for(b"fresh").put(
            Arc::from(b"fresh".as_slice()),
            Entry::new(Arc::from(b"fresh".as_slice()), Value::Integer(AtomicI64::new(7))),
        );

        manager.apply_imported(vec![scratch]);

        let live = manager.database(0).unwrap();
        assert!(live.shard_for(b"stale").get(b"stale").is_none());
        assert!(live.shard_for(b"fresh").get(b"fresh").is_some());
    }

    #[test]
    fn runtime_context_starts_with_default_user_and_db_zero() {
        let ctx = RuntimeContext::new(1, 16);
        assert!(ctx.databases.database(0).is_some());
        assert!(ctx.users.read().user(crate::user::DEFAULT_USER).is_some());
    }
}
