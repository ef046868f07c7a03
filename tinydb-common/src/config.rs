//! # Runtime Configuration
//!
//! Purpose: turn the original C project's compile-time constants
//! (`config.h`) into a small typed struct the composition root can
//! override, without pulling in a config-file crate the teacher workspace
//! doesn't use.

/// Process-wide tunables. No field here is read from the environment or a
/// CLI flag (§6 of the spec: "no CLI flags"); `main.rs` constructs a
/// `Config` by hand and passes it down.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port the server listens on.
    pub port: u16,
    /// Bind address, as a dotted-quad string (0.0.0.0 by default).
    pub host: [u8; 4],
    /// Maximum accepted line length before a connection buffer stops growing.
    pub command_buffer_size: usize,
    /// Backlog passed to `listen`.
    pub connection_backlog: u32,
    /// Filename the server looks for on startup.
    pub default_snapshot_name: String,
    /// Filename written by the clean-shutdown exit hook.
    pub default_exit_snapshot_name: String,
    /// Number of databases created when there is no snapshot to restore.
    pub num_initial_databases: u64,
    /// Shard count per database. Must be a power of two.
    pub num_shards: usize,
    /// Ceiling on a single string value's length.
    pub max_string_length: usize,
    /// Worker pool size for pub/sub fan-out and webhook delivery.
    pub worker_pool_size: usize,
    /// Bound on the worker pool's task queue.
    pub worker_queue_capacity: usize,
}

/// Largest `COMMAND_BUFFER_SIZE` the source disagreed on (4 KiB vs 1 MiB);
/// per the spec's resolution we expose the larger one as the default and
/// let callers shrink it.
pub const DEFAULT_COMMAND_BUFFER_SIZE: usize = 1024 * 1024;

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8079,
            host: [0, 0, 0, 0],
            command_buffer_size: DEFAULT_COMMAND_BUFFER_SIZE,
            connection_backlog: 128,
            default_snapshot_name: "snapshot.bin".to_string(),
            default_exit_snapshot_name: "on_exit_snapshot.bin".to_string(),
            num_initial_databases: 1,
            num_shards: 16,
            max_string_length: 1_000_000,
            worker_pool_size: 10,
            worker_queue_capacity: 1024,
        }
    }
}

impl Config {
    /// Builder-style override, used by tests that want a small shard count
    /// or a short-lived snapshot path.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_num_shards(mut self, num_shards: usize) -> Self {
        assert!(num_shards.is_power_of_two(), "NUM_SHARDS must be a power of two");
        self.num_shards = num_shards;
        self
    }

    pub fn with_num_initial_databases(mut self, num: u64) -> Self {
        self.num_initial_databases = num;
        self
    }
}
