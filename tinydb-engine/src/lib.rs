// tinydb-engine - the concurrent data plane: sharded store, list values,
// TTL engine, atomic ops, snapshot codec, and user/ACL management.
//
// The server crate dispatches parsed commands against the types exported
// here; this crate has no knowledge of the wire protocol or pub/sub.

pub mod atomic;
pub mod context;
pub mod hashmap;
pub mod list;
pub mod pool;
pub mod shard;
pub mod snapshot;
pub mod ttl;
pub mod user;
pub mod value;

pub use atomic::IncrOutcome;
pub use context::{DatabaseManager, RuntimeContext};
pub use list::{ListElement, ListValue};
pub use pool::{MemoryPool, PoolHandle};
pub use shard::{pick_shard, Database, Shard};
pub use ttl::TtlSweeperHandle;
pub use user::{User, UserManager};
pub use value::{Entry, Value};
