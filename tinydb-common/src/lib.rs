// tinydb-common - Shared types, error handling, and configuration for TinyDB
//
// This crate defines the vocabulary the engine and server crates share:
// the error type, ACL bitmask, entry type tag, and runtime configuration.

pub mod acl;
pub mod config;
pub mod entry;
pub mod error;

pub use acl::{AccessMask, CommandClass, DatabaseAccess};
pub use config::Config;
pub use entry::EntryType;
pub use error::{SnapshotFormatError, TinyDbError, TinyDbResult};
