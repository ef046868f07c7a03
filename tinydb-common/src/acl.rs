//! # Access Control Bitmask
//!
//! The original C headers carry two conflicting encodings of the ACL
//! bitmask (`1<<n` in one header, `n<<1` in another). This crate picks a
//! single encoding, per the spec's resolution: `read=1, write=2, delete=4`.

use std::ops::{BitOr, BitOrAssign};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessMask(u8);

impl AccessMask {
    pub const READ: AccessMask = AccessMask(1);
    pub const WRITE: AccessMask = AccessMask(2);
    pub const DELETE: AccessMask = AccessMask(4);
    pub const NONE: AccessMask = AccessMask(0);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        AccessMask(bits)
    }

    pub fn contains(self, other: AccessMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AccessMask {
    type Output = AccessMask;

    fn bitor(self, rhs: AccessMask) -> AccessMask {
        AccessMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for AccessMask {
    fn bitor_assign(&mut self, rhs: AccessMask) {
        self.0 |= rhs.0;
    }
}

/// Which operation class a command belongs to, for the executor's ACL
/// check. Per the spec's resolution of the source's inconsistent
/// enforcement, this is checked once per command class rather than
/// per-command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    Read,
    Write,
    Delete,
}

impl CommandClass {
    pub fn required(self) -> AccessMask {
        match self {
            CommandClass::Read => AccessMask::READ,
            CommandClass::Write => AccessMask::WRITE,
            CommandClass::Delete => AccessMask::DELETE,
        }
    }
}

/// A single per-database grant, mirroring `DB_Access` from
/// `tinydb_acl.h`.
#[derive(Debug, Clone, Copy)]
pub struct DatabaseAccess {
    pub database: u64,
    pub acl: AccessMask,
}
