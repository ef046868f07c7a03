//! # Entry Type Tag
//!
//! The wire-level discriminant for a stored value's variant, shared
//! between the engine (which owns the actual `Value` union) and the
//! snapshot codec (which writes this tag as a `u32`).

/// Mirrors `DB_ENTRY_TYPE` from `tinydb_datatype.h`. `Object` is kept for
/// snapshot compatibility but has no constructible `Value` variant (the
/// source never implemented it either).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EntryType {
    String = 0,
    Integer = 1,
    Object = 2,
    List = 3,
}

impl EntryType {
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(EntryType::String),
            1 => Some(EntryType::Integer),
            2 => Some(EntryType::Object),
            3 => Some(EntryType::List),
            _ => None,
        }
    }
}
