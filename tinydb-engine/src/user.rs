//! # User Manager & ACL
//!
//! Purpose: password-authenticated users with per-database access rights,
//! grounded in `tinydb_user_manager.c`'s `Create_User`/`Authenticate_User`/
//! `Delete_User` semantics.

use sha2::{Digest, Sha256};
use tinydb_common::{AccessMask, DatabaseAccess};

pub const DEFAULT_USER: &str = "default";
pub const DEFAULT_PASSWORD: &str = "default";

pub struct User {
    pub id: u64,
    pub name: String,
    password_hash: [u8; 32],
    pub rights: Vec<DatabaseAccess>,
}

impl User {
    fn new(id: u64, name: &str, password: &str, rights: Vec<DatabaseAccess>) -> Self {
        User {
            id,
            name: name.to_string(),
            password_hash: hash_password(password),
            rights,
        }
    }

    pub fn acl_for(&self, database: u64) -> AccessMask {
        self.rights
            .iter()
            .find(|r| r.database == database)
            .map(|r| r.acl)
            .unwrap_or(AccessMask::NONE)
    }

    fn check_password(&self, password: &str) -> bool {
        constant_time_eq(&self.password_hash, &hash_password(password))
    }

    /// Reconstructs a user from snapshot fields, where the password hash
    /// is already known rather than derived from a plaintext password.
    pub fn from_parts(id: u64, name: String, password_hash: [u8; 32], rights: Vec<DatabaseAccess>) -> Self {
        User {
            id,
            name,
            password_hash,
            rights,
        }
    }

    pub fn password_hash(&self) -> [u8; 32] {
        self.password_hash
    }
}

fn hash_password(password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Owns the user table and tracks the connection's active user by name.
/// A single `UserManager` is shared; each connection keeps its own
/// "currently authenticated as" name rather than this struct tracking a
/// single process-wide active user (the source's global `Active.user`
/// does not survive concurrent connections cleanly, so this is the
/// multi-connection-safe equivalent).
pub struct UserManager {
    users: Vec<User>,
    next_id: u64,
}

impl UserManager {
    pub fn new() -> Self {
        let default_user = User::new(
            0,
            DEFAULT_USER,
            DEFAULT_PASSWORD,
            vec![DatabaseAccess {
                database: 0,
                acl: AccessMask::READ | AccessMask::WRITE | AccessMask::DELETE,
            }],
        );
        UserManager {
            users: vec![default_user],
            next_id: 1,
        }
    }

    pub fn create_user(&mut self, name: &str, password: &str) -> Result<(), &'static str> {
        if self.users.iter().any(|u| u.name == name) {
            return Err("user already exists");
        }
        let id = self.next_id;
        self.next_id += 1;
        self.users.push(User::new(
            id,
            name,
            password,
            vec![DatabaseAccess {
                database: 0,
                acl: AccessMask::READ,
            }],
        ));
        Ok(())
    }

    pub fn authenticate(&self, name: &str, password: &str) -> bool {
        self.users
            .iter()
            .find(|u| u.name == name)
            .map(|u| u.check_password(password))
            .unwrap_or(false)
    }

    /// Returns `true` if the deleted user was the caller's active user,
    /// so callers know to revert their session to `default`.
    pub fn delete_user(&mut self, name: &str, active_name: &str) -> Result<bool, &'static str> {
        if name == DEFAULT_USER {
            return Err("cannot delete default user");
        }
        let before = self.users.len();
        self.users.retain(|u| u.name != name);
        if self.users.len() == before {
            return Err("no such user");
        }
        Ok(active_name == name)
    }

    pub fn user(&self, name: &str) -> Option<&User> {
        self.users.iter().find(|u| u.name == name)
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Replaces the whole user table, e.g. after a snapshot import.
    pub fn replace(&mut self, users: Vec<User>) {
        self.next_id = users.iter().map(|u| u.id + 1).max().unwrap_or(0);
        self.users = users;
    }
}

impl Default for UserManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_user_exists_with_full_rights_on_db_zero() {
        let manager = UserManager::new();
        let user = manager.user(DEFAULT_USER).unwrap();
        assert_eq!(
            user.acl_for(0),
            AccessMask::READ | AccessMask::WRITE | AccessMask::DELETE
        );
    }

    #[test]
    fn authenticate_succeeds_only_for_matching_password() {
        let manager = UserManager::new();
        assert!(manager.authenticate(DEFAULT_USER, DEFAULT_PASSWORD));
        assert!(!manager.authenticate(DEFAULT_USER, "wrong"));
    }

    #[test]
    fn create_user_rejects_duplicates() {
        let mut manager = UserManager::new();
        manager.create_user("alice", "pw").unwrap();
        assert!(manager.create_user("alice", "pw2").is_err());
    }

    #[test]
    fn delete_user_refuses_default() {
        let mut manager = UserManager::new();
        assert!(manager.delete_user(DEFAULT_USER, DEFAULT_USER).is_err());
    }

    #[test]
    fn delete_user_reports_when_it_was_active() {
        let mut manager = UserManager::new();
        manager.create_user("alice", "pw").unwrap();
        let was_active = manager.delete_user("alice", "alice").unwrap();
        assert!(was_active);
        assert!(manager.user("alice").is_none());
    }
}
