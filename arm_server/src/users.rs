//! SQLite user directory.
//!
//! Database location defaults to `./data/users.db`; the directory is created
//! automatically. Passwords are stored as hex SHA-256 of `salt + password`.

use std::fs;
use std::path::Path;

use arm_gcode::Role;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::session::{IdentityProvider, Principal};

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// A stored account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub is_active: bool,
}

pub struct UserDirectory {
    conn: Mutex<Connection>,
    salt: String,
}

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

impl UserDirectory {
    pub const DEFAULT_PATH: &'static str = "./data/users.db";

    /// Opens or creates the database. A fresh database gets an `admin`
    /// account with `admin_password`.
    pub fn open(path: &Path, salt: &str, admin_password: &str) -> Result<Self, UserStoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Self::with_connection(Connection::open(path)?, salt, admin_password)
    }

    pub fn in_memory(salt: &str, admin_password: &str) -> Result<Self, UserStoreError> {
        Self::with_connection(Connection::open_in_memory()?, salt, admin_password)
    }

    fn with_connection(conn: Connection, salt: &str, admin_password: &str) -> Result<Self, UserStoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            );",
        )?;
        let directory = Self {
            conn: Mutex::new(conn),
            salt: salt.to_string(),
        };
        if directory.find("admin")?.is_none() {
            directory.create_user("admin", admin_password, Role::Admin)?;
            info!("seeded admin account");
        }
        Ok(directory)
    }

    pub fn create_user(&self, username: &str, password: &str, role: Role) -> Result<i64, UserStoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (username, password_hash, role) VALUES (?1, ?2, ?3)",
            params![username, hash_password(&self.salt, password), role.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// `Ok(false)` when no user has that id.
    pub fn set_active(&self, id: i64, active: bool) -> Result<bool, UserStoreError> {
        let changed = self.conn.lock().execute(
            "UPDATE users SET is_active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        Ok(changed > 0)
    }

    /// `Ok(false)` when there is no such user.
    pub fn change_password(&self, username: &str, password: &str) -> Result<bool, UserStoreError> {
        let changed = self.conn.lock().execute(
            "UPDATE users SET password_hash = ?1 WHERE username = ?2",
            params![hash_password(&self.salt, password), username],
        )?;
        Ok(changed > 0)
    }

    pub fn find(&self, username: &str) -> Result<Option<User>, UserStoreError> {
        Ok(self.find_with_hash(username)?.map(|(user, _)| user))
    }

    pub fn list(&self) -> Result<Vec<User>, UserStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, username, role, is_active FROM users ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(User {
                id: row.get(0)?,
                username: row.get(1)?,
                role: Role::parse(&row.get::<_, String>(2)?),
                is_active: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn find_with_hash(&self, username: &str) -> Result<Option<(User, String)>, UserStoreError> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT id, username, role, is_active, password_hash FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok((
                        User {
                            id: row.get(0)?,
                            username: row.get(1)?,
                            role: Role::parse(&row.get::<_, String>(2)?),
                            is_active: row.get(3)?,
                        },
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;
        Ok(found)
    }
}

impl IdentityProvider for UserDirectory {
    fn login(&self, username: &str, password: &str) -> Option<Principal> {
        let (user, stored_hash) = match self.find_with_hash(username) {
            Ok(Some(found)) => found,
            Ok(None) => return None,
            Err(e) => {
                warn!("user lookup for {} failed: {}", username, e);
                return None;
            }
        };
        if !user.is_active || hash_password(&self.salt, password) != stored_hash {
            return None;
        }
        Some(Principal {
            user_id: user.id,
            username: user.username,
            role: user.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_salted_sha256() {
        // sha256("") is well known
        assert_eq!(
            hash_password("", ""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(hash_password("a", "pw"), hash_password("b", "pw"));
    }

    #[test]
    fn test_seeded_admin_can_log_in() {
        let users = UserDirectory::in_memory("salt", "secret").unwrap();
        let admin = users.login("admin", "secret").expect("admin login");
        assert_eq!(admin.role, Role::Admin);
        assert!(users.login("admin", "wrong").is_none());
        assert!(users.login("nobody", "secret").is_none());
    }

    #[test]
    fn test_inactive_user_is_refused() {
        let users = UserDirectory::in_memory("salt", "secret").unwrap();
        let id = users.create_user("ana", "pw", Role::Operator).unwrap();
        assert_eq!(users.login("ana", "pw").map(|p| p.user_id), Some(id));

        assert!(users.set_active(id, false).unwrap());
        assert!(users.login("ana", "pw").is_none());
        assert_eq!(users.list().unwrap().len(), 2);
        assert!(!users.set_active(99, false).unwrap());
    }

    #[test]
    fn test_open_creates_directory_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("users.db");
        {
            let users = UserDirectory::open(&path, "s", "pw").unwrap();
            users.create_user("viewer1", "v", Role::Viewer).unwrap();
        }
        let users = UserDirectory::open(&path, "s", "other").unwrap();
        assert_eq!(users.login("viewer1", "v").map(|p| p.role), Some(Role::Viewer));
        assert!(users.login("admin", "pw").is_some(), "seed runs only once");
    }

    #[test]
    fn test_change_password() {
        let users = UserDirectory::in_memory("salt", "secret").unwrap();
        users.create_user("ana", "old", Role::Operator).unwrap();

        assert!(users.change_password("ana", "new").unwrap());
        assert!(users.login("ana", "old").is_none());
        assert!(users.login("ana", "new").is_some());
        assert!(!users.change_password("nobody", "x").unwrap());
    }
}
