// Credential persistence behind a small key-value contract

use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::error::StoreError;

/// Key-value persistence for credentials
///
/// Only read-after-write within one process is required. `set_many` is a
/// best-effort batch and need not be transactional.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError>;
}

/// In-process store, used by tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: DashMap<String, String>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        for key in keys {
            self.entries.remove(*key);
        }
        Ok(())
    }
}

/// SQLite-backed store using a single `auth_kv` table
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    /// Open (or create) the credential database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::debug!("Opening credential store: {}", path.display());
        let store = Self::from_connection(Connection::open(path)?)?;

        // Tokens live in this file; keep it private to the user
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(store)
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

const UPSERT_SQL: &str = "INSERT INTO auth_kv (key, value) VALUES (?1, ?2) \
     ON CONFLICT(key) DO UPDATE SET value = excluded.value";

impl CredentialStore for SqliteCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM auth_kv WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(UPSERT_SQL, params![key, value])?;
        Ok(())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for (key, value) in entries {
            tx.execute(UPSERT_SQL, params![key, value])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for key in keys {
            tx.execute("DELETE FROM auth_kv WHERE key = ?", [key])?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise_store(store: &dyn CredentialStore) {
        assert_eq!(store.get("access_token").unwrap(), None);

        store.set("access_token", "T1").unwrap();
        assert_eq!(store.get("access_token").unwrap().as_deref(), Some("T1"));

        store
            .set_many(&[("access_token", "T2"), ("refresh_token", "R1")])
            .unwrap();
        assert_eq!(store.get("access_token").unwrap().as_deref(), Some("T2"));
        assert_eq!(store.get("refresh_token").unwrap().as_deref(), Some("R1"));

        store
            .remove_many(&["access_token", "refresh_token", "missing"])
            .unwrap();
        assert_eq!(store.get("access_token").unwrap(), None);
        assert_eq!(store.get("refresh_token").unwrap(), None);
    }

    #[test]
    fn test_memory_store_contract() {
        let store = MemoryCredentialStore::new();
        exercise_store(&store);
        assert!(store.is_empty());

        store
            .set_many(&[("access_token", "T1"), ("expires_at", "2030-01-01T00:00:00+00:00")])
            .unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_sqlite_store_contract() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        exercise_store(&store);
    }

    #[test]
    fn test_sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.sqlite3");

        {
            let store = SqliteCredentialStore::open(&path).unwrap();
            store.set("refresh_token", "R1").unwrap();
        }

        let store = SqliteCredentialStore::open(&path).unwrap();
        assert_eq!(store.get("refresh_token").unwrap().as_deref(), Some("R1"));
    }

    #[cfg(unix)]
    #[test]
    fn test_sqlite_store_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.sqlite3");
        let _store = SqliteCredentialStore::open(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
