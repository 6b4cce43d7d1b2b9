//! # Histwatch Store
//!
//! Durable presence store for distinct commands, backed by LMDB.
//!
//! The store records *that* a command was seen, nothing else: one named
//! database mapping the command text to a single sentinel byte. No rank is
//! persisted; recency is reconstructed in memory from the store's native
//! iteration order (key-sorted, not chronological) at startup.

use std::fs;
use std::path::Path;

use heed3::types::{Bytes, Str};
use heed3::{Database, Env, EnvOpenOptions};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Lmdb(#[from] heed3::Error),
}

// Database (table) name inside the environment.
const DB_HISTORY: &str = "history";

// Presence-only value; the key carries all the information.
const SENTINEL: [u8; 1] = [0x0];

// History sets are tiny; the map is sparse so this costs nothing up front.
const MAP_SIZE: usize = 1024 * 1024 * 1024;

/// Handle to the on-disk command set.
///
/// Cloning is cheap (the environment is reference-counted) and every method
/// runs its own transaction, so a handle can be used from the ingestion loop
/// without further coordination.
#[derive(Clone)]
pub struct HistoryStore {
    env: Env,
    db: Database<Str, Bytes>,
}

impl HistoryStore {
    /// Open (or create) the store at `path`, a directory.
    ///
    /// The `history` database is created if the environment does not have it
    /// yet. Callers treat failure here as "run without persistence", so this
    /// does not try to recover anything itself.
    pub fn open(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(MAP_SIZE)
                .max_dbs(1)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let db = env
            .database_options()
            .types::<Str, Bytes>()
            .name(DB_HISTORY)
            .create(&mut wtxn)?;
        wtxn.commit()?;

        Ok(Self { env, db })
    }

    /// Record `key` as seen. Putting an existing key overwrites it in place
    /// and is observably a no-op.
    pub fn put(&self, key: &str) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.db.put(&mut wtxn, key, &SENTINEL)?;
        wtxn.commit()?;
        Ok(())
    }

    /// Every stored key, in the store's native iteration order.
    ///
    /// For LMDB that is lexicographic key order — NOT the order commands
    /// were first seen in. Collected inside one read transaction so the
    /// caller gets all keys or a single error, never half a load.
    pub fn keys(&self) -> Result<Vec<String>> {
        let rtxn = self.env.read_txn()?;
        let mut keys = Vec::new();
        for entry in self.db.iter(&rtxn)? {
            let (key, _sentinel) = entry?;
            keys.push(key.to_string());
        }
        Ok(keys)
    }

    pub fn len(&self) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.len(&rtxn)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn put_then_keys_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();

        store.put("git status").unwrap();
        store.put("ls -la").unwrap();

        let mut keys = store.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["git status", "ls -la"]);
    }

    #[test]
    fn put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();

        store.put("make").unwrap();
        store.put("make").unwrap();
        store.put("make").unwrap();

        assert_eq!(store.keys().unwrap(), vec!["make"]);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn keys_come_back_in_lexicographic_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();

        store.put("zz").unwrap();
        store.put("aa").unwrap();
        store.put("mm").unwrap();

        assert_eq!(store.keys().unwrap(), vec!["aa", "mm", "zz"]);
    }

    #[test]
    fn contents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = HistoryStore::open(dir.path()).unwrap();
            store.put("cargo build").unwrap();
        }

        let store = HistoryStore::open(dir.path()).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["cargo build"]);
    }

    #[test]
    fn open_fails_cleanly_when_the_path_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-directory");
        std::fs::write(&path, b"occupied").unwrap();

        // Callers downgrade this to "run without persistence".
        assert!(HistoryStore::open(&path).is_err());
    }

    #[test]
    fn fresh_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();

        assert_eq!(store.keys().unwrap(), Vec::<String>::new());
        assert_eq!(store.len().unwrap(), 0);
    }
}
