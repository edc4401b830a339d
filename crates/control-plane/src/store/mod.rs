//! Embedded bucketed datastore.
//!
//! All configuration lives in a single file inside the data directory:
//! `berth.db` (plain JSON) or `berth.edb` (whole-file AEAD through the
//! [`CryptoSuite`]). In-memory state is an immutable snapshot behind an
//! `Arc`: readers clone the `Arc` and never block the writer, writers
//! serialise through one mutex, mutate a working copy, persist it, then swap
//! the snapshot. A write callback that returns an error therefore leaves no
//! trace, on disk or in memory.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::crypto::{CryptoError, CryptoSuite};

/// File name of the unencrypted datastore.
pub const PLAIN_FILE: &str = "berth.db";
/// File name of the encrypted datastore.
pub const ENCRYPTED_FILE: &str = "berth.edb";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found inside the database")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database is in an ambiguous state: both an encrypted and an unencrypted file exist")]
    HaveEncryptedAndUnencrypted,
    #[error("an encrypted database exists but no encryption key was provided")]
    EncryptedWithoutKey,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
}

/// Encodes a numeric key so lexicographic bucket order equals numeric order.
pub fn key_u32(id: u32) -> String {
    format!("{id:010}")
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Bucket {
    seq: u64,
    items: BTreeMap<String, serde_json::Value>,
}

/// Full datastore contents. Cloned per write transaction; the data is
/// configuration-scale, not workload-scale, so the copy is cheap.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StoreState {
    buckets: BTreeMap<String, Bucket>,
}

impl StoreState {
    fn get_raw(&self, bucket: &str, key: &str) -> Option<&serde_json::Value> {
        self.buckets.get(bucket)?.items.get(key)
    }
}

/// Read access shared by read-only and read-write transactions.
///
/// Handles are only valid inside the `view`/`update` callback that produced
/// them; the borrow checker enforces that they do not escape.
pub trait TxRead {
    #[doc(hidden)]
    fn state(&self) -> &StoreState;

    fn get<T: DeserializeOwned>(&self, bucket: &str, key: &str) -> Result<T, StoreError> {
        let value = self
            .state()
            .get_raw(bucket, key)
            .ok_or(StoreError::NotFound)?;
        Ok(serde_json::from_value(value.clone())?)
    }

    fn exists(&self, bucket: &str, key: &str) -> bool {
        self.state().get_raw(bucket, key).is_some()
    }

    /// Iterates a bucket in key order, decoding each blob.
    fn for_each<T, F>(&self, bucket: &str, mut f: F) -> Result<(), StoreError>
    where
        T: DeserializeOwned,
        F: FnMut(&str, T) -> Result<(), StoreError>,
    {
        let Some(bucket) = self.state().buckets.get(bucket) else {
            return Ok(());
        };
        for (key, value) in &bucket.items {
            f(key, serde_json::from_value(value.clone())?)?;
        }
        Ok(())
    }

    /// Collects all blobs of a bucket in key order.
    fn read_all<T: DeserializeOwned>(&self, bucket: &str) -> Result<Vec<T>, StoreError> {
        let mut all = Vec::new();
        self.for_each(bucket, |_, item: T| {
            all.push(item);
            Ok(())
        })?;
        Ok(all)
    }
}

/// Read-only transaction over a state snapshot.
pub struct ReadTx {
    state: Arc<StoreState>,
}

impl TxRead for ReadTx {
    fn state(&self) -> &StoreState {
        &self.state
    }
}

/// Read-write transaction over a working copy of the state.
pub struct WriteTx {
    state: StoreState,
}

impl TxRead for WriteTx {
    fn state(&self) -> &StoreState {
        &self.state
    }
}

impl WriteTx {
    pub fn put<T: Serialize>(&mut self, bucket: &str, key: &str, value: &T) -> Result<(), StoreError> {
        let encoded = serde_json::to_value(value)?;
        self.state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .items
            .insert(key.to_string(), encoded);
        Ok(())
    }

    pub fn delete(&mut self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let Some(bucket) = self.state.buckets.get_mut(bucket) else {
            return Err(StoreError::NotFound);
        };
        bucket.items.remove(key).ok_or(StoreError::NotFound)?;
        Ok(())
    }

    /// Next identifier for a bucket; monotonic, never reused.
    pub fn next_id(&mut self, bucket: &str) -> u32 {
        let bucket = self.state.buckets.entry(bucket.to_string()).or_default();
        bucket.seq += 1;
        bucket.seq as u32
    }
}

#[derive(Debug)]
enum Encryption {
    None,
    Aead { key: [u8; 32], suite: CryptoSuite },
}

#[derive(Debug)]
struct Inner {
    current: RwLock<Arc<StoreState>>,
    writer: Mutex<()>,
    path: PathBuf,
    encryption: Encryption,
}

/// Handle to the datastore; cheap to clone.
#[derive(Clone, Debug)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Opens the datastore, resolving the on-disk state against the presence
    /// of an encryption key:
    ///
    /// | plain | encrypted | key | action |
    /// |---|---|---|---|
    /// | yes | no  | yes | migrate plain into the encrypted file |
    /// | yes | no  | no  | operate on the plain file |
    /// | no  | yes | yes | operate on the encrypted file |
    /// | no  | yes | no  | fatal |
    /// | yes | yes | any | fatal |
    /// | no  | no  | any | fresh init |
    pub fn open(
        dir: &Path,
        key: Option<[u8; 32]>,
        suite: CryptoSuite,
        compact: bool,
    ) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        let plain_path = dir.join(PLAIN_FILE);
        let encrypted_path = dir.join(ENCRYPTED_FILE);

        let (state, path, encryption) = match (plain_path.exists(), encrypted_path.exists(), key) {
            (true, true, _) => return Err(StoreError::HaveEncryptedAndUnencrypted),
            (false, true, None) => return Err(StoreError::EncryptedWithoutKey),
            (true, false, Some(key)) => {
                // An encryption key appeared next to a plain database:
                // migrate, then drop the plaintext file.
                let state = load_plain(&plain_path)?;
                let encryption = Encryption::Aead { key, suite };
                write_file(&encrypted_path, &state, &encryption)?;
                fs::remove_file(&plain_path)?;
                info!(path = %encrypted_path.display(), "migrated plain database to encrypted format");
                (state, encrypted_path, encryption)
            }
            (true, false, None) => (load_plain(&plain_path)?, plain_path, Encryption::None),
            (false, true, Some(key)) => {
                let encryption = Encryption::Aead { key, suite };
                let state = load_encrypted(&encrypted_path, &key, suite)?;
                (state, encrypted_path, encryption)
            }
            (false, false, key) => {
                let encryption = match key {
                    Some(key) => Encryption::Aead { key, suite },
                    None => Encryption::None,
                };
                let path = match encryption {
                    Encryption::None => plain_path,
                    Encryption::Aead { .. } => encrypted_path,
                };
                (StoreState::default(), path, encryption)
            }
        };

        let store = Store {
            inner: Arc::new(Inner {
                current: RwLock::new(Arc::new(state)),
                writer: Mutex::new(()),
                path,
                encryption,
            }),
        };

        if compact {
            store.compact()?;
        }

        Ok(store)
    }

    /// Runs `f` inside a read-only transaction against the current snapshot.
    pub fn view<R>(&self, f: impl FnOnce(&ReadTx) -> Result<R, StoreError>) -> Result<R, StoreError> {
        let state = self
            .inner
            .current
            .read()
            .expect("store lock poisoned")
            .clone();
        f(&ReadTx { state })
    }

    /// Runs `f` inside a read-write transaction. The new state is persisted
    /// and published only when `f` returns `Ok`.
    pub fn update<R>(
        &self,
        f: impl FnOnce(&mut WriteTx) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let _writer = self.inner.writer.lock().expect("store writer poisoned");

        let working = {
            let current = self.inner.current.read().expect("store lock poisoned");
            StoreState::clone(&current)
        };
        let mut tx = WriteTx { state: working };
        let result = f(&mut tx)?;

        write_file(&self.inner.path, &tx.state, &self.inner.encryption)?;

        let mut current = self.inner.current.write().expect("store lock poisoned");
        *current = Arc::new(tx.state);
        Ok(result)
    }

    /// Rewrites the live state into a fresh file. Skipped when an in-progress
    /// sibling from an interrupted compaction is still present.
    pub fn compact(&self) -> Result<(), StoreError> {
        let _writer = self.inner.writer.lock().expect("store writer poisoned");
        let sibling = compaction_sibling(&self.inner.path);
        if sibling.exists() {
            info!(path = %sibling.display(), "compaction sibling present, skipping compaction");
            return Ok(());
        }

        let state = self
            .inner
            .current
            .read()
            .expect("store lock poisoned")
            .clone();
        write_file(&self.inner.path, &state, &self.inner.encryption)?;
        info!(path = %self.inner.path.display(), "database compacted");
        Ok(())
    }

    /// Path of the active datastore file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

fn compaction_sibling(path: &Path) -> PathBuf {
    let mut sibling = path.as_os_str().to_owned();
    sibling.push(".tmp");
    PathBuf::from(sibling)
}

fn load_plain(path: &Path) -> Result<StoreState, StoreError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn load_encrypted(path: &Path, key: &[u8; 32], suite: CryptoSuite) -> Result<StoreState, StoreError> {
    let bytes = fs::read(path)?;
    // Header-less files were written by old releases; the suite transparently
    // falls back to the legacy stream format for those.
    let plaintext = suite.decrypt_bytes(&bytes, key)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

/// Writes the state to its target path via a fsynced sibling and an atomic
/// rename, so a crash never leaves a truncated database behind.
fn write_file(path: &Path, state: &StoreState, encryption: &Encryption) -> Result<(), StoreError> {
    let serialized = serde_json::to_vec(state)?;
    let payload = match encryption {
        Encryption::None => serialized,
        Encryption::Aead { key, suite } => suite.encrypt_bytes(&serialized, key)?,
    };

    let sibling = compaction_sibling(path);
    let mut file = fs::File::create(&sibling)?;
    file.write_all(&payload)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&sibling, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: u32,
        name: String,
    }

    fn open_plain(dir: &Path) -> Store {
        Store::open(dir, None, CryptoSuite::Standard, false).expect("open store")
    }

    #[test]
    fn put_get_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_plain(dir.path());

        let record = Record {
            id: 1,
            name: "primary".into(),
        };
        store
            .update(|tx| tx.put("endpoints", &key_u32(1), &record))
            .expect("update");

        let read: Record = store
            .view(|tx| tx.get("endpoints", &key_u32(1)))
            .expect("view");
        assert_eq!(read, record);
    }

    #[test]
    fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_plain(dir.path());

        let err = store
            .view(|tx| tx.get::<Record>("endpoints", &key_u32(42)))
            .expect_err("missing object");
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn failed_update_leaves_no_trace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_plain(dir.path());

        let record = Record {
            id: 1,
            name: "keep".into(),
        };
        store
            .update(|tx| tx.put("endpoints", &key_u32(1), &record))
            .expect("seed");

        let err = store
            .update(|tx| {
                tx.put(
                    "endpoints",
                    &key_u32(1),
                    &Record {
                        id: 1,
                        name: "discard".into(),
                    },
                )?;
                Err::<(), _>(StoreError::NotFound)
            })
            .expect_err("callback error must abort the transaction");
        assert!(matches!(err, StoreError::NotFound));

        let read: Record = store
            .view(|tx| tx.get("endpoints", &key_u32(1)))
            .expect("view");
        assert_eq!(read.name, "keep");
    }

    #[test]
    fn next_id_is_monotonic_and_survives_deletes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_plain(dir.path());

        let (first, second) = store
            .update(|tx| Ok((tx.next_id("stacks"), tx.next_id("stacks"))))
            .expect("ids");
        assert_eq!((first, second), (1, 2));

        store
            .update(|tx| {
                tx.put(
                    "stacks",
                    &key_u32(2),
                    &Record {
                        id: 2,
                        name: "s".into(),
                    },
                )?;
                tx.delete("stacks", &key_u32(2))
            })
            .expect("delete");

        let third = store.update(|tx| Ok(tx.next_id("stacks"))).expect("id");
        assert_eq!(third, 3);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = open_plain(dir.path());
            store
                .update(|tx| {
                    tx.put(
                        "teams",
                        &key_u32(7),
                        &Record {
                            id: 7,
                            name: "ops".into(),
                        },
                    )
                })
                .expect("write");
        }

        let store = open_plain(dir.path());
        let read: Record = store.view(|tx| tx.get("teams", &key_u32(7))).expect("read");
        assert_eq!(read.name, "ops");
    }

    #[test]
    fn encrypted_store_round_trips_and_requires_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let key = crate::crypto::master_key(b"passphrase");
        {
            let store =
                Store::open(dir.path(), Some(key), CryptoSuite::Standard, false).expect("open");
            store
                .update(|tx| {
                    tx.put(
                        "users",
                        &key_u32(1),
                        &Record {
                            id: 1,
                            name: "admin".into(),
                        },
                    )
                })
                .expect("write");
        }
        assert!(dir.path().join(ENCRYPTED_FILE).exists());
        assert!(!dir.path().join(PLAIN_FILE).exists());

        let err = Store::open(dir.path(), None, CryptoSuite::Standard, false)
            .expect_err("encrypted file without key");
        assert!(matches!(err, StoreError::EncryptedWithoutKey));

        let store = Store::open(dir.path(), Some(key), CryptoSuite::Standard, false).expect("open");
        let read: Record = store.view(|tx| tx.get("users", &key_u32(1))).expect("read");
        assert_eq!(read.name, "admin");
    }

    #[test]
    fn plain_store_migrates_when_key_appears() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = open_plain(dir.path());
            store
                .update(|tx| {
                    tx.put(
                        "users",
                        &key_u32(1),
                        &Record {
                            id: 1,
                            name: "admin".into(),
                        },
                    )
                })
                .expect("write");
        }

        let key = crate::crypto::master_key(b"passphrase");
        let store = Store::open(dir.path(), Some(key), CryptoSuite::Standard, false)
            .expect("open with key migrates");
        assert!(!dir.path().join(PLAIN_FILE).exists());
        assert!(dir.path().join(ENCRYPTED_FILE).exists());

        let read: Record = store.view(|tx| tx.get("users", &key_u32(1))).expect("read");
        assert_eq!(read.name, "admin");
    }

    #[test]
    fn ambiguous_state_is_fatal_and_modifies_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(PLAIN_FILE), b"{\"buckets\":{}}").expect("plain");
        fs::write(dir.path().join(ENCRYPTED_FILE), b"ciphertext").expect("encrypted");

        let err = Store::open(
            dir.path(),
            Some(crate::crypto::master_key(b"k")),
            CryptoSuite::Standard,
            false,
        )
        .expect_err("ambiguous state");
        assert!(matches!(err, StoreError::HaveEncryptedAndUnencrypted));

        assert_eq!(
            fs::read(dir.path().join(PLAIN_FILE)).expect("plain intact"),
            b"{\"buckets\":{}}"
        );
        assert_eq!(
            fs::read(dir.path().join(ENCRYPTED_FILE)).expect("encrypted intact"),
            b"ciphertext"
        );
    }

    #[test]
    fn compaction_skips_when_sibling_is_present() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = open_plain(dir.path());
            store
                .update(|tx| {
                    tx.put(
                        "teams",
                        &key_u32(1),
                        &Record {
                            id: 1,
                            name: "ops".into(),
                        },
                    )
                })
                .expect("write");
        }

        let sibling = dir.path().join(format!("{PLAIN_FILE}.tmp"));
        fs::write(&sibling, b"half-written").expect("sibling");

        let store = Store::open(dir.path(), None, CryptoSuite::Standard, true).expect("open");
        assert_eq!(
            fs::read(&sibling).expect("sibling intact"),
            b"half-written",
            "an in-progress sibling must not be overwritten by startup compaction"
        );

        fs::remove_file(&sibling).expect("cleanup");
        store.compact().expect("compact");
        let read: Record = store.view(|tx| tx.get("teams", &key_u32(1))).expect("read");
        assert_eq!(read.name, "ops");
    }
}
