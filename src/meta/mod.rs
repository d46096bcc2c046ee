//! Durable, bucketed metadata storage with prefix search.
//!
//! A [`Backend`] is a plain `(bucket, key) → bytes` store; two
//! implementations exist: [`RedbBackend`](redb_backend::RedbBackend)
//! (embedded transactional file) and [`LocalFsBackend`](localfs::LocalFsBackend)
//! (one file per key/bucket with a write-through cache).  [`MetaStore`]
//! wraps a backend with typed JSON semantics keyed by
//! [`MetaObject::key`](crate::types::MetaObject::key) and keeps a shared
//! prefix [`Trie`](trie::Trie) consistent with the backend under one lock.

pub mod localfs;
pub mod redb_backend;
pub mod trie;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::VolumeError;
use crate::types::MetaObject;
use trie::Trie;

/// Backend driver name for the embedded transactional store.
pub const DRIVER_REDB: &str = "redb";

/// Backend driver name for the flat-file store.
pub const DRIVER_LOCALFS: &str = "localfs";

/// Low-level key/value contract all metadata backends implement.
///
/// Operations are synchronous: backends do short local file I/O only.
pub trait Backend: Send + Sync {
    /// Store `value` under `(bucket, key)`, replacing any previous value.
    fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<(), VolumeError>;
    /// Fetch the value for `(bucket, key)`; fails with
    /// [`VolumeError::ObjectNotFound`] when absent.
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, VolumeError>;
    /// Delete `(bucket, key)`.  Removing an absent key is not an error.
    fn remove(&self, bucket: &str, key: &str) -> Result<(), VolumeError>;
    /// All values in `bucket`.
    fn list(&self, bucket: &str) -> Result<Vec<Vec<u8>>, VolumeError>;
    /// All keys in `bucket`.
    fn keys(&self, bucket: &str) -> Result<Vec<String>, VolumeError>;
    /// Where `key`'s data lives on disk (diagnostic).
    fn path(&self, key: &str) -> PathBuf;
}

/// Configuration for [`MetaStore::new`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend driver name: [`DRIVER_REDB`] or [`DRIVER_LOCALFS`].
    pub driver: String,
    /// Base directory (localfs) or database file (redb).
    pub base_dir: PathBuf,
    /// Declared buckets; at least one is required.  The store handle is
    /// initially bound to the first.
    pub buckets: Vec<String>,
}

/// Bucket-scoped, typed façade over a [`Backend`] plus the shared prefix
/// trie.
///
/// [`MetaStore::bucket`] derives sibling handles sharing the same backend
/// and trie; the trie is mutated under one mutex across all of them.
#[derive(Clone)]
pub struct MetaStore {
    backend: Arc<dyn Backend>,
    trie: Arc<Mutex<Trie>>,
    bucket: String,
}

impl MetaStore {
    /// Build a store from configuration: select the backend by driver name,
    /// open it, and seed the trie from every declared bucket's keys.
    ///
    /// Zero buckets, an unknown driver name, or a backend construction
    /// failure are all fatal — no partial store is ever returned.
    pub fn new(cfg: &Config) -> Result<Self, VolumeError> {
        if cfg.buckets.is_empty() {
            return Err(VolumeError::Backend(
                "metadata store requires at least one bucket".into(),
            ));
        }

        let backend: Arc<dyn Backend> = match cfg.driver.as_str() {
            DRIVER_REDB => Arc::new(redb_backend::RedbBackend::open(
                &cfg.base_dir,
                &cfg.buckets,
            )?),
            DRIVER_LOCALFS => Arc::new(localfs::LocalFsBackend::open(&cfg.base_dir)?),
            other => {
                return Err(VolumeError::Backend(format!(
                    "unknown metadata driver {other:?}"
                )));
            }
        };

        let mut trie = Trie::new();
        for bucket in &cfg.buckets {
            for key in backend.keys(bucket)? {
                trie.insert(&key);
            }
        }
        debug!(driver = %cfg.driver, buckets = cfg.buckets.len(), "metadata store ready");

        Ok(Self {
            backend,
            trie: Arc::new(Mutex::new(trie)),
            bucket: cfg.buckets[0].clone(),
        })
    }

    /// A sibling handle bound to a different bucket, sharing this handle's
    /// backend and trie.
    pub fn bucket(&self, name: &str) -> MetaStore {
        MetaStore {
            backend: Arc::clone(&self.backend),
            trie: Arc::clone(&self.trie),
            bucket: name.to_owned(),
        }
    }

    /// The bucket this handle is bound to.
    pub fn bucket_name(&self) -> &str {
        &self.bucket
    }

    /// Marshal `obj` to JSON, write it under `obj.key()`, and index the key.
    pub fn put<T: MetaObject>(&self, obj: &T) -> Result<(), VolumeError> {
        let key = obj.key();
        if key.is_empty() {
            return Err(VolumeError::Backend("object key must not be empty".into()));
        }
        let bytes = serde_json::to_vec(obj)?;
        self.backend.put(&self.bucket, &key, &bytes)?;
        self.trie
            .lock()
            .expect("trie lock poisoned")
            .insert(&key);
        Ok(())
    }

    /// Read and unmarshal the object stored under `key`.
    pub fn get<T: MetaObject>(&self, key: &str) -> Result<T, VolumeError> {
        let bytes = self.backend.get(&self.bucket, key)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Re-read `obj` in place, using its own key.
    pub fn fetch<T: MetaObject>(&self, obj: &mut T) -> Result<(), VolumeError> {
        *obj = self.get(&obj.key())?;
        Ok(())
    }

    /// Delete the object under `key` from backend and index.
    pub fn remove(&self, key: &str) -> Result<(), VolumeError> {
        self.backend.remove(&self.bucket, key)?;
        self.trie
            .lock()
            .expect("trie lock poisoned")
            .remove(key);
        Ok(())
    }

    /// All objects in this bucket.
    pub fn list<T: MetaObject>(&self) -> Result<Vec<T>, VolumeError> {
        self.backend
            .list(&self.bucket)?
            .iter()
            .map(|bytes| Ok(serde_json::from_slice(bytes)?))
            .collect()
    }

    /// All keys in this bucket (from the backend, not the trie).
    pub fn keys(&self) -> Result<Vec<String>, VolumeError> {
        self.backend.keys(&self.bucket)
    }

    /// Visit every object in this bucket.
    pub fn for_each<T, F>(&self, mut visit: F) -> Result<(), VolumeError>
    where
        T: MetaObject,
        F: FnMut(T) -> Result<(), VolumeError>,
    {
        for obj in self.list::<T>()? {
            visit(obj)?;
        }
        Ok(())
    }

    /// Keys starting with `prefix`, answered from the shared trie.  The
    /// empty prefix yields the empty result.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.trie
            .lock()
            .expect("trie lock poisoned")
            .keys_with_prefix(prefix)
    }

    /// Objects whose keys start with `prefix`.
    pub fn get_with_prefix<T: MetaObject>(&self, prefix: &str) -> Result<Vec<T>, VolumeError> {
        self.keys_with_prefix(prefix)
            .iter()
            .map(|key| self.get(key))
            .collect()
    }

    /// Where `key`'s data lives on disk (diagnostic).
    pub fn path(&self, key: &str) -> PathBuf {
        self.backend.path(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Volume, VolumeContext};

    fn store(dir: &std::path::Path, driver: &str) -> MetaStore {
        let base = if driver == DRIVER_REDB {
            dir.join("meta.db")
        } else {
            dir.to_path_buf()
        };
        MetaStore::new(&Config {
            driver: driver.to_owned(),
            base_dir: base,
            buckets: vec!["volume".to_owned()],
        })
        .unwrap()
    }

    #[test]
    fn construction_requires_buckets_and_known_driver() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(
            MetaStore::new(&Config {
                driver: DRIVER_LOCALFS.to_owned(),
                base_dir: tmp.path().to_path_buf(),
                buckets: vec![],
            })
            .is_err()
        );
        assert!(
            MetaStore::new(&Config {
                driver: "bogus".to_owned(),
                base_dir: tmp.path().to_path_buf(),
                buckets: vec!["volume".to_owned()],
            })
            .is_err()
        );
    }

    #[test]
    fn object_roundtrip_both_backends() {
        for driver in [DRIVER_LOCALFS, DRIVER_REDB] {
            let tmp = tempfile::tempdir().unwrap();
            let store = store(tmp.path(), driver);

            let vol = Volume::new(&VolumeContext::new("v1", "local"));
            store.put(&vol).unwrap();
            let loaded: Volume = store.get("v1").unwrap();
            assert_eq!(loaded, vol);

            store.remove("v1").unwrap();
            assert!(store.get::<Volume>("v1").unwrap_err().is_object_not_found());
        }
    }

    #[test]
    fn prefix_search_tracks_put_and_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path(), DRIVER_LOCALFS);

        for name in ["prefixkey", "prefixkey2", "other"] {
            store
                .put(&Volume::new(&VolumeContext::new(name, "local")))
                .unwrap();
        }

        let mut hits = store.keys_with_prefix("prefixkey");
        hits.sort();
        assert_eq!(hits, vec!["prefixkey", "prefixkey2"]);
        assert!(store.keys_with_prefix("").is_empty());

        store.remove("prefixkey2").unwrap();
        assert_eq!(store.keys_with_prefix("prefixkey"), vec!["prefixkey"]);

        let found: Vec<Volume> = store.get_with_prefix("prefix").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "prefixkey");
    }

    #[test]
    fn trie_seeded_from_existing_backend() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = store(tmp.path(), DRIVER_REDB);
            store
                .put(&Volume::new(&VolumeContext::new("seeded", "local")))
                .unwrap();
        }
        let store = store(tmp.path(), DRIVER_REDB);
        assert_eq!(store.keys_with_prefix("seed"), vec!["seeded"]);
    }

    #[test]
    fn sibling_buckets_share_trie_and_backend() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MetaStore::new(&Config {
            driver: DRIVER_LOCALFS.to_owned(),
            base_dir: tmp.path().to_path_buf(),
            buckets: vec!["volume".to_owned(), "network".to_owned()],
        })
        .unwrap();

        let network = store.bucket("network");
        assert_eq!(network.bucket_name(), "network");
        network
            .put(&Volume::new(&VolumeContext::new("net1", "local")))
            .unwrap();

        // The trie is shared, so the sibling's key is visible from the
        // original handle; the value itself is bucket-scoped.
        assert_eq!(store.keys_with_prefix("net"), vec!["net1"]);
        assert!(store.get::<Volume>("net1").unwrap_err().is_object_not_found());
        assert!(network.get::<Volume>("net1").is_ok());
    }

    #[test]
    fn empty_key_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path(), DRIVER_LOCALFS);
        let mut vol = Volume::new(&VolumeContext::new("x", "local"));
        vol.name = String::new();
        assert!(store.put(&vol).is_err());
    }
}
