//! Flat-file metadata backend.
//!
//! Each key becomes a subdirectory of the base directory, holding one file
//! per bucket name: `base/<key>/<bucket>`.  A write-through in-process
//! cache keyed by `(bucket, key)` mirrors every value read or written, is
//! invalidated on removal, and is seeded by walking the base directory once
//! at startup.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tracing::{debug, warn};

use super::Backend;
use crate::error::VolumeError;

/// Filesystem-backed [`Backend`] with an in-process cache.
pub struct LocalFsBackend {
    base: PathBuf,
    /// `(bucket, key)` → value.  Write-through on put, removed on remove.
    cache: DashMap<(String, String), Vec<u8>>,
}

impl LocalFsBackend {
    /// Open the backend rooted at `base`, creating the directory if needed
    /// and seeding the cache from whatever is already on disk.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self, VolumeError> {
        let base = base.into();
        std::fs::create_dir_all(&base)?;
        let backend = Self {
            base,
            cache: DashMap::new(),
        };
        backend.seed_cache()?;
        Ok(backend)
    }

    fn key_dir(&self, key: &str) -> PathBuf {
        self.base.join(key)
    }

    fn value_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.key_dir(key).join(bucket)
    }

    /// One walk of `base/<key>/<bucket>` filling the cache.  Unreadable
    /// entries are skipped with a warning; a partially seeded cache is
    /// still correct because reads fall through to disk.
    fn seed_cache(&self) -> Result<(), VolumeError> {
        for key_entry in std::fs::read_dir(&self.base)? {
            let key_entry = key_entry?;
            if !key_entry.file_type()?.is_dir() {
                continue;
            }
            let Some(key) = key_entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            for bucket_entry in std::fs::read_dir(key_entry.path())? {
                let bucket_entry = bucket_entry?;
                let Some(bucket) = bucket_entry.file_name().to_str().map(str::to_owned) else {
                    continue;
                };
                match std::fs::read(bucket_entry.path()) {
                    Ok(value) => {
                        self.cache.insert((bucket, key.clone()), value);
                    }
                    Err(e) => {
                        warn!(path = %bucket_entry.path().display(), error = %e,
                            "skipping unreadable metadata file");
                    }
                }
            }
        }
        debug!(base = %self.base.display(), entries = self.cache.len(), "cache seeded");
        Ok(())
    }
}

impl Backend for LocalFsBackend {
    fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<(), VolumeError> {
        std::fs::create_dir_all(self.key_dir(key))?;
        std::fs::write(self.value_path(bucket, key), value)?;
        self.cache
            .insert((bucket.to_owned(), key.to_owned()), value.to_vec());
        Ok(())
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, VolumeError> {
        let cache_key = (bucket.to_owned(), key.to_owned());
        if let Some(value) = self.cache.get(&cache_key) {
            return Ok(value.clone());
        }
        match std::fs::read(self.value_path(bucket, key)) {
            Ok(value) => {
                self.cache.insert(cache_key, value.clone());
                Ok(value)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VolumeError::ObjectNotFound(key.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, bucket: &str, key: &str) -> Result<(), VolumeError> {
        let path = self.value_path(bucket, key);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        // Drop the key directory once its last bucket file is gone.
        let _ = std::fs::remove_dir(self.key_dir(key));
        self.cache.remove(&(bucket.to_owned(), key.to_owned()));
        Ok(())
    }

    fn list(&self, bucket: &str) -> Result<Vec<Vec<u8>>, VolumeError> {
        let mut out = Vec::new();
        for key in self.keys(bucket)? {
            out.push(self.get(bucket, &key)?);
        }
        Ok(out)
    }

    fn keys(&self, bucket: &str) -> Result<Vec<String>, VolumeError> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.base)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(key) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if entry.path().join(bucket).is_file() {
                out.push(key);
            }
        }
        Ok(out)
    }

    fn path(&self, key: &str) -> PathBuf {
        self.key_dir(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::open(tmp.path()).unwrap();

        backend.put("volume", "v1", b"hello").unwrap();
        assert_eq!(backend.get("volume", "v1").unwrap(), b"hello");
        assert!(tmp.path().join("v1/volume").is_file());

        backend.remove("volume", "v1").unwrap();
        assert!(backend.get("volume", "v1").unwrap_err().is_object_not_found());
        assert!(!tmp.path().join("v1").exists());
    }

    #[test]
    fn cache_seeded_from_existing_files() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let backend = LocalFsBackend::open(tmp.path()).unwrap();
            backend.put("volume", "v1", b"persisted").unwrap();
        }

        let backend = LocalFsBackend::open(tmp.path()).unwrap();
        assert_eq!(backend.cache.len(), 1);
        assert_eq!(backend.get("volume", "v1").unwrap(), b"persisted");
    }

    #[test]
    fn remove_invalidates_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::open(tmp.path()).unwrap();
        backend.put("volume", "v1", b"x").unwrap();
        backend.remove("volume", "v1").unwrap();
        assert!(backend.cache.is_empty());
    }

    #[test]
    fn keys_are_scoped_to_bucket() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::open(tmp.path()).unwrap();
        backend.put("volume", "v1", b"1").unwrap();
        backend.put("volume", "v2", b"2").unwrap();
        backend.put("network", "n1", b"3").unwrap();

        let mut keys = backend.keys("volume").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["v1", "v2"]);
        assert_eq!(backend.keys("network").unwrap(), vec!["n1"]);
    }
}
