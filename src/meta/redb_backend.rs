//! Embedded transactional metadata backend built on redb.
//!
//! Every declared bucket maps to a named table inside one on-disk database
//! file.  The file is opened with an exclusive lock; contention is retried
//! for a bounded window and then treated as a fatal construction error, not
//! something callers retry silently.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, warn};

use super::Backend;
use crate::error::VolumeError;

/// How long to wait for another process to release the database lock.
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between lock-acquisition attempts.
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);

fn table(bucket: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(bucket)
}

/// True for open failures that clear up once the other holder lets go of
/// the database: a handle still open in this process, or the file lock held
/// by another one.  Corruption and permission errors never recover and are
/// not retried.
fn is_lock_contention(err: &redb::DatabaseError) -> bool {
    match err {
        redb::DatabaseError::DatabaseAlreadyOpen => true,
        redb::DatabaseError::Storage(redb::StorageError::Io(e)) => {
            e.kind() == std::io::ErrorKind::WouldBlock
        }
        _ => false,
    }
}

/// redb-backed [`Backend`].
#[derive(Debug)]
pub struct RedbBackend {
    db: Database,
    path: PathBuf,
}

impl RedbBackend {
    /// Open (or create) the database at `path` and eagerly create a table
    /// per declared bucket so later read transactions cannot fail on a
    /// missing table.
    pub fn open(path: impl AsRef<Path>, buckets: &[String]) -> Result<Self, VolumeError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let deadline = Instant::now() + OPEN_TIMEOUT;
        let db = loop {
            match Database::create(path) {
                Ok(db) => break db,
                Err(e) if is_lock_contention(&e) && Instant::now() < deadline => {
                    warn!(path = %path.display(), error = %e, "database locked, retrying");
                    std::thread::sleep(OPEN_RETRY_DELAY);
                }
                Err(e) if is_lock_contention(&e) => {
                    return Err(VolumeError::Backend(format!(
                        "open {} (lock held for {OPEN_TIMEOUT:?}): {e}",
                        path.display()
                    )));
                }
                Err(e) => {
                    return Err(VolumeError::Backend(format!(
                        "open {}: {e}",
                        path.display()
                    )));
                }
            }
        };

        let write_txn = db.begin_write().map_err(VolumeError::backend)?;
        for bucket in buckets {
            write_txn
                .open_table(table(bucket))
                .map_err(VolumeError::backend)?;
        }
        write_txn.commit().map_err(VolumeError::backend)?;

        debug!(path = %path.display(), buckets = buckets.len(), "redb backend opened");
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }
}

impl Backend for RedbBackend {
    fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<(), VolumeError> {
        let write_txn = self.db.begin_write().map_err(VolumeError::backend)?;
        {
            let mut t = write_txn
                .open_table(table(bucket))
                .map_err(VolumeError::backend)?;
            t.insert(key, value).map_err(VolumeError::backend)?;
        }
        write_txn.commit().map_err(VolumeError::backend)?;
        Ok(())
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, VolumeError> {
        let read_txn = self.db.begin_read().map_err(VolumeError::backend)?;
        let t = read_txn
            .open_table(table(bucket))
            .map_err(VolumeError::backend)?;
        match t.get(key).map_err(VolumeError::backend)? {
            Some(val) => Ok(val.value().to_vec()),
            None => Err(VolumeError::ObjectNotFound(key.to_owned())),
        }
    }

    fn remove(&self, bucket: &str, key: &str) -> Result<(), VolumeError> {
        let write_txn = self.db.begin_write().map_err(VolumeError::backend)?;
        {
            let mut t = write_txn
                .open_table(table(bucket))
                .map_err(VolumeError::backend)?;
            t.remove(key).map_err(VolumeError::backend)?;
        }
        write_txn.commit().map_err(VolumeError::backend)?;
        Ok(())
    }

    fn list(&self, bucket: &str) -> Result<Vec<Vec<u8>>, VolumeError> {
        let read_txn = self.db.begin_read().map_err(VolumeError::backend)?;
        let t = read_txn
            .open_table(table(bucket))
            .map_err(VolumeError::backend)?;
        let mut out = Vec::new();
        for entry in t.iter().map_err(VolumeError::backend)? {
            let entry = entry.map_err(VolumeError::backend)?;
            out.push(entry.1.value().to_vec());
        }
        Ok(out)
    }

    fn keys(&self, bucket: &str) -> Result<Vec<String>, VolumeError> {
        let read_txn = self.db.begin_read().map_err(VolumeError::backend)?;
        let t = read_txn
            .open_table(table(bucket))
            .map_err(VolumeError::backend)?;
        let mut out = Vec::new();
        for entry in t.iter().map_err(VolumeError::backend)? {
            let entry = entry.map_err(VolumeError::backend)?;
            out.push(entry.0.value().to_owned());
        }
        Ok(out)
    }

    fn path(&self, _key: &str) -> PathBuf {
        self.path.clone()
    }
}
