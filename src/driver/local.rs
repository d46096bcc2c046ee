//! Local-directory volume driver.
//!
//! Each volume is a directory under a configurable data root.  When a
//! `size` option is present and a quota engine is configured, create and
//! attach enforce the size limit on the volume directory through the
//! [`QuotaDriver`](crate::quota::QuotaDriver).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use super::{AttachDetach, Driver, OptionDesc, StoreMode};
use crate::error::VolumeError;
use crate::quota::QuotaDriver;
use crate::types::{OPT_FILESYSTEM, OPT_SIZE, Volume};

/// Driver name.
pub const NAME: &str = "local";

/// Directory-per-volume driver with optional disk quotas.
pub struct LocalDriver {
    data_root: PathBuf,
    quota: Option<Arc<dyn QuotaDriver>>,
}

impl LocalDriver {
    /// Create a driver rooted at `data_root`; volumes become
    /// `data_root/<name>`.  Without a quota engine, `size` options are
    /// accepted but not enforced.
    pub fn new(data_root: impl Into<PathBuf>, quota: Option<Arc<dyn QuotaDriver>>) -> Self {
        Self {
            data_root: data_root.into(),
            quota,
        }
    }

    fn volume_dir(&self, volume: &Volume) -> PathBuf {
        self.data_root.join(&volume.name)
    }

    async fn apply_quota(&self, dir: &Path, volume: &Volume) -> Result<(), VolumeError> {
        if let (Some(quota), Some(size)) = (&self.quota, volume.size()) {
            quota.set_disk_quota(dir, size, 0).await?;
            info!(volume = %volume.name, size, "disk quota applied");
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn store_mode(&self) -> StoreMode {
        StoreMode::LOCAL | StoreMode::USE_LOCAL_META
    }

    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    async fn create(&self, volume: &mut Volume) -> Result<(), VolumeError> {
        let dir = self.volume_dir(volume);
        tokio::fs::create_dir_all(&dir).await?;
        self.apply_quota(&dir, volume).await?;
        volume.status.mount_point = dir.to_string_lossy().into_owned();
        volume.add_condition("Created", "volume directory created");
        Ok(())
    }

    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    async fn remove(&self, volume: &Volume) -> Result<(), VolumeError> {
        let dir = self.volume_dir(volume);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }

    async fn path(&self, volume: &Volume) -> Result<String, VolumeError> {
        Ok(self.volume_dir(volume).to_string_lossy().into_owned())
    }

    fn options(&self) -> Option<HashMap<String, OptionDesc>> {
        Some(HashMap::from([
            (
                OPT_SIZE.to_owned(),
                OptionDesc::new("", "disk quota size, e.g. 10G"),
            ),
            (
                OPT_FILESYSTEM.to_owned(),
                OptionDesc::new("ext4", "filesystem of the backing device"),
            ),
        ]))
    }

    fn attach_detach(&self) -> Option<&dyn AttachDetach> {
        Some(self)
    }
}

#[async_trait]
impl AttachDetach for LocalDriver {
    async fn attach(&self, volume: &mut Volume) -> Result<(), VolumeError> {
        let dir = self.volume_dir(volume);
        tokio::fs::create_dir_all(&dir).await?;
        self.apply_quota(&dir, volume).await?;
        volume.set_mounted(true);
        Ok(())
    }

    async fn detach(&self, volume: &mut Volume) -> Result<(), VolumeError> {
        // Nothing to unmount for plain directories; just drop the flag when
        // the last attach reference is gone.
        if volume.attach_ids().is_empty() {
            volume.set_mounted(false);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VolumeContext;

    #[tokio::test]
    async fn create_and_remove_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = LocalDriver::new(tmp.path(), None);

        let mut vol = Volume::new(&VolumeContext::new("v1", NAME));
        driver.create(&mut vol).await.unwrap();

        let dir = tmp.path().join("v1");
        assert!(dir.is_dir());
        assert_eq!(vol.status.mount_point, dir.to_string_lossy());
        assert_eq!(driver.path(&vol).await.unwrap(), dir.to_string_lossy());

        driver.remove(&vol).await.unwrap();
        assert!(!dir.exists());
        // Removing again is idempotent.
        driver.remove(&vol).await.unwrap();
    }

    #[tokio::test]
    async fn attach_marks_mounted() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = LocalDriver::new(tmp.path(), None);
        let mut vol = Volume::new(&VolumeContext::new("v1", NAME));
        driver.create(&mut vol).await.unwrap();

        let ad = driver.attach_detach().unwrap();
        ad.attach(&mut vol).await.unwrap();
        assert!(vol.is_mounted());

        ad.detach(&mut vol).await.unwrap();
        assert!(!vol.is_mounted());
    }

    #[test]
    fn declares_size_option() {
        let driver = LocalDriver::new("/tmp/does-not-matter", None);
        let options = driver.options().unwrap();
        assert!(options.contains_key(OPT_SIZE));
        assert!(!options[OPT_SIZE].description.is_empty());
        assert!(driver.store_mode().valid());
    }
}
