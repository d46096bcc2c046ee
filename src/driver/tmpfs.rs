//! tmpfs volume driver.
//!
//! Each volume is a tmpfs mount under a configurable root.  Attach mounts
//! the filesystem (idempotently, by consulting `/proc/self/mounts`); detach
//! unmounts only when the last attach-request reference is gone, per the
//! attach-ID convention on [`Volume`].

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::{AttachDetach, Driver, OptionDesc, StoreMode};
use crate::error::VolumeError;
use crate::types::{OPT_SIZE, Volume};

/// Driver name.
pub const NAME: &str = "tmpfs";

/// Size mounted when the volume does not carry a `size` option.
const DEFAULT_SIZE: &str = "64m";

/// Return `true` if `path` is currently listed as a mount point in
/// `/proc/self/mounts`.
fn is_mountpoint(path: &str) -> bool {
    let Ok(contents) = std::fs::read_to_string("/proc/self/mounts") else {
        return false;
    };
    contents
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(path))
}

/// tmpfs-per-volume driver.
pub struct TmpfsDriver {
    data_root: PathBuf,
}

impl TmpfsDriver {
    /// Create a driver whose volumes mount at `data_root/<name>`.
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    fn volume_dir(&self, volume: &Volume) -> PathBuf {
        self.data_root.join(&volume.name)
    }
}

#[async_trait]
impl Driver for TmpfsDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn store_mode(&self) -> StoreMode {
        StoreMode::LOCAL
    }

    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    async fn create(&self, volume: &mut Volume) -> Result<(), VolumeError> {
        let dir = self.volume_dir(volume);
        tokio::fs::create_dir_all(&dir).await?;
        volume.status.mount_point = dir.to_string_lossy().into_owned();
        volume.add_condition("Created", "tmpfs mount point prepared");
        Ok(())
    }

    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    async fn remove(&self, volume: &Volume) -> Result<(), VolumeError> {
        let dir = self.volume_dir(volume);
        let dir_str = dir.to_string_lossy();
        if is_mountpoint(&dir_str) {
            nix::mount::umount(&dir).map_err(|e| {
                VolumeError::Backend(format!("umount {dir_str}: {e}"))
            })?;
        }
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }

    async fn path(&self, volume: &Volume) -> Result<String, VolumeError> {
        Ok(self.volume_dir(volume).to_string_lossy().into_owned())
    }

    fn options(&self) -> Option<HashMap<String, OptionDesc>> {
        Some(HashMap::from([(
            OPT_SIZE.to_owned(),
            OptionDesc::new(DEFAULT_SIZE, "tmpfs size, e.g. 256m"),
        )]))
    }

    fn attach_detach(&self) -> Option<&dyn AttachDetach> {
        Some(self)
    }
}

#[async_trait]
impl AttachDetach for TmpfsDriver {
    async fn attach(&self, volume: &mut Volume) -> Result<(), VolumeError> {
        let dir = self.volume_dir(volume);
        tokio::fs::create_dir_all(&dir).await?;
        let dir_str = dir.to_string_lossy().into_owned();

        if is_mountpoint(&dir_str) {
            debug!(volume = %volume.name, "tmpfs already mounted, idempotent attach");
        } else {
            let size = volume.size().unwrap_or(DEFAULT_SIZE);
            let data = format!("size={size}");
            nix::mount::mount(
                Some("tmpfs"),
                &dir,
                Some("tmpfs"),
                nix::mount::MsFlags::empty(),
                Some(data.as_str()),
            )
            .map_err(|e| VolumeError::Backend(format!("mount tmpfs at {dir_str}: {e}")))?;
            info!(volume = %volume.name, size, "tmpfs mounted");
        }
        volume.set_mounted(true);
        Ok(())
    }

    async fn detach(&self, volume: &mut Volume) -> Result<(), VolumeError> {
        // Only the last outstanding attach reference actually unmounts.
        if !volume.attach_ids().is_empty() {
            debug!(volume = %volume.name, "attach references remain, keeping mount");
            return Ok(());
        }
        let dir = self.volume_dir(volume);
        let dir_str = dir.to_string_lossy();
        if is_mountpoint(&dir_str) {
            nix::mount::umount(&dir).map_err(|e| {
                VolumeError::Backend(format!("umount {dir_str}: {e}"))
            })?;
            info!(volume = %volume.name, "tmpfs unmounted");
        }
        volume.set_mounted(false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VolumeContext;

    // Actual tmpfs mounts need privileges; these tests cover the
    // unprivileged surface.

    #[tokio::test]
    async fn create_prepares_mount_point() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = TmpfsDriver::new(tmp.path());
        let mut vol = Volume::new(&VolumeContext::new("t1", NAME));
        driver.create(&mut vol).await.unwrap();
        assert!(tmp.path().join("t1").is_dir());
        assert!(!vol.status.mount_point.is_empty());
    }

    #[tokio::test]
    async fn detach_with_references_keeps_mount_state() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = TmpfsDriver::new(tmp.path());
        let mut vol = Volume::new(&VolumeContext::new("t1", NAME));
        driver.create(&mut vol).await.unwrap();

        vol.add_attach_id("req-1");
        vol.set_mounted(true);

        let ad = driver.attach_detach().unwrap();
        ad.detach(&mut vol).await.unwrap();
        // A reference remains: still mounted.
        assert!(vol.is_mounted());

        vol.remove_attach_id("req-1");
        ad.detach(&mut vol).await.unwrap();
        assert!(!vol.is_mounted());
    }

    #[test]
    fn declares_size_option_with_default() {
        let driver = TmpfsDriver::new("/tmp/unused");
        let options = driver.options().unwrap();
        assert_eq!(options[OPT_SIZE].default, DEFAULT_SIZE);
        assert!(driver.store_mode().valid());
    }
}
