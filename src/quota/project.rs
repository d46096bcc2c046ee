//! Project-quota driver.
//!
//! Enforces subtree quotas through the kernel's project-quota facility:
//! directories are tagged with a project ID via `chattr -p <id> +P`, limits
//! are set with `setquota -P`, and the allocated-ID set is reconciled from
//! `repquota -Pan`.  On top of the group driver's behavior this one tracks
//! each device's total capacity (via `statvfs`) and rejects quota requests
//! larger than the filesystem itself before touching the quota tools.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::error::VolumeError;
use super::exec;
use super::mountinfo::{self, find_mount_for_device, load_mount_table};
use super::{QuotaDriver, QuotaState, size_to_bytes, size_to_kb};

/// Mount option that turns on project-quota accounting.
const MOUNT_OPTION: &str = "prjquota";

/// Project-quota implementation of [`QuotaDriver`].
pub struct PrjQuotaDriver {
    state: Mutex<QuotaState>,
    /// Per-command deadline.  `None` means unbounded.
    timeout: Option<Duration>,
}

impl PrjQuotaDriver {
    /// Create a driver with the given per-command timeout.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(QuotaState::default()),
            timeout,
        }
    }
}

#[async_trait]
impl QuotaDriver for PrjQuotaDriver {
    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn start_quota_driver(&self, dir: &Path) -> Result<String, VolumeError> {
        let dev = mountinfo::device_id(dir)?;
        let mut state = self.state.lock().await;
        if let Some(cached) = state.mount_points.get(&dev) {
            if cached.is_empty() {
                return Err(VolumeError::MountPointNotFound(dev));
            }
            return Ok(cached.clone());
        }

        let entries = load_mount_table()?;
        let Some(entry) = find_mount_for_device(&entries, dev) else {
            state.mount_points.insert(dev, String::new());
            return Err(VolumeError::MountPointNotFound(dev));
        };
        let mount_point = entry.mount_point.clone();

        if !entry.has_quota_option(MOUNT_OPTION) {
            info!(%mount_point, "remounting with prjquota");
            exec::run(
                "mount",
                &["-o", "remount,prjquota", &mount_point],
                self.timeout,
            )
            .await?;
        }

        // Probe form: exit code 1 means accounting is already on.
        exec::run_allow("quotaon", &["-Pp", &mount_point], &[1], self.timeout).await?;

        // Record the filesystem's total capacity so oversized quota
        // requests can be rejected before invoking setquota.
        let stat = nix::sys::statvfs::statvfs(Path::new(&mount_point))
            .map_err(|e| VolumeError::Backend(format!("statvfs {mount_point}: {e}")))?;
        let capacity = stat.fragment_size() as u64 * stat.blocks() as u64;
        state.dev_limits.insert(dev, capacity);

        state.mount_points.insert(dev, mount_point.clone());
        Ok(mount_point)
    }

    async fn set_subtree(&self, dir: &Path, id: u32) -> Result<u32, VolumeError> {
        let mut id = id;
        if id == 0 {
            id = self.get_file_attr(dir).await;
            if id == 0 {
                id = self.get_next_quota_id().await?;
            }
        }
        self.set_file_attr(dir, id).await?;
        Ok(id)
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn set_disk_quota(&self, dir: &Path, size: &str, id: u32) -> Result<(), VolumeError> {
        let mount_point = self.start_quota_driver(dir).await?;
        let id = self.set_subtree(dir, id).await?;

        let requested = size_to_bytes(size)?;
        let dev = mountinfo::device_id(dir)?;
        {
            let state = self.state.lock().await;
            if let Some(&capacity) = state.dev_limits.get(&dev)
                && requested > capacity
            {
                return Err(VolumeError::CapacityExceeded {
                    requested,
                    capacity,
                });
            }
        }

        let limit_kb = size_to_kb(size)?;
        exec::run(
            "setquota",
            &[
                "-P",
                &id.to_string(),
                "0",
                &limit_kb.to_string(),
                "0",
                "0",
                &mount_point,
            ],
            self.timeout,
        )
        .await?;
        info!(id, size, %mount_point, "project quota set");
        Ok(())
    }

    async fn check_mountpoint(&self, dev_id: u64) -> (String, bool, String) {
        let Ok(entries) = load_mount_table() else {
            return (String::new(), false, String::new());
        };
        match find_mount_for_device(&entries, dev_id) {
            Some(entry) => (
                entry.mount_point.clone(),
                entry.has_quota_option(MOUNT_OPTION),
                entry.fs_type.clone(),
            ),
            None => (String::new(), false, String::new()),
        }
    }

    /// Read the project ID via `lsattr -p` on the parent directory and pick
    /// out the line for `dir`.  Output shape per entry:
    /// `<project-id> --------------P <path>`.
    async fn get_file_attr(&self, dir: &Path) -> u32 {
        let Some(parent) = dir.parent().and_then(Path::to_str) else {
            return 0;
        };
        let Some(name) = dir.file_name() else {
            return 0;
        };
        let out = match exec::run("lsattr", &["-p", parent], self.timeout).await {
            Ok(out) => out,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "no project attribute");
                return 0;
            }
        };
        for line in out.lines() {
            let mut fields = line.split_whitespace();
            let (Some(id_field), Some(_flags), Some(path_field)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            if Path::new(path_field).file_name() == Some(name) {
                return id_field.parse().unwrap_or(0);
            }
        }
        0
    }

    async fn set_file_attr(&self, dir: &Path, id: u32) -> Result<(), VolumeError> {
        let dir_str = dir
            .to_str()
            .ok_or_else(|| VolumeError::Backend(format!("non-UTF8 path {}", dir.display())))?;
        exec::run(
            "chattr",
            &["-p", &id.to_string(), "+P", dir_str],
            self.timeout,
        )
        .await?;
        Ok(())
    }

    async fn get_next_quota_id(&self) -> Result<u32, VolumeError> {
        let mut state = self.state.lock().await;
        if !state.loaded() {
            let report = exec::run("repquota", &["-Pan"], self.timeout).await?;
            state.seed_from_report(&report);
        }
        state.next_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_device_yields_empty_mountpoint() {
        let driver = PrjQuotaDriver::new(None);
        let (mp, has_opt, fs) = driver.check_mountpoint(u64::MAX).await;
        assert!(mp.is_empty());
        assert!(!has_opt);
        assert!(fs.is_empty());
    }

    #[tokio::test]
    async fn capacity_check_rejects_oversized_request() {
        let driver = PrjQuotaDriver::new(None);
        {
            let mut state = driver.state.lock().await;
            state.dev_limits.insert(7, 1 << 30);
        }
        // Exercise the comparison directly: the guard sits between size
        // parsing and the setquota invocation.
        let requested = size_to_bytes("10G").unwrap();
        let state = driver.state.lock().await;
        let capacity = *state.dev_limits.get(&7).unwrap();
        assert!(requested > capacity);
    }
}
