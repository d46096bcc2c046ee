//! Disk-quota engine.
//!
//! Makes a directory subtree obey a byte-size quota on a Linux filesystem
//! using the filesystem's native group- or project-quota facility.  Two
//! interchangeable drivers implement the [`QuotaDriver`] trait:
//!
//! * [`GrpQuotaDriver`](group::GrpQuotaDriver) — group quotas
//!   (`setquota -g`, `repquota -gan`, `system.subtree` xattrs);
//! * [`PrjQuotaDriver`](project::PrjQuotaDriver) — project quotas
//!   (`setquota -P`, `repquota -Pan`, `chattr -p +P`), with per-device
//!   capacity limits measured via `statvfs`.
//!
//! Both share the [`QuotaState`] allocator: quota IDs are `u32`s at or
//! above [`QUOTA_MIN_ID`], seeded lazily from the live `repquota` report so
//! restart never reuses an ID that is still live on disk.

pub mod exec;
pub mod group;
pub mod mountinfo;
pub mod project;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::VolumeError;
use mountinfo::{load_mount_table, overlay_dirs};

/// Smallest quota ID the allocator will ever hand out (2^24).  IDs below
/// this are reserved for the host's own users and groups.
pub const QUOTA_MIN_ID: u32 = 16_777_216;

/// Abstraction over one quota mechanism (group or project).
///
/// All operations block on external command execution, bounded by the
/// driver's configured timeout (zero/none means unbounded).
#[async_trait]
pub trait QuotaDriver: Send + Sync {
    /// Ensure quota accounting is active for the filesystem holding `dir`
    /// and return its mount point.  Idempotent; mount points are cached per
    /// device, including negative results, so repeated calls stay cheap.
    async fn start_quota_driver(&self, dir: &Path) -> Result<String, VolumeError>;

    /// Bind `dir` to a quota ID.  A nonzero `id` is used as given; zero
    /// means "reuse the directory's existing ID, else allocate a fresh one".
    /// Returns the ID actually bound.
    async fn set_subtree(&self, dir: &Path, id: u32) -> Result<u32, VolumeError>;

    /// Enforce a byte-size limit (human-readable string, e.g. `"10G"`) for
    /// `dir`, starting the quota driver and binding a subtree ID as needed.
    async fn set_disk_quota(&self, dir: &Path, size: &str, id: u32) -> Result<(), VolumeError>;

    /// Look up the mount point, quota-option presence, and filesystem type
    /// for a device.  Returns empty values when the device is unknown.
    async fn check_mountpoint(&self, dev_id: u64) -> (String, bool, String);

    /// Read the quota ID bound to `dir`, or 0 when none is set.
    async fn get_file_attr(&self, dir: &Path) -> u32;

    /// Stamp `dir` (or a file) with a quota ID.
    async fn set_file_attr(&self, dir: &Path, id: u32) -> Result<(), VolumeError>;

    /// Allocate a fresh, never-before-issued quota ID.
    async fn get_next_quota_id(&self) -> Result<u32, VolumeError>;
}

/// Which quota mechanism to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    /// Pick project quota when the mount table shows it active anywhere,
    /// group quota otherwise.
    Auto,
    /// Force group quotas.
    Group,
    /// Force project quotas.
    Project,
}

/// Construct a quota driver, selecting the mechanism by kernel capability
/// when `kind` is [`QuotaKind::Auto`].
pub fn new_quota_driver(
    kind: QuotaKind,
    timeout: Option<Duration>,
) -> std::sync::Arc<dyn QuotaDriver> {
    let resolved = match kind {
        QuotaKind::Auto => {
            let prj_active = load_mount_table()
                .map(|entries| entries.iter().any(|e| e.has_quota_option("prjquota")))
                .unwrap_or(false);
            if prj_active {
                QuotaKind::Project
            } else {
                QuotaKind::Group
            }
        }
        other => other,
    };
    info!(?resolved, "selected quota mechanism");
    match resolved {
        QuotaKind::Project => std::sync::Arc::new(project::PrjQuotaDriver::new(timeout)),
        _ => std::sync::Arc::new(group::GrpQuotaDriver::new(timeout)),
    }
}

// ---------------------------------------------------------------------------
// Allocator state
// ---------------------------------------------------------------------------

/// Mutable state shared by a quota-driver instance: issued IDs, the
/// allocation cursor, and per-device caches.  Always accessed under the
/// driver's mutex, so allocations are strictly serialized.
#[derive(Debug, Default)]
pub(crate) struct QuotaState {
    /// Every ID known to be in use (issued here or found in the report).
    ids: HashSet<u32>,
    /// Allocation cursor; the next probe starts just above it.
    last_id: u32,
    /// Whether the ID set has been seeded from the live quota report.
    loaded: bool,
    /// devID → mount path.  Empty string is a cached negative result.
    pub(crate) mount_points: HashMap<u64, String>,
    /// devID → filesystem byte capacity (project quota only).
    pub(crate) dev_limits: HashMap<u64, u64>,
}

impl QuotaState {
    /// Seed the allocated-ID set from `repquota` output.  Lines start with
    /// `#<id>` followed by space-separated usage fields; IDs at or above
    /// [`QUOTA_MIN_ID`] are recorded and the maximum becomes the cursor.
    pub(crate) fn seed_from_report(&mut self, report: &str) {
        for line in report.lines() {
            let Some(rest) = line.trim_start().strip_prefix('#') else {
                continue;
            };
            let Some(id_field) = rest.split_whitespace().next() else {
                continue;
            };
            let Ok(id) = id_field.parse::<u32>() else {
                continue;
            };
            if id >= QUOTA_MIN_ID {
                self.ids.insert(id);
                if id > self.last_id {
                    self.last_id = id;
                }
            }
        }
        self.loaded = true;
    }

    /// True once [`seed_from_report`](Self::seed_from_report) has run.
    pub(crate) fn loaded(&self) -> bool {
        self.loaded
    }

    /// Allocate the next unused ID by probing linearly upward from the
    /// cursor, clamping the cursor to the floor first.
    pub(crate) fn next_id(&mut self) -> Result<u32, VolumeError> {
        if self.last_id < QUOTA_MIN_ID {
            self.last_id = QUOTA_MIN_ID;
        }
        let mut candidate = self.last_id;
        loop {
            candidate = candidate.checked_add(1).ok_or_else(|| {
                VolumeError::Backend("quota ID space exhausted".into())
            })?;
            if !self.ids.contains(&candidate) {
                self.ids.insert(candidate);
                self.last_id = candidate;
                return Ok(candidate);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Size parsing
// ---------------------------------------------------------------------------

/// Parse a human-readable size string ("10G", "512m", "1024") into bytes.
/// Bare numbers are bytes; suffixes are binary multiples.
pub fn size_to_bytes(size: &str) -> Result<u64, VolumeError> {
    let trimmed = size.trim();
    if trimmed.is_empty() {
        return Err(VolumeError::InvalidSize(size.to_owned()));
    }
    let (digits, suffix) = match trimmed.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => trimmed.split_at(pos),
        None => (trimmed, ""),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| VolumeError::InvalidSize(size.to_owned()))?;
    let multiplier: u64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1 << 10,
        "m" | "mb" | "mib" => 1 << 20,
        "g" | "gb" | "gib" => 1 << 30,
        "t" | "tb" | "tib" => 1 << 40,
        _ => return Err(VolumeError::InvalidSize(size.to_owned())),
    };
    value
        .checked_mul(multiplier)
        .ok_or_else(|| VolumeError::InvalidSize(size.to_owned()))
}

/// Convert a size string to whole kilobytes (rounding up), the unit
/// `setquota` expects.
pub fn size_to_kb(size: &str) -> Result<u64, VolumeError> {
    Ok(size_to_bytes(size)?.div_ceil(1024))
}

// ---------------------------------------------------------------------------
// Rootfs quota
// ---------------------------------------------------------------------------

/// Apply a disk quota to a container rootfs mounted as an overlay at
/// `basefs`.
///
/// Locates the overlay's upper and work directories, enforces the quota on
/// the upper directory, then stamps the quota ID onto every file already
/// present in both so data written before the quota existed is still billed
/// against it.  Returns the quota ID in effect.
pub async fn set_rootfs_disk_quota(
    driver: &dyn QuotaDriver,
    basefs: &Path,
    size: &str,
    id: u32,
) -> Result<u32, VolumeError> {
    let entries = load_mount_table()?;
    let dirs = overlay_dirs(&entries, basefs).ok_or_else(|| {
        VolumeError::Backend(format!("no overlay mount at {}", basefs.display()))
    })?;

    driver.start_quota_driver(&dirs.upper).await?;
    let id = driver.set_subtree(&dirs.upper, id).await?;
    driver.set_disk_quota(&dirs.upper, size, id).await?;

    for root in [&dirs.upper, &dirs.work] {
        stamp_tree(driver, root, id).await?;
    }
    info!(id, basefs = %basefs.display(), size, "rootfs disk quota applied");
    Ok(id)
}

/// Recursively stamp every entry under `root` with the quota ID.  Iterative
/// worklist rather than recursion: directory trees can be deep and the
/// driver calls are async.
async fn stamp_tree(
    driver: &dyn QuotaDriver,
    root: &Path,
    id: u32,
) -> Result<(), VolumeError> {
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            driver.set_file_attr(&path, id).await?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                pending.push(path);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_ids_are_distinct_and_floored() {
        let mut state = QuotaState::default();
        state.seed_from_report("");
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let id = state.next_id().unwrap();
            assert!(id >= QUOTA_MIN_ID);
            assert!(seen.insert(id), "duplicate id {id}");
        }
    }

    #[test]
    fn allocator_seeds_from_report() {
        let report = "\
*** Report for group quotas on device /dev/sda1
Block grace time: 7days; Inode grace time: 7days
                        Block limits                File limits
Group           used    soft    hard  grace    used  soft  hard  grace
----------------------------------------------------------------------
#0        --  494472       0       0              5     0     0
#54        --       8       0       0              2     0     0
#16777230  --    1048       0  102400             10     0     0
#16777235  --     512       0   51200              3     0     0
";
        let mut state = QuotaState::default();
        state.seed_from_report(report);
        assert!(state.loaded());
        // First fresh allocation continues just past the maximum seen.
        assert_eq!(state.next_id().unwrap(), 16_777_236);
    }

    #[test]
    fn allocator_skips_issued_ids() {
        let mut state = QuotaState::default();
        state.seed_from_report("#16777217 -- 0 0 0 0 0 0\n");
        state.ids.insert(16_777_218);
        assert_eq!(state.next_id().unwrap(), 16_777_219);
    }

    #[test]
    fn size_parsing() {
        assert_eq!(size_to_bytes("1024").unwrap(), 1024);
        assert_eq!(size_to_bytes("10G").unwrap(), 10 << 30);
        assert_eq!(size_to_bytes("512m").unwrap(), 512 << 20);
        assert_eq!(size_to_bytes("2KiB").unwrap(), 2048);
        assert!(size_to_bytes("").is_err());
        assert!(size_to_bytes("10X").is_err());
        assert!(size_to_bytes("G10").is_err());

        assert_eq!(size_to_kb("1025").unwrap(), 2);
        assert_eq!(size_to_kb("10G").unwrap(), 10 << 20);
    }
}
