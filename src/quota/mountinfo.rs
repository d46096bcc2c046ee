//! Mount-table discovery for the quota engine.
//!
//! Parses `/proc/mounts` (six space-separated fields per line:
//! `device mountpoint fstype options dump pass`), resolves which mount
//! encloses a given directory by device ID, detects quota mount options,
//! and locates overlay upper/work directories for container rootfs quotas.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::error::VolumeError;

/// One parsed line of `/proc/mounts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Source device.
    pub device: String,
    /// Mount point path.
    pub mount_point: String,
    /// Filesystem type, e.g. `ext4`, `xfs`, `overlay`.
    pub fs_type: String,
    /// Comma-split mount options.
    pub options: Vec<String>,
}

impl MountEntry {
    /// True if the entry carries the given quota mount option, either as a
    /// plain option (`grpquota`, `prjquota`) or as a journaled-quota
    /// suboption (`jqfmt=`, `grpjquota=`, `prjquota=`).
    pub fn has_quota_option(&self, opt: &str) -> bool {
        self.options.iter().any(|o| {
            if o == opt || o.starts_with(&format!("{opt}=")) {
                return true;
            }
            // Journaled quota shows up as jqfmt= plus a per-kind quota file.
            match opt {
                "grpquota" => o.starts_with("jqfmt=") || o.starts_with("grpjquota="),
                _ => false,
            }
        })
    }

    /// Value of a `key=value` option, if present.
    pub fn option_value(&self, key: &str) -> Option<&str> {
        let prefix = format!("{key}=");
        self.options
            .iter()
            .find_map(|o| o.strip_prefix(prefix.as_str()))
    }
}

/// Parse mount-table text.  Lines without exactly six fields are skipped.
pub fn parse_mount_table(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(' ').collect();
            if fields.len() != 6 {
                return None;
            }
            Some(MountEntry {
                device: fields[0].to_owned(),
                mount_point: fields[1].to_owned(),
                fs_type: fields[2].to_owned(),
                options: fields[3].split(',').map(str::to_owned).collect(),
            })
        })
        .collect()
}

/// Read and parse the live mount table.
pub fn load_mount_table() -> Result<Vec<MountEntry>, VolumeError> {
    let contents = std::fs::read_to_string("/proc/mounts")?;
    Ok(parse_mount_table(&contents))
}

/// Device ID of the filesystem holding `path`.
pub fn device_id(path: &Path) -> Result<u64, VolumeError> {
    Ok(std::fs::metadata(path)?.dev())
}

/// Find the mount entry whose mount point lives on `dev_id`.
///
/// Each candidate mount point is `stat`ed and compared by device; entries
/// that cannot be stated (stale or restricted mounts) are skipped.
pub fn find_mount_for_device(entries: &[MountEntry], dev_id: u64) -> Option<&MountEntry> {
    entries.iter().find(|entry| {
        std::fs::metadata(&entry.mount_point)
            .map(|m| m.dev() == dev_id)
            .unwrap_or(false)
    })
}

// ---------------------------------------------------------------------------
// Overlay filesystems
// ---------------------------------------------------------------------------

/// Upper/work/lower directories of an overlay mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayDirs {
    /// Writable upper layer — where new container data lands.
    pub upper: PathBuf,
    /// Overlay work directory.
    pub work: PathBuf,
    /// Read-only lower layers.
    pub lower: Vec<PathBuf>,
}

/// Locate the overlay mount at `basefs` and extract its layer directories
/// from the `lowerdir=`/`upperdir=`/`workdir=` options.
pub fn overlay_dirs(entries: &[MountEntry], basefs: &Path) -> Option<OverlayDirs> {
    let basefs = basefs.to_str()?;
    let entry = entries
        .iter()
        .find(|e| e.fs_type == "overlay" && e.mount_point == basefs)?;
    let upper = entry.option_value("upperdir")?;
    let work = entry.option_value("workdir")?;
    let lower = entry
        .option_value("lowerdir")
        .map(|raw| raw.split(':').map(PathBuf::from).collect())
        .unwrap_or_default();
    Some(OverlayDirs {
        upper: PathBuf::from(upper),
        work: PathBuf::from(work),
        lower,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
/dev/sda1 / ext4 rw,relatime,grpquota 0 0
tmpfs /tmp tmpfs rw,nosuid,nodev 0 0
/dev/sdb1 /data xfs rw,relatime,prjquota 0 0
overlay /run/containers/c1/rootfs overlay rw,lowerdir=/l1:/l2,upperdir=/up,workdir=/work 0 0
broken line with wrong field count 0
";

    #[test]
    fn parses_six_field_lines_only() {
        let entries = parse_mount_table(TABLE);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].device, "/dev/sda1");
        assert_eq!(entries[0].mount_point, "/");
        assert_eq!(entries[0].fs_type, "ext4");
        assert!(entries[0].options.contains(&"grpquota".to_owned()));
    }

    #[test]
    fn quota_option_detection() {
        let entries = parse_mount_table(TABLE);
        assert!(entries[0].has_quota_option("grpquota"));
        assert!(!entries[0].has_quota_option("prjquota"));
        assert!(entries[2].has_quota_option("prjquota"));
        assert!(!entries[1].has_quota_option("grpquota"));

        // Journaled-quota suboptions also count.
        let jq = parse_mount_table(
            "/dev/sda2 /var ext4 rw,jqfmt=vfsv1,grpjquota=aquota.group 0 0\n",
        );
        assert!(jq[0].has_quota_option("grpquota"));
    }

    #[test]
    fn overlay_option_parsing() {
        let entries = parse_mount_table(TABLE);
        let dirs = overlay_dirs(&entries, Path::new("/run/containers/c1/rootfs")).unwrap();
        assert_eq!(dirs.upper, PathBuf::from("/up"));
        assert_eq!(dirs.work, PathBuf::from("/work"));
        assert_eq!(dirs.lower, vec![PathBuf::from("/l1"), PathBuf::from("/l2")]);

        assert!(overlay_dirs(&entries, Path::new("/nope")).is_none());
    }

    #[test]
    fn device_id_of_root() {
        // "/" always exists; the exact ID is irrelevant here.
        device_id(Path::new("/")).unwrap();
    }
}
