//! Volume error types.
//!
//! All errors in the `libvolume` crate are represented by the [`VolumeError`]
//! enum, which derives [`thiserror::Error`].  Callers interrogate errors
//! through typed predicates ([`VolumeError::is_volume_not_found`] and
//! friends) rather than matching on message strings, so the not-found /
//! already-exists distinctions survive every layer boundary.

use std::time::Duration;

use thiserror::Error;

/// Unified error type for volume, quota, and metadata operations.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// The requested volume was not found, locally or centrally.
    #[error("volume {0} not found")]
    VolumeNotFound(String),

    /// A volume with the requested name already exists.
    #[error("volume {0} already exists")]
    VolumeExists(String),

    /// The named driver is not registered.
    #[error("driver {0} not found")]
    DriverNotFound(String),

    /// A metadata object was not found in its bucket.
    #[error("object {0} not found")]
    ObjectNotFound(String),

    /// A driver (or alias) name failed validation or collided with an
    /// existing registration.
    #[error("invalid driver name {name:?}: {reason}")]
    InvalidDriverName {
        /// The offending name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A driver declared a store mode combination outside the validity table.
    #[error("invalid store mode {0:#06b}")]
    InvalidStoreMode(u8),

    /// A driver option failed validation at registration time.
    #[error("invalid option {name:?}: {reason}")]
    InvalidOption {
        /// Option name as declared by the driver.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A driver reported a non-absolute mount path.
    #[error("mount path {0:?} is not absolute")]
    InvalidMountPath(String),

    /// A human-readable size string could not be parsed.
    #[error("invalid size {0:?}")]
    InvalidSize(String),

    /// No `/proc/mounts` entry encloses the directory's device.
    #[error("mount point not found for device {0}")]
    MountPointNotFound(u64),

    /// An external quota tool exited non-zero or produced unusable output.
    #[error("command {command:?} failed: {stderr}")]
    CommandFailed {
        /// The command line that was run.
        command: String,
        /// Captured standard error of the failed invocation.
        stderr: String,
    },

    /// An external command exceeded its deadline and was killed.
    #[error("command {command:?} timed out after {timeout:?}")]
    CommandTimeout {
        /// The command line that was run.
        command: String,
        /// The deadline that expired.
        timeout: Duration,
    },

    /// A project-quota request exceeded the filesystem's measured capacity.
    #[error("requested {requested} bytes exceeds device capacity {capacity}")]
    CapacityExceeded {
        /// Bytes asked for.
        requested: u64,
        /// Total filesystem capacity in bytes.
        capacity: u64,
    },

    /// A metadata backend or control-server failure.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Filesystem I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl VolumeError {
    /// Create a [`VolumeError::Backend`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn backend<E: std::fmt::Display>(e: E) -> Self {
        Self::Backend(e.to_string())
    }

    /// True if this is a missing-volume error.
    pub fn is_volume_not_found(&self) -> bool {
        matches!(self, Self::VolumeNotFound(_))
    }

    /// True if this is a duplicate-volume error.
    pub fn is_volume_exists(&self) -> bool {
        matches!(self, Self::VolumeExists(_))
    }

    /// True if this is a missing-driver error.
    pub fn is_driver_not_found(&self) -> bool {
        matches!(self, Self::DriverNotFound(_))
    }

    /// True if this is a missing-metadata-object error.
    pub fn is_object_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound(_))
    }

    /// True if this error means "the thing you looked up does not exist",
    /// in either the metadata tier or the volume tier.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::VolumeNotFound(_) | Self::ObjectNotFound(_) | Self::DriverNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = VolumeError::VolumeNotFound("vol-123".into());
        assert_eq!(err.to_string(), "volume vol-123 not found");
        assert!(err.is_volume_not_found());
        assert!(err.is_not_found());
        assert!(!err.is_object_not_found());
    }

    #[test]
    fn not_found_predicates_are_disjoint() {
        let err = VolumeError::VolumeExists("v".into());
        assert!(err.is_volume_exists());
        assert!(!err.is_not_found());

        let err = VolumeError::ObjectNotFound("k".into());
        assert!(err.is_object_not_found());
        assert!(!err.is_volume_not_found());
    }
}
