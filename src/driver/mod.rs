//! Volume driver framework.
//!
//! A [`Driver`] implements the lifecycle operations for one storage
//! technology.  Its [`StoreMode`] declares where storage and metadata
//! authority live; optional capabilities ([`AttachDetach`], [`Formator`],
//! [`Getter`], [`Lister`]) are exposed through hook methods probed once at
//! registration by the [`DriverRegistry`].

pub mod local;
pub mod registry;
pub mod tmpfs;

pub use registry::{Capabilities, DriverRegistry, Registration};

use std::collections::HashMap;
use std::ops::BitOr;

use async_trait::async_trait;

use crate::error::VolumeError;
use crate::types::Volume;

// ---------------------------------------------------------------------------
// StoreMode
// ---------------------------------------------------------------------------

/// Four-bit flag set describing a driver's storage locality and metadata
/// authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreMode(u8);

impl StoreMode {
    /// Storage lives on this host.
    pub const LOCAL: StoreMode = StoreMode(0b0001);
    /// Storage lives on a remote backend.
    pub const REMOTE: StoreMode = StoreMode(0b0010);
    /// Create/delete are delegated to a central control server.
    pub const CREATE_DELETE_IN_CENTRAL: StoreMode = StoreMode(0b0100);
    /// Volume metadata is kept in the local metadata store.
    pub const USE_LOCAL_META: StoreMode = StoreMode(0b1000);

    /// Raw bit value.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// True if every bit of `other` is set in `self`.
    pub fn contains(self, other: StoreMode) -> bool {
        self.0 & other.0 == other.0
    }

    /// Storage locality is local.
    pub fn is_local(self) -> bool {
        self.contains(Self::LOCAL)
    }

    /// Storage locality is remote.
    pub fn is_remote(self) -> bool {
        self.contains(Self::REMOTE)
    }

    /// Lifecycle is delegated to a central control server.
    pub fn central_create_delete(self) -> bool {
        self.contains(Self::CREATE_DELETE_IN_CENTRAL)
    }

    /// Metadata is kept locally.
    pub fn use_local_meta(self) -> bool {
        self.contains(Self::USE_LOCAL_META)
    }

    /// The store-mode validity table.  Exactly three combinations are
    /// admitted; everything else is rejected.  This table is a byte-exact
    /// contract — do not re-derive it from the flag semantics.
    pub fn valid(self) -> bool {
        self == Self::LOCAL
            || self == Self::LOCAL | Self::USE_LOCAL_META
            || self == Self::REMOTE | Self::CREATE_DELETE_IN_CENTRAL
    }
}

impl BitOr for StoreMode {
    type Output = StoreMode;

    fn bitor(self, rhs: StoreMode) -> StoreMode {
        StoreMode(self.0 | rhs.0)
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Description of one configurable driver option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionDesc {
    /// Default value, filled into a volume's options when the caller did
    /// not supply one.  Empty means no default.
    pub default: String,
    /// Human-readable description; must be non-empty.
    pub description: String,
}

impl OptionDesc {
    /// Convenience constructor.
    pub fn new(default: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            description: description.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Driver contract
// ---------------------------------------------------------------------------

/// Lifecycle operations every volume driver implements.
///
/// A driver receives the core-owned [`Volume`] as a borrow for the duration
/// of one call and must not retain it beyond return.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Registered driver name.
    fn name(&self) -> &str;

    /// Storage locality and metadata authority of this driver.
    fn store_mode(&self) -> StoreMode;

    /// Materialize backing storage for `volume`, mutating it (mount point,
    /// options) as needed.
    async fn create(&self, volume: &mut Volume) -> Result<(), VolumeError>;

    /// Release `volume`'s backing storage.
    async fn remove(&self, volume: &Volume) -> Result<(), VolumeError>;

    /// The absolute path where `volume` is (or will be) mounted.
    async fn path(&self, volume: &Volume) -> Result<String, VolumeError>;

    /// Configurable options this driver understands, or `None` for drivers
    /// with no declared option surface.
    fn options(&self) -> Option<HashMap<String, OptionDesc>> {
        None
    }

    /// Attach/detach capability, if implemented.
    fn attach_detach(&self) -> Option<&dyn AttachDetach> {
        None
    }

    /// Post-create format capability, if implemented.
    fn formator(&self) -> Option<&dyn Formator> {
        None
    }

    /// Driver-native single-volume lookup, for remote backends that do not
    /// mirror into local metadata.
    fn getter(&self) -> Option<&dyn Getter> {
        None
    }

    /// Driver-native enumeration, for remote backends that do not mirror
    /// into local metadata.
    fn lister(&self) -> Option<&dyn Lister> {
        None
    }
}

impl std::fmt::Debug for dyn Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver").field("name", &self.name()).finish()
    }
}

/// Capability: bring a volume's storage online/offline on this host.
#[async_trait]
pub trait AttachDetach: Send + Sync {
    /// Attach `volume` (mount, map, ...), mutating its state.
    async fn attach(&self, volume: &mut Volume) -> Result<(), VolumeError>;
    /// Detach `volume`; drivers use the attach-ID reference convention to
    /// decide whether to actually release resources.
    async fn detach(&self, volume: &mut Volume) -> Result<(), VolumeError>;
}

/// Capability: one-time formatting after a successful create.
#[async_trait]
pub trait Formator: Send + Sync {
    /// Format the freshly created volume.
    async fn format(&self, volume: &Volume) -> Result<(), VolumeError>;
}

/// Capability: driver-native single-volume lookup.
#[async_trait]
pub trait Getter: Send + Sync {
    /// Fetch the driver's view of the named volume.
    async fn get(&self, name: &str) -> Result<Volume, VolumeError>;
}

/// Capability: driver-native volume enumeration.
#[async_trait]
pub trait Lister: Send + Sync {
    /// Enumerate the driver's volumes.
    async fn list(&self) -> Result<Vec<Volume>, VolumeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_mode_validity_table() {
        // Valid rows.
        assert!(StoreMode::LOCAL.valid());
        assert!((StoreMode::LOCAL | StoreMode::USE_LOCAL_META).valid());
        assert!((StoreMode::REMOTE | StoreMode::CREATE_DELETE_IN_CENTRAL).valid());

        // Invalid rows.
        assert!(!StoreMode::CREATE_DELETE_IN_CENTRAL.valid());
        assert!(!(StoreMode::LOCAL | StoreMode::REMOTE).valid());
        assert!(!(StoreMode::REMOTE | StoreMode::USE_LOCAL_META).valid());
        assert!(
            !(StoreMode::LOCAL
                | StoreMode::REMOTE
                | StoreMode::CREATE_DELETE_IN_CENTRAL
                | StoreMode::USE_LOCAL_META)
                .valid()
        );

        // Further rejected combinations.
        assert!(!StoreMode::REMOTE.valid());
        assert!(!(StoreMode::LOCAL | StoreMode::CREATE_DELETE_IN_CENTRAL).valid());
        assert!(!StoreMode::USE_LOCAL_META.valid());
    }

    #[test]
    fn store_mode_predicates() {
        let mode = StoreMode::LOCAL | StoreMode::USE_LOCAL_META;
        assert!(mode.is_local());
        assert!(!mode.is_remote());
        assert!(mode.use_local_meta());
        assert!(!mode.central_create_delete());

        let mode = StoreMode::REMOTE | StoreMode::CREATE_DELETE_IN_CENTRAL;
        assert!(mode.is_remote());
        assert!(mode.central_create_delete());
        assert!(!mode.use_local_meta());
    }
}
