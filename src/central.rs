//! Central control-server client boundary.
//!
//! Drivers whose [`StoreMode`](crate::driver::StoreMode) is not
//! local-metadata-authoritative delegate volume records (and, for
//! centrally-created modes, the lifecycle itself) to a central control
//! server.  This crate specifies only the interface; a concrete client
//! adapts it to the server's REST wire protocol and must map any
//! 404-class response to [`VolumeError::VolumeNotFound`] so callers cannot
//! distinguish the storage tier from the error alone.

use async_trait::async_trait;

use crate::error::VolumeError;
use crate::types::Volume;

/// Operations the [`Core`](crate::core::Core) invokes on the central
/// control server.
#[async_trait]
pub trait CentralClient: Send + Sync {
    /// Register a new volume definition.
    async fn create_volume(&self, volume: &Volume) -> Result<(), VolumeError>;

    /// Replace the stored definition of an existing volume.
    async fn update_volume(&self, volume: &Volume) -> Result<(), VolumeError>;

    /// Fetch a volume by name.  A missing volume is
    /// [`VolumeError::VolumeNotFound`], never a transport error.
    async fn get_volume(&self, name: &str) -> Result<Volume, VolumeError>;

    /// Delete a volume record (and, for centrally-created modes, its
    /// backing storage).
    async fn delete_volume(&self, name: &str) -> Result<(), VolumeError>;

    /// All volume names known to the server.
    async fn list_keys(&self) -> Result<Vec<String>, VolumeError>;
}
