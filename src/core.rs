//! Volume lifecycle orchestrator.
//!
//! [`Core`] composes the driver registry, the metadata store, and an
//! optional central control server into the volume state machine:
//! create → attach → detach → remove.  Volume resolution is always
//! local-first with remote fallback; create failures during formatting
//! roll back through the full remove path so a half-initialized volume is
//! never left registered.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::central::CentralClient;
use crate::driver::{Driver, DriverRegistry, Registration};
use crate::error::VolumeError;
use crate::meta::MetaStore;
use crate::types::{Volume, VolumeContext};

/// The volume lifecycle orchestrator.
pub struct Core {
    registry: Arc<DriverRegistry>,
    store: MetaStore,
    central: Option<Arc<dyn CentralClient>>,
}

impl Core {
    /// Assemble a core from its collaborators.  `central` is `None` when
    /// control-server integration is disabled; remote-mode drivers then
    /// fail their lifecycle operations instead of silently degrading.
    pub fn new(
        registry: Arc<DriverRegistry>,
        store: MetaStore,
        central: Option<Arc<dyn CentralClient>>,
    ) -> Self {
        Self {
            registry,
            store,
            central,
        }
    }

    /// The cached registration for a driver name: capability flags and the
    /// store mode were validated and probed once at registration, so
    /// lifecycle code reads them from here instead of re-asking the driver.
    fn driver(&self, name: &str) -> Result<Registration, VolumeError> {
        self.registry
            .lookup(name)
            .ok_or_else(|| VolumeError::DriverNotFound(name.to_owned()))
    }

    fn central(&self) -> Result<&Arc<dyn CentralClient>, VolumeError> {
        self.central.as_ref().ok_or_else(|| {
            VolumeError::Backend("central control server not configured".into())
        })
    }

    /// Resolve a volume: local metadata first, then — if centralized
    /// control is enabled — the remote control server.  A remote miss is
    /// translated into the same [`VolumeError::VolumeNotFound`] as a local
    /// miss, so callers cannot tell the storage tier from the error.
    pub async fn get_volume(&self, name: &str) -> Result<Volume, VolumeError> {
        match self.store.get::<Volume>(name) {
            Ok(volume) => Ok(volume),
            Err(e) if e.is_object_not_found() => match &self.central {
                Some(central) => central.get_volume(name).await,
                None => Err(VolumeError::VolumeNotFound(name.to_owned())),
            },
            Err(e) => Err(e),
        }
    }

    /// Create a volume from `ctx`.
    ///
    /// Declared option defaults are merged in before the driver sees the
    /// volume; the driver's reported mount path must be absolute.  If the
    /// driver implements formatting and the format fails, the volume is
    /// removed through the full [`Core::remove_volume`] path before the
    /// format error is propagated.
    #[instrument(skip(self, ctx), fields(volume = %ctx.name, driver = %ctx.driver))]
    pub async fn create_volume(&self, ctx: VolumeContext) -> Result<Volume, VolumeError> {
        if ctx.name.is_empty() {
            return Err(VolumeError::InvalidArgument(
                "volume name must not be empty".into(),
            ));
        }

        match self.get_volume(&ctx.name).await {
            Ok(_) => return Err(VolumeError::VolumeExists(ctx.name)),
            Err(e) if e.is_volume_not_found() => {}
            Err(e) => return Err(e),
        }

        let reg = self.driver(&ctx.driver)?;
        let mode = reg.mode;

        // Fill in declared defaults for options the caller did not supply.
        let mut ctx = ctx;
        if let Some(options) = reg.driver.options() {
            for (name, desc) in options {
                if !desc.default.is_empty() {
                    ctx.options.entry(name).or_insert(desc.default);
                }
            }
        }

        let mut volume = Volume::new(&ctx);

        // The driver commits to a mount location before any side effects.
        let mount_path = reg.driver.path(&volume).await?;
        if !mount_path.starts_with('/') {
            return Err(VolumeError::InvalidMountPath(mount_path));
        }
        volume.status.mount_point = mount_path;

        // Remote-storage drivers register the definition centrally before
        // any local side effects.
        if !mode.is_local() {
            self.central()?.create_volume(&volume).await?;
        }

        if !mode.central_create_delete() {
            reg.driver.create(&mut volume).await?;
            self.store.put(&volume)?;
        }

        if reg.caps.formator
            && let Some(formator) = reg.driver.formator()
            && let Err(format_err) = formator.format(&volume).await
        {
            warn!(volume = %volume.name, error = %format_err, "format failed, rolling back");
            if let Err(rollback_err) = self.remove_volume(&volume.name).await {
                return Err(VolumeError::Backend(format!(
                    "format failed: {format_err}; rollback failed: {rollback_err}"
                )));
            }
            return Err(format_err);
        }

        info!(volume = %volume.name, "volume created");
        Ok(volume)
    }

    /// Attach a volume, merging `extra` options (last-write-wins per key)
    /// and persisting whatever the driver mutated.
    #[instrument(skip(self, extra), fields(volume = %name))]
    pub async fn attach_volume(
        &self,
        name: &str,
        extra: &HashMap<String, String>,
    ) -> Result<Volume, VolumeError> {
        let mut volume = self.get_volume(name).await?;
        let reg = self.driver(&volume.spec.backend)?;

        for (key, value) in extra {
            volume.set_option(key.clone(), value.clone());
        }

        if reg.caps.attach_detach
            && let Some(attacher) = reg.driver.attach_detach()
        {
            // Remote-storage drivers refresh their descriptor first: the
            // local copy may lag behind the backend's actual state.
            if !reg.mode.is_local()
                && reg.caps.getter
                && let Some(getter) = reg.driver.getter()
            {
                let remote = getter.get(name).await?;
                volume.status = remote.status;
            }
            attacher.attach(&mut volume).await?;
        }

        volume.add_condition("Attached", "attach request processed");
        volume.touch();
        self.persist(&reg, &volume).await?;
        info!(volume = %name, "volume attached");
        Ok(volume)
    }

    /// Detach a volume.  The core does not track references itself; it
    /// persists whatever the driver decided (drivers use the attach-ID
    /// option convention to pick the last detach).
    #[instrument(skip(self, extra), fields(volume = %name))]
    pub async fn detach_volume(
        &self,
        name: &str,
        extra: &HashMap<String, String>,
    ) -> Result<Volume, VolumeError> {
        let mut volume = self.get_volume(name).await?;
        let reg = self.driver(&volume.spec.backend)?;

        for (key, value) in extra {
            volume.set_option(key.clone(), value.clone());
        }

        if reg.caps.attach_detach
            && let Some(attacher) = reg.driver.attach_detach()
        {
            attacher.detach(&mut volume).await?;
        }

        volume.add_condition("Detached", "detach request processed");
        volume.touch();
        self.persist(&reg, &volume).await?;
        info!(volume = %name, "volume detached");
        Ok(volume)
    }

    /// Remove a volume: metadata (local or central) goes first, then the
    /// driver's storage — unless lifecycle is centrally owned, in which
    /// case the central server also owns disk-level cleanup.
    #[instrument(skip(self), fields(volume = %name))]
    pub async fn remove_volume(&self, name: &str) -> Result<(), VolumeError> {
        let volume = self.get_volume(name).await?;
        let reg = self.driver(&volume.spec.backend)?;

        if reg.mode.is_local() {
            self.store.remove(name)?;
        } else {
            self.central()?.delete_volume(name).await?;
        }

        if !reg.mode.central_create_delete() {
            reg.driver.remove(&volume).await?;
        }
        info!(volume = %name, "volume removed");
        Ok(())
    }

    /// The absolute mount path of a volume.
    pub async fn volume_path(&self, name: &str) -> Result<String, VolumeError> {
        let (volume, driver) = self.get_volume_driver(name).await?;
        let path = driver.path(&volume).await?;
        if !path.starts_with('/') {
            return Err(VolumeError::InvalidMountPath(path));
        }
        Ok(path)
    }

    /// Resolve a volume together with its driver, keeping "driver not
    /// found" distinct from "volume not found".
    pub async fn get_volume_driver(
        &self,
        name: &str,
    ) -> Result<(Volume, Arc<dyn Driver>), VolumeError> {
        let volume = self.get_volume(name).await?;
        let reg = self.driver(&volume.spec.backend)?;
        Ok((volume, reg.driver))
    }

    /// All volumes: local metadata plus driver-native enumeration for
    /// remote drivers that do not mirror into local metadata.
    pub async fn list_volumes(&self) -> Result<Vec<Volume>, VolumeError> {
        let mut volumes: Vec<Volume> = self.store.list()?;
        let mut seen: HashSet<String> = volumes.iter().map(|v| v.name.clone()).collect();
        let mut visited_drivers = HashSet::new();

        for reg in self.registry.registrations() {
            if !visited_drivers.insert(reg.driver.name().to_owned()) {
                continue;
            }
            if reg.mode.is_local() || !reg.caps.lister {
                continue;
            }
            let Some(lister) = reg.driver.lister() else {
                continue;
            };
            for volume in lister.list().await? {
                if seen.insert(volume.name.clone()) {
                    volumes.push(volume);
                }
            }
        }
        Ok(volumes)
    }

    /// Names of volumes whose name starts with `prefix`, from the local
    /// metadata index.
    pub fn volume_names_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.store.keys_with_prefix(prefix)
    }

    async fn persist(&self, reg: &Registration, volume: &Volume) -> Result<(), VolumeError> {
        if reg.mode.is_local() {
            self.store.put(volume)
        } else {
            self.central()?.update_volume(volume).await
        }
    }
}
