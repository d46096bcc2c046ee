//! Driver registry.
//!
//! An explicit registry object constructed at process start and handed to
//! the [`Core`](crate::core::Core) — no process-wide statics, so tests run
//! with independent registries.  Registration validates the driver name,
//! store mode, and declared option surface, and probes capabilities once so
//! later calls never re-assert them.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use super::{Driver, OptionDesc, StoreMode};
use crate::error::VolumeError;

/// Cached capability flags, probed once at registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Driver implements [`AttachDetach`](super::AttachDetach).
    pub attach_detach: bool,
    /// Driver implements [`Formator`](super::Formator).
    pub formator: bool,
    /// Driver implements [`Getter`](super::Getter).
    pub getter: bool,
    /// Driver implements [`Lister`](super::Lister).
    pub lister: bool,
}

/// One registered driver together with its validated store mode and the
/// capabilities probed at registration.  Callers route capability checks
/// through `caps` instead of re-probing the driver's hook methods.
#[derive(Clone)]
pub struct Registration {
    /// The driver implementation.
    pub driver: Arc<dyn Driver>,
    /// Capabilities probed once at registration.
    pub caps: Capabilities,
    /// Store mode recorded at registration.
    pub mode: StoreMode,
}

/// Name → driver table with validation.  Drivers are typically registered
/// once at process initialization; aliases let a second name resolve to an
/// already-registered implementation.
#[derive(Default)]
pub struct DriverRegistry {
    table: DashMap<String, Registration>,
}

/// Driver and alias names must start with an ASCII alphanumeric character.
fn validate_name(name: &str) -> Result<(), VolumeError> {
    if !name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
        return Err(VolumeError::InvalidDriverName {
            name: name.to_owned(),
            reason: "must start with an alphanumeric character".into(),
        });
    }
    Ok(())
}

/// Option names follow the same leading-character rule; descriptions must
/// be non-empty.
fn validate_options(options: &HashMap<String, OptionDesc>) -> Result<(), VolumeError> {
    for (name, desc) in options {
        if !name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
            return Err(VolumeError::InvalidOption {
                name: name.clone(),
                reason: "must start with an alphanumeric character".into(),
            });
        }
        if desc.description.is_empty() {
            return Err(VolumeError::InvalidOption {
                name: name.clone(),
                reason: "description must not be empty".into(),
            });
        }
    }
    Ok(())
}

impl DriverRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a driver under its own name.
    pub fn register(&self, driver: Arc<dyn Driver>) -> Result<(), VolumeError> {
        let name = driver.name().to_owned();
        self.insert(name, driver)
    }

    /// Register an additional name resolving to an already-registered
    /// driver.
    pub fn alias(&self, name: &str, alias: &str) -> Result<(), VolumeError> {
        let driver = self
            .get(name)
            .ok_or_else(|| VolumeError::DriverNotFound(name.to_owned()))?;
        self.insert(alias.to_owned(), driver)
    }

    fn insert(&self, name: String, driver: Arc<dyn Driver>) -> Result<(), VolumeError> {
        validate_name(&name)?;
        if self.table.contains_key(&name) {
            return Err(VolumeError::InvalidDriverName {
                name,
                reason: "already registered".into(),
            });
        }

        let mode = driver.store_mode();
        if !mode.valid() {
            return Err(VolumeError::InvalidStoreMode(mode.bits()));
        }
        if let Some(options) = driver.options() {
            validate_options(&options)?;
        }

        let caps = Capabilities {
            attach_detach: driver.attach_detach().is_some(),
            formator: driver.formator().is_some(),
            getter: driver.getter().is_some(),
            lister: driver.lister().is_some(),
        };
        info!(driver = %name, ?caps, "driver registered");
        self.table
            .insert(name, Registration { driver, caps, mode });
        Ok(())
    }

    /// Look up a driver by name or alias.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.lookup(name).map(|reg| reg.driver)
    }

    /// The full cached registration (driver, capabilities, store mode) for
    /// a name or alias.
    pub fn lookup(&self, name: &str) -> Option<Registration> {
        self.table.get(name).map(|entry| entry.value().clone())
    }

    /// All registrations (aliases included).
    pub fn registrations(&self) -> Vec<Registration> {
        self.table
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// All registered names, aliases included.
    pub fn all_driver_names(&self) -> Vec<String> {
        self.table.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Volume;
    use async_trait::async_trait;

    struct Fake {
        name: &'static str,
        mode: StoreMode,
        options: Option<HashMap<String, OptionDesc>>,
    }

    impl Fake {
        fn local(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                mode: StoreMode::LOCAL | StoreMode::USE_LOCAL_META,
                options: None,
            })
        }
    }

    #[async_trait]
    impl Driver for Fake {
        fn name(&self) -> &str {
            self.name
        }
        fn store_mode(&self) -> StoreMode {
            self.mode
        }
        async fn create(&self, _volume: &mut Volume) -> Result<(), VolumeError> {
            Ok(())
        }
        async fn remove(&self, _volume: &Volume) -> Result<(), VolumeError> {
            Ok(())
        }
        async fn path(&self, volume: &Volume) -> Result<String, VolumeError> {
            Ok(format!("/fake/{}", volume.name))
        }
        fn options(&self) -> Option<HashMap<String, OptionDesc>> {
            self.options.clone()
        }
    }

    #[test]
    fn duplicate_names_rejected() {
        let registry = DriverRegistry::new();
        registry.register(Fake::local("fake")).unwrap();
        let err = registry.register(Fake::local("fake")).unwrap_err();
        assert!(matches!(err, VolumeError::InvalidDriverName { .. }));
    }

    #[test]
    fn invalid_names_rejected() {
        let registry = DriverRegistry::new();
        assert!(registry.register(Fake::local("")).is_err());
        assert!(registry.register(Fake::local("-bad")).is_err());
        assert!(registry.register(Fake::local("0ok")).is_ok());
    }

    #[test]
    fn invalid_store_mode_rejected() {
        let registry = DriverRegistry::new();
        let err = registry
            .register(Arc::new(Fake {
                name: "broken",
                mode: StoreMode::CREATE_DELETE_IN_CENTRAL,
                options: None,
            }))
            .unwrap_err();
        assert!(matches!(err, VolumeError::InvalidStoreMode(_)));
        assert!(registry.get("broken").is_none());
    }

    #[test]
    fn option_validation() {
        let registry = DriverRegistry::new();
        let mut options = HashMap::new();
        options.insert("size".to_owned(), OptionDesc::new("", ""));
        let err = registry
            .register(Arc::new(Fake {
                name: "opty",
                mode: StoreMode::LOCAL,
                options: Some(options),
            }))
            .unwrap_err();
        assert!(matches!(err, VolumeError::InvalidOption { .. }));
    }

    #[test]
    fn alias_resolves_to_original() {
        let registry = DriverRegistry::new();
        registry.register(Fake::local("fake")).unwrap();
        registry.alias("fake", "fake2").unwrap();

        let via_alias = registry.get("fake2").unwrap();
        assert_eq!(via_alias.name(), "fake");

        // Aliasing an unknown driver fails distinctly.
        let err = registry.alias("missing", "m2").unwrap_err();
        assert!(err.is_driver_not_found());

        let mut names = registry.all_driver_names();
        names.sort();
        assert_eq!(names, vec!["fake", "fake2"]);
    }

    #[test]
    fn lookup_exposes_cached_mode_and_caps() {
        let registry = DriverRegistry::new();
        registry.register(Fake::local("fake")).unwrap();

        let reg = registry.lookup("fake").unwrap();
        assert_eq!(reg.caps, Capabilities::default());
        assert_eq!(reg.mode, StoreMode::LOCAL | StoreMode::USE_LOCAL_META);
        assert_eq!(reg.driver.name(), "fake");
        assert!(registry.lookup("missing").is_none());

        let regs = registry.registrations();
        assert_eq!(regs.len(), 1);
    }
}
