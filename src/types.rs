//! Core volume data model.
//!
//! [`VolumeContext`] is the identity tuple a caller supplies to create a
//! volume; [`Volume`] is the persistent entity the core owns.  Both are
//! [`Serialize`]/[`Deserialize`] so volumes can be stored as JSON in the
//! metadata store and shipped to a central control server unchanged.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

/// Option key recording whether the volume is currently mounted.
const OPT_MOUNTED: &str = "mounted";

/// Option key recording outstanding attach-request IDs (comma-separated).
/// Drivers use this as a reference count to decide when a detach should
/// actually release the underlying resources.
const OPT_ATTACH_IDS: &str = "attach-ids";

/// Option key for the requested volume size (e.g. `"10G"`).
pub const OPT_SIZE: &str = "size";

/// Option key for the requested filesystem type.
pub const OPT_FILESYSTEM: &str = "filesystem";

/// Maximum number of retained [`Condition`] entries per volume.
const MAX_CONDITIONS: usize = 8;

/// Namespace assigned when the creating context does not name one.
const DEFAULT_NAMESPACE: &str = "default";

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_owned()
}

/// Contract for objects the metadata store can persist: every stored object
/// is JSON-serializable and exposes a unique key within its bucket.
pub trait MetaObject: Serialize + DeserializeOwned + Send + Sync {
    /// The unique key under which this object is stored.
    fn key(&self) -> String;
}

// ---------------------------------------------------------------------------
// VolumeContext
// ---------------------------------------------------------------------------

/// Identity tuple for a volume request: `{name, driver, options, labels}`.
///
/// Immutable once a [`Volume`] has been created from it.  `name` is the
/// unique key; `driver` selects the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeContext {
    /// Unique volume name.
    pub name: String,
    /// Name of the registered driver backing this volume.
    pub driver: String,
    /// Free-form driver options (size, filesystem, QoS knobs, ...).
    #[serde(default)]
    pub options: HashMap<String, String>,
    /// User labels, not interpreted by the core.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl VolumeContext {
    /// Create a context with no options or labels.
    pub fn new(name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: driver.into(),
            options: HashMap::new(),
            labels: HashMap::new(),
        }
    }

    /// Builder-style option insertion.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Volume
// ---------------------------------------------------------------------------

/// Driver-facing part of a volume: which backend owns it plus the free-form
/// `extra` option map holding all driver-specific and common options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Name of the driver backing this volume.
    pub backend: String,
    /// Driver-specific and common options (size, filesystem, ...).
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// Lifecycle phase of a volume.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum VolumePhase {
    /// Created but not yet materialized by a driver.
    #[default]
    Pending,
    /// Materialized and usable.
    Available,
    /// A lifecycle operation failed; see conditions.
    Failed,
    /// State cannot be determined.
    Unknown,
}

/// A timestamped record of a lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Condition {
    /// Short machine-readable reason, e.g. `"Created"`.
    pub reason: String,
    /// Human-readable message.
    pub message: String,
    /// When the transition happened.
    pub last_update: DateTime<Utc>,
}

/// Observed state of a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeStatus {
    /// Absolute path where the volume is (or will be) mounted.
    pub mount_point: String,
    /// Current lifecycle phase.
    pub phase: VolumePhase,
    /// Bounded history of lifecycle transitions.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// The persistent volume entity.
///
/// The [`Core`](crate::core::Core) exclusively owns the canonical copy; a
/// driver receives a mutable borrow for the duration of one call and must
/// not retain it beyond return.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// Unique volume name (the metadata key).
    pub name: String,
    /// Immutable unique ID assigned at creation.
    pub uid: String,
    /// Namespace the volume belongs to.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// User labels copied from the creating context.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub modified_at: DateTime<Utc>,
    /// Monotonic revision counter, bumped on every modification.
    #[serde(default)]
    pub generation: u64,
    /// Driver-facing spec.
    pub spec: VolumeSpec,
    /// Observed status.
    pub status: VolumeStatus,
}

impl Volume {
    /// Build a fresh `Pending` volume from a creation context.
    pub fn new(ctx: &VolumeContext) -> Self {
        let now = Utc::now();
        Self {
            name: ctx.name.clone(),
            uid: uuid::Uuid::new_v4().to_string(),
            namespace: default_namespace(),
            labels: ctx.labels.clone(),
            created_at: now,
            modified_at: now,
            generation: 0,
            spec: VolumeSpec {
                backend: ctx.driver.clone(),
                extra: ctx.options.clone(),
            },
            status: VolumeStatus::default(),
        }
    }

    /// Look up an option by key.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.spec.extra.get(key).map(String::as_str)
    }

    /// Set an option, replacing any previous value.
    pub fn set_option(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.spec.extra.insert(key.into(), value.into());
    }

    /// The requested size string, if any.
    pub fn size(&self) -> Option<&str> {
        self.option(OPT_SIZE)
    }

    /// The requested filesystem, defaulting to ext4.
    pub fn filesystem(&self) -> &str {
        self.option(OPT_FILESYSTEM).unwrap_or("ext4")
    }

    /// Whether the volume is currently marked mounted.
    pub fn is_mounted(&self) -> bool {
        self.option(OPT_MOUNTED) == Some("true")
    }

    /// Toggle the mounted flag and the lifecycle phase.
    pub fn set_mounted(&mut self, mounted: bool) {
        self.set_option(OPT_MOUNTED, if mounted { "true" } else { "false" });
        self.status.phase = if mounted {
            VolumePhase::Available
        } else {
            VolumePhase::Pending
        };
    }

    /// Record an attach request.  Returns the number of outstanding requests.
    pub fn add_attach_id(&mut self, id: &str) -> usize {
        let mut ids = self.attach_ids();
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_owned());
        }
        let count = ids.len();
        self.set_option(OPT_ATTACH_IDS, ids.join(","));
        count
    }

    /// Drop an attach request.  Returns the number still outstanding.
    pub fn remove_attach_id(&mut self, id: &str) -> usize {
        let mut ids = self.attach_ids();
        ids.retain(|existing| existing != id);
        let count = ids.len();
        self.set_option(OPT_ATTACH_IDS, ids.join(","));
        count
    }

    /// Outstanding attach-request IDs.
    pub fn attach_ids(&self) -> Vec<String> {
        self.option(OPT_ATTACH_IDS)
            .map(|raw| {
                raw.split(',')
                    .filter(|part| !part.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Append a lifecycle condition, discarding the oldest beyond the cap.
    pub fn add_condition(&mut self, reason: impl Into<String>, message: impl Into<String>) {
        self.status.conditions.push(Condition {
            reason: reason.into(),
            message: message.into(),
            last_update: Utc::now(),
        });
        if self.status.conditions.len() > MAX_CONDITIONS {
            self.status.conditions.remove(0);
        }
    }

    /// Bump the generation and modification timestamp.
    pub fn touch(&mut self) {
        self.generation += 1;
        self.modified_at = Utc::now();
    }
}

impl MetaObject for Volume {
    fn key(&self) -> String {
        self.name.clone()
    }
}
