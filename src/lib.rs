//! # libvolume — volume management core for RK8s-style container engines
//!
//! `libvolume` implements named storage volumes backed by pluggable drivers
//! (local directories, tmpfs, remote backends), per-volume disk-space quotas
//! on Linux filesystems, and durable volume metadata with prefix search.  It
//! follows the RK8s architecture conventions (Tokio async runtime, `tracing`
//! for observability, `thiserror` for structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `Volume`, `VolumeContext`, spec and status. |
//! | [`error`] | [`VolumeError`] enum covering all failure modes. |
//! | [`quota`] | Disk-quota engine: group/project quota drivers, ID allocator. |
//! | [`meta`] | Metadata store: pluggable backends plus a prefix-trie index. |
//! | [`driver`] | Driver contract, `StoreMode`, registry, concrete drivers. |
//! | [`central`] | Client trait for an optional central control server. |
//! | [`core`] | [`Core`] orchestrator — the volume lifecycle state machine. |

pub mod central;
pub mod core;
pub mod driver;
pub mod error;
pub mod meta;
pub mod quota;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use central::CentralClient;
pub use crate::core::Core;
pub use driver::{Driver, DriverRegistry, StoreMode};
pub use error::VolumeError;
pub use meta::MetaStore;
pub use quota::QuotaDriver;
pub use types::{Volume, VolumeContext};
