//! Rollcall: service identity, master/slave election and live discovery for
//! processes sharing a ZooKeeper-class coordination store.
//!
//! This crate re-exports the workspace:
//!
//! - [`core`]: store abstraction, paths, ids and limits
//! - [`registry`]: the [`Registry`] and its election and discovery engines
//! - [`testing`]: the in-memory ensemble used by tests and `rollcall-sim`

pub use rollcall_core as core;
pub use rollcall_registry as registry;
pub use rollcall_registry::NodeMode;
pub use rollcall_registry::NodeState;
pub use rollcall_registry::Registry;
pub use rollcall_registry::RegistryConfig;
pub use rollcall_registry::RegistryError;
pub use rollcall_registry::ServerId;
pub use rollcall_registry::ServerType;
pub use rollcall_registry::WatchSelector;
pub use rollcall_registry::Zone;
pub use rollcall_testing as testing;
