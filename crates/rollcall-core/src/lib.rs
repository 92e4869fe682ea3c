//! Core types for rollcall.
//!
//! This crate holds everything the registry and the store implementations
//! agree on, without any I/O of its own:
//!
//! - [`types`]: server types, zones, server ids, node modes and states
//! - [`paths`]: the `/servers` and `/master` layout shared with peers
//! - [`store`]: the ZooKeeper-class coordination store traits
//! - [`error`]: store and identity errors
//! - [`constants`]: Tiger Style bounds and defaults

pub mod constants;
pub mod error;
pub mod paths;
pub mod store;
pub mod types;

pub use error::IdentityError;
pub use error::StoreError;
pub use store::CoordinationStore;
pub use store::CreateMode;
pub use store::EventType;
pub use store::SessionState;
pub use store::StoreConnector;
pub use store::WatchedEvent;
pub use store::Watcher;
pub use store::ensure_persistent_path;
pub use types::NodeMode;
pub use types::NodeState;
pub use types::ServerId;
pub use types::ServerType;
pub use types::WatchSelector;
pub use types::Zone;
