//! Registry engine: identity, election and discovery over a coordination store.
//!
//! A [`Registry`] gives one process a unique [`ServerId`], contests the
//! leader marker of its (type, zone) and reports live instances of the
//! server types it watches.
//!
//! # Threading
//!
//! Store callbacks fire on the store client's own thread. They never touch
//! registry state: a [`BridgeWatcher`](watcher) only posts a task into the
//! [`EventBridge`], and every election or discovery transition runs when the
//! owning thread drains it with [`Registry::run_pending`] or
//! [`Registry::run`].
//!
//! # Modules
//!
//! - [`bridge`]: cross-thread task handoff into the reactor
//! - [`identity`]: `type:zone:uuid` server ids
//! - [`election`]: leader marker contest
//! - [`discovery`]: watch chains and add/remove diffing
//! - [`pure`]: deterministic state-transition functions
//! - [`config`]: layered TOML/env configuration
//!
//! # Example
//!
//! ```ignore
//! let mut registry = Registry::new(connector);
//! registry.init("10.0.0.1:2181")?;
//! registry.set_server_type("echo-server", 0, NodeMode::MasterSlave)?;
//! registry.add_watch_type("cache-server")?;
//! registry.set_add_server_handler(|server_type, zone, id, info| {
//!     println!("{server_type}/{zone}: {id} at {info}");
//! });
//! registry.start()?;
//! registry.run(cancel).await;
//! ```

pub mod bridge;
pub mod config;
pub mod discovery;
pub mod election;
pub mod error;
pub mod identity;
pub mod pure;
mod registry;
pub mod watcher;

pub use bridge::EventBridge;
pub use bridge::PendingTask;
pub use config::ConfigError;
pub use config::NodeConfig;
pub use config::RegistryConfig;
pub use config::WatchConfig;
pub use discovery::DiscoveryEngine;
pub use discovery::DiscoveryEvent;
pub use election::ElectionEngine;
pub use election::ElectionMode;
pub use error::RegistryError;
pub use identity::NodeIdentity;
pub use registry::AddServerHandler;
pub use registry::DelServerHandler;
pub use registry::Lifecycle;
pub use registry::NodeStateChangeHandler;
pub use registry::Registry;
pub use registry::ServerInfoHandler;
pub use rollcall_core::NodeMode;
pub use rollcall_core::NodeState;
pub use rollcall_core::ServerId;
pub use rollcall_core::ServerType;
pub use rollcall_core::WatchSelector;
pub use rollcall_core::Zone;
pub use watcher::WatchFactory;
pub use watcher::WatchTarget;
