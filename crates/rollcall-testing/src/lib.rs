//! Testing infrastructure for rollcall.
//!
//! - `InMemoryEnsemble`: an in-process coordination store with ZooKeeper
//!   semantics (persistent and ephemeral nodes, one-shot watches, sessions)
//!   that delivers every callback on its own dispatcher thread, the way a
//!   real client library does.
//! - Fault injection: disconnects, reconnects, session expiry, transient
//!   operation failures and refused connections.
//!
//! # Usage
//!
//! ```ignore
//! let ensemble = InMemoryEnsemble::new();
//! let mut registry = Registry::new(Arc::new(ensemble.clone()));
//! registry.set_server_type("echo-server", 0, NodeMode::MasterSlave)?;
//! registry.start()?;
//!
//! // Wait for the callback thread, then drain on the "reactor".
//! ensemble.flush();
//! registry.run_pending();
//! ```

mod ensemble;

pub use ensemble::InMemoryEnsemble;
pub use ensemble::InMemorySession;
