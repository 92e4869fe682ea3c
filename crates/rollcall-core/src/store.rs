//! Coordination store interface.
//!
//! Models a ZooKeeper-class store: a hierarchy of persistent and ephemeral
//! nodes with atomic create-if-absent and one-shot watches. Implementations
//! deliver watch and session callbacks on their own internal thread, so a
//! [`Watcher`] must never block and must never touch reactor-owned state
//! directly.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreError;

/// Lifetime of a created node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateMode {
    /// Lives until explicitly deleted.
    Persistent,
    /// Removed automatically when the creating session ends.
    Ephemeral,
}

/// What a watch notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A watched path was created.
    NodeCreated,
    /// A watched path was deleted.
    NodeDeleted,
    /// The payload of a watched path changed.
    NodeDataChanged,
    /// The child set of a watched path changed.
    NodeChildrenChanged,
    /// Connection state change, delivered to the session watcher.
    Session,
}

/// Connection state of a store session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Connected (or reconnected) with the session intact.
    Connected,
    /// Connection lost; the session may still be alive on the server.
    Disconnected,
    /// The session is gone, and with it every ephemeral node it owned.
    Expired,
    /// Closed by its owner.
    Closed,
}

/// A single watch or session notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    /// Kind of change.
    pub event_type: EventType,
    /// Session state at delivery time.
    pub session_state: SessionState,
    /// Affected path (`None` for session events).
    pub path: Option<String>,
}

impl WatchedEvent {
    /// A node event on `path`.
    pub fn node(event_type: EventType, path: impl Into<String>) -> Self {
        Self {
            event_type,
            session_state: SessionState::Connected,
            path: Some(path.into()),
        }
    }

    /// A session state event.
    pub fn session(state: SessionState) -> Self {
        Self {
            event_type: EventType::Session,
            session_state: state,
            path: None,
        }
    }
}

/// Receiver of one-shot watch notifications.
///
/// Invoked on the store client's callback thread.
pub trait Watcher: Send + Sync {
    /// Handle one notification.
    fn process(&self, event: WatchedEvent);
}

impl<F> Watcher for F
where F: Fn(WatchedEvent) + Send + Sync
{
    fn process(&self, event: WatchedEvent) {
        self(event)
    }
}

/// A live session with the coordination store.
///
/// All calls are synchronous round trips. Watches are one-shot: each
/// delivery consumes the registration, and the receiver must re-arm.
pub trait CoordinationStore: Send + Sync {
    /// Create `path` with `data`. Fails with `NodeExists` if present and
    /// `NoNode` if the parent is missing. Returns the created path.
    fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String, StoreError>;

    /// Read the payload of `path`. The watch is only installed when the node
    /// exists, and fires once on data change or deletion.
    fn get_data(&self, path: &str, watcher: Option<Arc<dyn Watcher>>) -> Result<Vec<u8>, StoreError>;

    /// Check whether `path` exists. The watch is installed either way and
    /// fires once on creation, deletion or data change.
    fn exists(&self, path: &str, watcher: Option<Arc<dyn Watcher>>) -> Result<bool, StoreError>;

    /// List the child names of `path`. The watch fires once when the child
    /// set changes or the node is deleted.
    fn get_children(&self, path: &str, watcher: Option<Arc<dyn Watcher>>) -> Result<Vec<String>, StoreError>;

    /// Server-assigned session identifier.
    fn session_id(&self) -> u64;

    /// End the session. Ephemeral nodes are removed and outstanding watches
    /// of this session never fire.
    fn close(&self);
}

impl fmt::Debug for dyn CoordinationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinationStore").field("session_id", &self.session_id()).finish()
    }
}

/// Opens sessions against a store address.
pub trait StoreConnector: Send + Sync {
    /// Establish a session. Connection state changes are delivered to
    /// `session_watcher` for the lifetime of the session.
    fn connect(
        &self,
        address: &str,
        session_timeout: Duration,
        session_watcher: Arc<dyn Watcher>,
    ) -> Result<Arc<dyn CoordinationStore>, StoreError>;
}

/// Create every ancestor of `path` and `path` itself as persistent nodes,
/// tolerating nodes that already exist.
pub fn ensure_persistent_path(store: &dyn CoordinationStore, path: &str, payload: &[u8]) -> Result<(), StoreError> {
    for dir in crate::paths::ancestors(path).iter().map(String::as_str).chain(std::iter::once(path)) {
        match store.create(dir, payload, CreateMode::Persistent) {
            Ok(_) => {}
            Err(StoreError::NodeExists { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
