//! In-memory coordination store with ZooKeeper semantics.
//!
//! Provides a deterministic, non-persistent store for unit tests, scenario
//! tests and the simulation binary. Mirrors the behavior a registry relies
//! on from a production ensemble:
//!
//! - Atomic create-if-absent; `NoNode` for missing parents
//! - Ephemeral nodes removed when their session is closed or expires
//! - One-shot data, existence and child watches, scoped to a session
//! - All callbacks delivered in order on a dedicated dispatcher thread
//! - Watch events raised while a session is disconnected are held back and
//!   delivered after it reconnects
//!
//! # Limitations
//!
//! - No ACLs, no sequential nodes, no versions
//! - Session timeouts are not enforced; expiry is triggered explicitly

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rollcall_core::CoordinationStore;
use rollcall_core::CreateMode;
use rollcall_core::EventType;
use rollcall_core::SessionState;
use rollcall_core::StoreConnector;
use rollcall_core::StoreError;
use rollcall_core::WatchedEvent;
use rollcall_core::Watcher;
use rollcall_core::constants::MAX_PAYLOAD_SIZE;
use rollcall_core::paths;
use tracing::debug;

type Outbox = Vec<(Arc<dyn Watcher>, WatchedEvent)>;

enum Delivery {
    Event {
        watcher: Arc<dyn Watcher>,
        event: WatchedEvent,
    },
    Flush(mpsc::Sender<()>),
}

struct Node {
    data: Vec<u8>,
    ephemeral_owner: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionStatus {
    Connected,
    Disconnected,
    Expired,
    Closed,
}

struct SessionEntry {
    status: SessionStatus,
    watcher: Arc<dyn Watcher>,
    /// Watch deliveries raised while disconnected.
    deferred: Outbox,
}

struct WatchRegistration {
    session: u64,
    watcher: Arc<dyn Watcher>,
}

struct Tree {
    nodes: BTreeMap<String, Node>,
    sessions: HashMap<u64, SessionEntry>,
    next_session: u64,
    data_watches: HashMap<String, Vec<WatchRegistration>>,
    exist_watches: HashMap<String, Vec<WatchRegistration>>,
    child_watches: HashMap<String, Vec<WatchRegistration>>,
    injected_failures: u32,
    refuse_connections: bool,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node {
            data: Vec::new(),
            ephemeral_owner: None,
        });
        Self {
            nodes,
            sessions: HashMap::new(),
            next_session: 0,
            data_watches: HashMap::new(),
            exist_watches: HashMap::new(),
            child_watches: HashMap::new(),
            injected_failures: 0,
            refuse_connections: false,
        }
    }

    fn check_session(&mut self, session: u64) -> Result<(), StoreError> {
        let entry = self.sessions.get(&session).ok_or(StoreError::Closed)?;
        match entry.status {
            SessionStatus::Connected => {}
            SessionStatus::Disconnected => return Err(StoreError::ConnectionLoss),
            SessionStatus::Expired => return Err(StoreError::SessionExpired),
            SessionStatus::Closed => return Err(StoreError::Closed),
        }
        if self.injected_failures > 0 {
            self.injected_failures -= 1;
            return Err(StoreError::ConnectionLoss);
        }
        Ok(())
    }

    /// Route consumed registrations to their sessions.
    fn route(&mut self, registrations: Vec<WatchRegistration>, event: &WatchedEvent, out: &mut Outbox) {
        for reg in registrations {
            let Some(entry) = self.sessions.get_mut(&reg.session) else {
                continue;
            };
            match entry.status {
                SessionStatus::Connected => out.push((reg.watcher, event.clone())),
                SessionStatus::Disconnected => entry.deferred.push((reg.watcher, event.clone())),
                SessionStatus::Expired | SessionStatus::Closed => {}
            }
        }
    }

    fn fire(&mut self, kind: WatchKind, path: &str, event_type: EventType, out: &mut Outbox) {
        let map = match kind {
            WatchKind::Data => &mut self.data_watches,
            WatchKind::Exist => &mut self.exist_watches,
            WatchKind::Child => &mut self.child_watches,
        };
        let registrations = map.remove(path).unwrap_or_default();
        if registrations.is_empty() {
            return;
        }
        let event = WatchedEvent::node(event_type, path);
        self.route(registrations, &event, out);
    }

    fn add_watch(&mut self, kind: WatchKind, path: &str, session: u64, watcher: Arc<dyn Watcher>) {
        let map = match kind {
            WatchKind::Data => &mut self.data_watches,
            WatchKind::Exist => &mut self.exist_watches,
            WatchKind::Child => &mut self.child_watches,
        };
        map.entry(path.to_string()).or_default().push(WatchRegistration { session, watcher });
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" { "/".to_string() } else { format!("{path}/") };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn create_node(
        &mut self,
        path: &str,
        data: &[u8],
        owner: Option<u64>,
        out: &mut Outbox,
    ) -> Result<String, StoreError> {
        paths::validate_path(path).map_err(|reason| StoreError::InvalidPath {
            path: path.to_string(),
            reason,
        })?;
        if data.len() > MAX_PAYLOAD_SIZE as usize {
            return Err(StoreError::PayloadTooLarge {
                path: path.to_string(),
                size: data.len() as u32,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        if self.nodes.contains_key(path) {
            return Err(StoreError::NodeExists { path: path.to_string() });
        }

        let parent = parent_of(path);
        match self.nodes.get(&parent) {
            None => return Err(StoreError::NoNode { path: path.to_string() }),
            Some(node) if node.ephemeral_owner.is_some() => {
                return Err(StoreError::NoChildrenForEphemerals { path: parent });
            }
            Some(_) => {}
        }

        self.nodes.insert(path.to_string(), Node {
            data: data.to_vec(),
            ephemeral_owner: owner,
        });
        self.fire(WatchKind::Exist, path, EventType::NodeCreated, out);
        self.fire(WatchKind::Child, &parent, EventType::NodeChildrenChanged, out);
        Ok(path.to_string())
    }

    fn delete_node(&mut self, path: &str, out: &mut Outbox) -> Result<(), StoreError> {
        if path == "/" || !self.nodes.contains_key(path) {
            return Err(StoreError::NoNode { path: path.to_string() });
        }
        if !self.children_of(path).is_empty() {
            return Err(StoreError::NotEmpty { path: path.to_string() });
        }

        self.nodes.remove(path);
        let parent = parent_of(path);
        self.fire(WatchKind::Data, path, EventType::NodeDeleted, out);
        self.fire(WatchKind::Exist, path, EventType::NodeDeleted, out);
        self.fire(WatchKind::Child, path, EventType::NodeDeleted, out);
        self.fire(WatchKind::Child, &parent, EventType::NodeChildrenChanged, out);
        Ok(())
    }

    fn set_node_data(&mut self, path: &str, data: &[u8], out: &mut Outbox) -> Result<(), StoreError> {
        let node = self.nodes.get_mut(path).ok_or_else(|| StoreError::NoNode { path: path.to_string() })?;
        node.data = data.to_vec();
        self.fire(WatchKind::Data, path, EventType::NodeDataChanged, out);
        Ok(())
    }

    /// End a session: drop its watches, remove its ephemeral nodes.
    fn end_session(&mut self, session: u64, status: SessionStatus, out: &mut Outbox) {
        let Some(entry) = self.sessions.get_mut(&session) else {
            return;
        };
        if matches!(entry.status, SessionStatus::Expired | SessionStatus::Closed) {
            return;
        }
        entry.status = status;
        entry.deferred.clear();

        for map in [&mut self.data_watches, &mut self.exist_watches, &mut self.child_watches] {
            for registrations in map.values_mut() {
                registrations.retain(|reg| reg.session != session);
            }
            map.retain(|_, registrations| !registrations.is_empty());
        }

        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            let _ = self.delete_node(&path, out);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum WatchKind {
    Data,
    Exist,
    Child,
}

fn parent_of(path: &str) -> String {
    paths::ancestors(path).pop().unwrap_or_else(|| "/".to_string())
}

struct Inner {
    tree: Mutex<Tree>,
    dispatch: mpsc::Sender<Delivery>,
}

impl Inner {
    /// Queue deliveries; called with the tree lock held so the callback
    /// thread observes events in the order they happened.
    fn dispatch(&self, out: Outbox) {
        for (watcher, event) in out {
            let _ = self.dispatch.send(Delivery::Event { watcher, event });
        }
    }
}

fn dispatch_loop(rx: mpsc::Receiver<Delivery>) {
    while let Ok(delivery) = rx.recv() {
        match delivery {
            Delivery::Event { watcher, event } => watcher.process(event),
            Delivery::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// In-memory coordination store shared by any number of sessions.
///
/// Cloning yields another handle to the same tree. Also acts as the
/// [`StoreConnector`] for registries under test.
///
/// # Example
///
/// ```ignore
/// let ensemble = InMemoryEnsemble::new();
/// let session = ensemble.connect("mem", Duration::from_secs(5), Arc::new(|_| {}))?;
/// session.create("/servers", b"", CreateMode::Persistent)?;
/// ensemble.expire(session.session_id());
/// ```
#[derive(Clone)]
pub struct InMemoryEnsemble {
    inner: Arc<Inner>,
}

impl Default for InMemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEnsemble {
    /// Create an empty store (only `/` exists) with its callback thread.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("rollcall-store-callback".to_string())
            .spawn(move || dispatch_loop(rx))
            .expect("failed to spawn store callback thread");
        Self {
            inner: Arc::new(Inner {
                tree: Mutex::new(Tree::new()),
                dispatch: tx,
            }),
        }
    }

    /// Block until every callback queued so far has been delivered.
    ///
    /// Must not be called from inside a watcher.
    pub fn flush(&self) {
        let (tx, rx) = mpsc::channel();
        if self.inner.dispatch.send(Delivery::Flush(tx)).is_ok() {
            let _ = rx.recv();
        }
    }

    /// Drop the connection of a session without ending it.
    pub fn disconnect(&self, session: u64) {
        let mut tree = self.inner.tree.lock();
        let Some(entry) = tree.sessions.get_mut(&session) else {
            return;
        };
        if entry.status != SessionStatus::Connected {
            return;
        }
        entry.status = SessionStatus::Disconnected;
        let watcher = entry.watcher.clone();
        debug!(session_id = session, "session disconnected");
        self.inner.dispatch(vec![(watcher, WatchedEvent::session(SessionState::Disconnected))]);
    }

    /// Restore a disconnected session and release its held-back watch events.
    pub fn reconnect(&self, session: u64) {
        let mut tree = self.inner.tree.lock();
        let Some(entry) = tree.sessions.get_mut(&session) else {
            return;
        };
        if entry.status != SessionStatus::Disconnected {
            return;
        }
        entry.status = SessionStatus::Connected;
        let mut out: Outbox = vec![(entry.watcher.clone(), WatchedEvent::session(SessionState::Connected))];
        out.append(&mut entry.deferred);
        debug!(session_id = session, "session reconnected");
        self.inner.dispatch(out);
    }

    /// Expire a session as the server would after a timeout.
    pub fn expire(&self, session: u64) {
        let mut tree = self.inner.tree.lock();
        let Some(watcher) = tree.sessions.get(&session).map(|entry| entry.watcher.clone()) else {
            return;
        };
        let mut out = Outbox::new();
        tree.end_session(session, SessionStatus::Expired, &mut out);
        out.push((watcher, WatchedEvent::session(SessionState::Expired)));
        debug!(session_id = session, "session expired");
        self.inner.dispatch(out);
    }

    /// Fail the next `count` session operations with `ConnectionLoss`.
    pub fn fail_next(&self, count: u32) {
        self.inner.tree.lock().injected_failures = count;
    }

    /// Refuse (or accept again) new sessions.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.tree.lock().refuse_connections = refuse;
    }

    /// Create a persistent node outside of any session.
    pub fn create_persistent(&self, path: &str, data: &[u8]) -> Result<(), StoreError> {
        let mut tree = self.inner.tree.lock();
        let mut out = Outbox::new();
        tree.create_node(path, data, None, &mut out)?;
        self.inner.dispatch(out);
        Ok(())
    }

    /// Create an ephemeral node owned by `session`, as if that session had
    /// created it. Used to plant foreign leader markers and instances.
    pub fn create_ephemeral_for(&self, session: u64, path: &str, data: &[u8]) -> Result<(), StoreError> {
        let mut tree = self.inner.tree.lock();
        match tree.sessions.get(&session).map(|entry| entry.status) {
            Some(SessionStatus::Connected | SessionStatus::Disconnected) => {}
            Some(SessionStatus::Expired) => return Err(StoreError::SessionExpired),
            Some(SessionStatus::Closed) | None => return Err(StoreError::Closed),
        }
        let mut out = Outbox::new();
        tree.create_node(path, data, Some(session), &mut out)?;
        self.inner.dispatch(out);
        Ok(())
    }

    /// Delete a childless node outside of any session.
    pub fn delete(&self, path: &str) -> Result<(), StoreError> {
        let mut tree = self.inner.tree.lock();
        let mut out = Outbox::new();
        tree.delete_node(path, &mut out)?;
        self.inner.dispatch(out);
        Ok(())
    }

    /// Overwrite the payload of a node outside of any session.
    pub fn set_data(&self, path: &str, data: &[u8]) -> Result<(), StoreError> {
        let mut tree = self.inner.tree.lock();
        let mut out = Outbox::new();
        tree.set_node_data(path, data, &mut out)?;
        self.inner.dispatch(out);
        Ok(())
    }

    /// Payload of a node, if present.
    pub fn node_data(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.tree.lock().nodes.get(path).map(|node| node.data.clone())
    }

    /// Whether a node is present.
    pub fn exists(&self, path: &str) -> bool {
        self.inner.tree.lock().nodes.contains_key(path)
    }

    /// Sorted child names of a node (empty when absent).
    pub fn children(&self, path: &str) -> Vec<String> {
        self.inner.tree.lock().children_of(path)
    }

    /// Owning session of an ephemeral node.
    pub fn ephemeral_owner(&self, path: &str) -> Option<u64> {
        self.inner.tree.lock().nodes.get(path).and_then(|node| node.ephemeral_owner)
    }

    /// Ids of sessions that have not ended, in creation order.
    pub fn session_ids(&self) -> Vec<u64> {
        let tree = self.inner.tree.lock();
        let mut ids: Vec<u64> = tree
            .sessions
            .iter()
            .filter(|(_, entry)| matches!(entry.status, SessionStatus::Connected | SessionStatus::Disconnected))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of pending watch registrations on `path` across all kinds.
    pub fn watch_count(&self, path: &str) -> usize {
        let tree = self.inner.tree.lock();
        [&tree.data_watches, &tree.exist_watches, &tree.child_watches]
            .iter()
            .map(|map| map.get(path).map_or(0, Vec::len))
            .sum()
    }
}

impl StoreConnector for InMemoryEnsemble {
    fn connect(
        &self,
        address: &str,
        _session_timeout: Duration,
        session_watcher: Arc<dyn Watcher>,
    ) -> Result<Arc<dyn CoordinationStore>, StoreError> {
        let mut tree = self.inner.tree.lock();
        if tree.refuse_connections {
            return Err(StoreError::ConnectFailed {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        tree.next_session += 1;
        let id = tree.next_session;
        tree.sessions.insert(id, SessionEntry {
            status: SessionStatus::Connected,
            watcher: session_watcher.clone(),
            deferred: Outbox::new(),
        });
        self.inner.dispatch(vec![(session_watcher, WatchedEvent::session(SessionState::Connected))]);
        debug!(session_id = id, address, "session established");

        Ok(Arc::new(InMemorySession {
            id,
            inner: self.inner.clone(),
        }))
    }
}

/// One client session on an [`InMemoryEnsemble`].
pub struct InMemorySession {
    id: u64,
    inner: Arc<Inner>,
}

impl CoordinationStore for InMemorySession {
    fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String, StoreError> {
        let mut tree = self.inner.tree.lock();
        tree.check_session(self.id)?;
        let owner = matches!(mode, CreateMode::Ephemeral).then_some(self.id);
        let mut out = Outbox::new();
        let created = tree.create_node(path, data, owner, &mut out)?;
        self.inner.dispatch(out);
        Ok(created)
    }

    fn get_data(&self, path: &str, watcher: Option<Arc<dyn Watcher>>) -> Result<Vec<u8>, StoreError> {
        let mut tree = self.inner.tree.lock();
        tree.check_session(self.id)?;
        let data = tree
            .nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| StoreError::NoNode { path: path.to_string() })?;
        if let Some(watcher) = watcher {
            tree.add_watch(WatchKind::Data, path, self.id, watcher);
        }
        Ok(data)
    }

    fn exists(&self, path: &str, watcher: Option<Arc<dyn Watcher>>) -> Result<bool, StoreError> {
        let mut tree = self.inner.tree.lock();
        tree.check_session(self.id)?;
        let present = tree.nodes.contains_key(path);
        if let Some(watcher) = watcher {
            let kind = if present { WatchKind::Data } else { WatchKind::Exist };
            tree.add_watch(kind, path, self.id, watcher);
        }
        Ok(present)
    }

    fn get_children(&self, path: &str, watcher: Option<Arc<dyn Watcher>>) -> Result<Vec<String>, StoreError> {
        let mut tree = self.inner.tree.lock();
        tree.check_session(self.id)?;
        if !tree.nodes.contains_key(path) {
            return Err(StoreError::NoNode { path: path.to_string() });
        }
        let children = tree.children_of(path);
        if let Some(watcher) = watcher {
            tree.add_watch(WatchKind::Child, path, self.id, watcher);
        }
        Ok(children)
    }

    fn session_id(&self) -> u64 {
        self.id
    }

    fn close(&self) {
        let mut tree = self.inner.tree.lock();
        let mut out = Outbox::new();
        tree.end_session(self.id, SessionStatus::Closed, &mut out);
        self.inner.dispatch(out);
    }
}
