//! The registry facade.
//!
//! Composes identity, election and discovery behind one object and enforces
//! the startup order:
//!
//! ```text
//! init_server_id -> connect -> register -> start_watch
//! ```
//!
//! Everything that reacts to store notifications lives in [`RegistryCore`],
//! which is owned by the reactor and only ever touched through
//! [`EventBridge`] tasks or the facade's own `&mut self` methods.

mod handlers;
mod lifecycle;

use std::fmt;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

pub use handlers::AddServerHandler;
pub use handlers::DelServerHandler;
pub use handlers::NodeStateChangeHandler;
pub use handlers::ServerInfoHandler;
pub use lifecycle::Lifecycle;
use rollcall_core::CoordinationStore;
use rollcall_core::CreateMode;
use rollcall_core::EventType;
use rollcall_core::NodeMode;
use rollcall_core::NodeState;
use rollcall_core::ServerId;
use rollcall_core::ServerType;
use rollcall_core::SessionState;
use rollcall_core::StoreConnector;
use rollcall_core::StoreError;
use rollcall_core::WatchSelector;
use rollcall_core::WatchedEvent;
use rollcall_core::Watcher;
use rollcall_core::Zone;
use rollcall_core::constants::DEFAULT_SESSION_TIMEOUT_MS;
use rollcall_core::constants::SERVER_DIR_PAYLOAD;
use rollcall_core::constants::ZONE_DIR_PAYLOAD;
use rollcall_core::ensure_persistent_path;
use rollcall_core::paths;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use self::handlers::Handlers;
use self::lifecycle::require;
use crate::bridge::EventBridge;
use crate::config::RegistryConfig;
use crate::discovery::DiscoveryEngine;
use crate::election::ElectionEngine;
use crate::error::RegistryError;
use crate::identity::NodeIdentity;
use crate::watcher::BridgeWatchFactory;
use crate::watcher::BridgeWatcher;
use crate::watcher::WatchTarget;

/// Reactor-owned registry state.
pub(crate) struct RegistryCore {
    bridge: Weak<EventBridge<RegistryCore>>,
    /// Bumped on stop; callbacks armed under an older epoch are dropped.
    epoch: u64,
    lifecycle: Lifecycle,
    store: Option<Arc<dyn CoordinationStore>>,
    election: Option<ElectionEngine>,
    discovery: DiscoveryEngine,
    handlers: Handlers,
    disconnected: bool,
    session_lost: bool,
}

impl RegistryCore {
    fn new(bridge: Weak<EventBridge<RegistryCore>>) -> Self {
        Self {
            bridge,
            epoch: 0,
            lifecycle: Lifecycle::Configuring,
            store: None,
            election: None,
            discovery: DiscoveryEngine::new(),
            handlers: Handlers::default(),
            disconnected: false,
            session_lost: false,
        }
    }

    fn watch_factory(&self) -> BridgeWatchFactory {
        BridgeWatchFactory {
            bridge: self.bridge.clone(),
            epoch: self.epoch,
        }
    }

    /// Entry point of every bridged store callback.
    pub(crate) fn on_watch(&mut self, epoch: u64, target: WatchTarget, event: WatchedEvent) {
        if epoch != self.epoch || self.lifecycle == Lifecycle::Stopped {
            trace!(epoch, current = self.epoch, "dropping stale store callback");
            return;
        }
        if event.event_type == EventType::Session {
            self.on_session_event(event.session_state);
            return;
        }
        if self.session_lost {
            return;
        }
        let Some(store) = self.store.clone() else {
            return;
        };
        let watches = self.watch_factory();
        debug!(target_kind = ?target, event = ?event.event_type, path = ?event.path, "watch fired");

        match target {
            WatchTarget::LeaderMarker => {
                if let Some(election) = self.election.as_mut()
                    && let Some(state) = election.on_marker_event(&*store, &watches)
                {
                    self.handlers.notify_state(state);
                }
            }
            WatchTarget::ServerType { server_type } => {
                let events = self.discovery.on_type_event(&*store, &watches, &server_type);
                self.handlers.dispatch(events);
            }
            WatchTarget::ZoneList { server_type } => {
                let events = self.discovery.on_zone_list_event(&*store, &watches, &server_type);
                self.handlers.dispatch(events);
            }
            WatchTarget::InstanceList { server_type, zone } => {
                let events = self.discovery.on_instance_event(&*store, &watches, &server_type, zone);
                self.handlers.dispatch(events);
            }
            WatchTarget::Session => {}
        }
    }

    fn on_session_event(&mut self, state: SessionState) {
        match state {
            SessionState::Connected => {
                if !self.disconnected || self.session_lost {
                    return;
                }
                self.disconnected = false;
                info!("store session restored, re-deriving election and discovery");
                let Some(store) = self.store.clone() else {
                    return;
                };
                let watches = self.watch_factory();
                if let Some(election) = self.election.as_mut()
                    && let Some(state) = election.on_session_restored(&*store, &watches)
                {
                    self.handlers.notify_state(state);
                }
                let events = self.discovery.resync(&*store, &watches);
                self.handlers.dispatch(events);
            }
            SessionState::Disconnected => {
                self.disconnected = true;
                warn!("store session disconnected, stepping down until it recovers");
                self.demote();
            }
            SessionState::Expired => {
                self.session_lost = true;
                error!("store session expired: presence and leader marker are gone, restart required");
                self.demote();
            }
            SessionState::Closed => {}
        }
    }

    fn demote(&mut self) {
        if let Some(election) = self.election.as_mut()
            && let Some(state) = election.demote()
        {
            self.handlers.notify_state(state);
        }
    }
}

struct NodeSpec {
    server_type: ServerType,
    zone: Zone,
    mode: NodeMode,
}

/// One process's identity, leadership and view of its peers.
///
/// Configure, then [`start`](Self::start) (or run the four startup steps
/// individually), then keep draining store notifications with
/// [`run`](Self::run) or [`run_pending`](Self::run_pending). Every handler
/// runs on the thread that drains.
///
/// Dropping the registry stops it.
pub struct Registry {
    connector: Arc<dyn StoreConnector>,
    address: Option<String>,
    session_timeout: Duration,
    node: Option<NodeSpec>,
    identity: Option<NodeIdentity>,
    state_tx: Option<watch::Sender<NodeState>>,
    state_rx: watch::Receiver<NodeState>,
    bridge: Arc<EventBridge<RegistryCore>>,
    core: RegistryCore,
}

impl Registry {
    /// Unconfigured registry that will open its session through `connector`.
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        let bridge = Arc::new(EventBridge::new());
        let core = RegistryCore::new(Arc::downgrade(&bridge));
        let (state_tx, state_rx) = watch::channel(NodeState::Init);
        Self {
            connector,
            address: None,
            session_timeout: Duration::from_millis(DEFAULT_SESSION_TIMEOUT_MS),
            node: None,
            identity: None,
            state_tx: Some(state_tx),
            state_rx,
            bridge,
            core,
        }
    }

    /// Registry configured from a [`RegistryConfig`].
    pub fn from_config(connector: Arc<dyn StoreConnector>, config: &RegistryConfig) -> Result<Self, RegistryError> {
        config.validate()?;
        let mut registry = Self::new(connector);
        registry.init(config.address.clone())?;
        registry.set_session_timeout(config.session_timeout())?;
        if let Some(server_type) = config.server_type()? {
            registry.set_server_type(server_type.as_str(), config.node.zone, config.node.mode)?;
        }
        for selector in config.selectors()? {
            registry.add_watch_selector(selector)?;
        }
        Ok(registry)
    }

    /// Record the store address. No I/O.
    pub fn init(&mut self, address: impl Into<String>) -> Result<(), RegistryError> {
        require("init", self.core.lifecycle, Lifecycle::Configuring)?;
        self.address = Some(address.into());
        Ok(())
    }

    /// Session timeout handed to the store client.
    pub fn set_session_timeout(&mut self, timeout: Duration) -> Result<(), RegistryError> {
        require("set_session_timeout", self.core.lifecycle, Lifecycle::Configuring)?;
        self.session_timeout = timeout;
        Ok(())
    }

    /// Identity parameters of this process.
    pub fn set_server_type(&mut self, server_type: &str, zone: Zone, mode: NodeMode) -> Result<(), RegistryError> {
        require("set_server_type", self.core.lifecycle, Lifecycle::Configuring)?;
        let server_type = ServerType::new(server_type)?;
        self.node = Some(NodeSpec {
            server_type,
            zone,
            mode,
        });
        Ok(())
    }

    /// Watch every zone of `server_type`.
    pub fn add_watch_type(&mut self, server_type: &str) -> Result<(), RegistryError> {
        let server_type = ServerType::new(server_type)?;
        self.add_watch_selector(WatchSelector::Type { server_type })
    }

    /// Watch one zone of `server_type`.
    pub fn add_watch_zone(&mut self, server_type: &str, zone: Zone) -> Result<(), RegistryError> {
        let server_type = ServerType::new(server_type)?;
        self.add_watch_selector(WatchSelector::Zone { server_type, zone })
    }

    /// Add a discovery selector. Duplicates are ignored; selectors are
    /// frozen once watching starts.
    pub fn add_watch_selector(&mut self, selector: WatchSelector) -> Result<(), RegistryError> {
        lifecycle::require_running("add_watch_selector", self.core.lifecycle)?;
        let added = self.core.discovery.add_selector(selector.clone())?;
        debug!(selector = ?selector, added, "watch selector configured");
        Ok(())
    }

    /// Handler for leadership changes after registration.
    pub fn set_node_state_change_handler<F>(&mut self, handler: F)
    where F: FnMut(NodeState) + Send + 'static {
        self.core.handlers.state_change = Some(Box::new(handler));
    }

    /// Handler for discovered instances.
    pub fn set_add_server_handler<F>(&mut self, handler: F)
    where F: FnMut(&ServerType, Zone, &ServerId, &str) + Send + 'static {
        self.core.handlers.add_server = Some(Box::new(handler));
    }

    /// Handler for departed instances.
    pub fn set_del_server_handler<F>(&mut self, handler: F)
    where F: FnMut(&ServerId) + Send + 'static {
        self.core.handlers.del_server = Some(Box::new(handler));
    }

    /// Provider of the info string published at registration.
    pub fn set_server_info_handler<F>(&mut self, handler: F)
    where F: Fn() -> String + Send + 'static {
        self.core.handlers.server_info = Some(Box::new(handler));
    }

    /// Mint this process's server id.
    pub fn init_server_id(&mut self) -> Result<&ServerId, RegistryError> {
        require("init_server_id", self.core.lifecycle, Lifecycle::Configuring)?;
        let Some(node) = self.node.as_ref() else {
            error!("cannot create a server id without a server type");
            return Err(RegistryError::MissingServerType {
                operation: "init_server_id",
            });
        };
        let state_tx = self.state_tx.take().ok_or(RegistryError::Lifecycle {
            operation: "init_server_id",
            state: self.core.lifecycle,
        })?;

        let identity = NodeIdentity::generate(&node.server_type, node.zone).inspect_err(|e| {
            error!(server_type = %node.server_type, error = %e, "failed to create server id");
        })?;
        info!(server_id = %identity.server_id(), mode = node.mode.as_str(), "server id assigned");

        self.core.election = Some(ElectionEngine::with_sender(&identity, node.mode, state_tx));
        self.core.lifecycle = Lifecycle::Identified;
        Ok(self.identity.insert(identity).server_id())
    }

    /// Open the store session.
    pub fn connect(&mut self) -> Result<(), RegistryError> {
        require("connect", self.core.lifecycle, Lifecycle::Identified)?;
        let Some(address) = self.address.clone() else {
            error!("cannot connect without a store address");
            return Err(RegistryError::MissingAddress);
        };

        let session_watcher: Arc<dyn Watcher> =
            Arc::new(BridgeWatcher::new(Arc::downgrade(&self.bridge), self.core.epoch, WatchTarget::Session));
        let store = self.connector.connect(&address, self.session_timeout, session_watcher).map_err(|source| {
            error!(address = %address, error = %source, "failed to connect to coordination store");
            RegistryError::Connect {
                address: address.clone(),
                source,
            }
        })?;

        info!(address = %address, session_id = store.session_id(), "connected to coordination store");
        self.core.store = Some(store);
        self.core.lifecycle = Lifecycle::Connected;
        Ok(())
    }

    /// Publish presence, then run the election.
    pub fn register(&mut self) -> Result<NodeState, RegistryError> {
        require("register", self.core.lifecycle, Lifecycle::Connected)?;
        let (Some(store), Some(identity)) = (self.core.store.clone(), self.identity.as_ref()) else {
            return Err(RegistryError::Lifecycle {
                operation: "register",
                state: self.core.lifecycle,
            });
        };
        let server_type = identity.server_type().as_str();
        let zone = identity.zone();

        let fatal_dir = |path: &str, source: StoreError| {
            error!(path = %path, error = %source, "failed to create presence directory");
            RegistryError::CreatePath {
                path: path.to_string(),
                source,
            }
        };
        let type_dir = paths::server_type_path(server_type);
        ensure_persistent_path(&*store, &type_dir, SERVER_DIR_PAYLOAD.as_bytes())
            .map_err(|source| fatal_dir(&type_dir, source))?;
        let zone_dir = paths::zone_path(server_type, zone);
        match store.create(&zone_dir, ZONE_DIR_PAYLOAD.as_bytes(), CreateMode::Persistent) {
            Ok(_) => {}
            Err(e) if e.is_node_exists() => {}
            Err(source) => return Err(fatal_dir(&zone_dir, source)),
        }

        let instance = paths::instance_path(server_type, zone, identity.server_id());
        let info = self.core.handlers.server_info();
        store.create(&instance, info.as_bytes(), CreateMode::Ephemeral).map_err(|source| {
            error!(path = %instance, error = %source, "failed to publish presence");
            RegistryError::Register {
                path: instance.clone(),
                source,
            }
        })?;
        debug!(path = %instance, info = %info, "presence published");

        let watches = self.core.watch_factory();
        let Some(election) = self.core.election.as_mut() else {
            return Err(RegistryError::Lifecycle {
                operation: "register",
                state: self.core.lifecycle,
            });
        };
        let state = election.register(&*store, &watches)?;
        self.core.lifecycle = Lifecycle::Registered;
        info!(server_id = %identity.server_id(), state = %state, "registered");
        Ok(state)
    }

    /// Arm discovery watches and report instances already live.
    pub fn start_watch(&mut self) -> Result<(), RegistryError> {
        require("start_watch", self.core.lifecycle, Lifecycle::Registered)?;
        let Some(store) = self.core.store.clone() else {
            return Err(RegistryError::Lifecycle {
                operation: "start_watch",
                state: self.core.lifecycle,
            });
        };
        let watches = self.core.watch_factory();
        let events = self.core.discovery.start(&*store, &watches)?;
        self.core.lifecycle = Lifecycle::Watching;
        self.core.handlers.dispatch(events);
        Ok(())
    }

    /// Run the whole startup sequence.
    pub fn start(&mut self) -> Result<(), RegistryError> {
        self.init_server_id()?;
        self.connect()?;
        self.register()?;
        self.start_watch()
    }

    /// Current leadership state.
    pub fn state(&self) -> NodeState {
        *self.state_rx.borrow()
    }

    /// Receiver of leadership state updates.
    pub fn subscribe_state(&self) -> watch::Receiver<NodeState> {
        self.state_rx.clone()
    }

    /// This process's server id, once assigned.
    pub fn server_id(&self) -> Option<&ServerId> {
        self.identity.as_ref().map(NodeIdentity::server_id)
    }

    /// Configured leadership mode.
    pub fn mode(&self) -> Option<NodeMode> {
        self.node.as_ref().map(|node| node.mode)
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.core.lifecycle
    }

    /// True once the store session expired; the process must re-register
    /// from scratch to take part again.
    pub fn is_session_lost(&self) -> bool {
        self.core.session_lost
    }

    /// Run every queued notification on this thread. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        self.bridge.drain(&mut self.core)
    }

    /// Drain notifications as they arrive until `cancel` fires or the
    /// registry stops.
    pub async fn run(&mut self, cancel: CancellationToken) {
        let bridge = self.bridge.clone();
        loop {
            self.run_pending();
            if bridge.is_closed() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = bridge.wait() => {}
            }
        }
    }

    /// Release the store session. Ephemeral entries vanish with it, queued
    /// notifications are discarded and no handler fires afterwards.
    pub fn stop(&mut self) {
        if self.core.lifecycle == Lifecycle::Stopped {
            return;
        }
        self.core.epoch += 1;
        self.core.lifecycle = Lifecycle::Stopped;
        self.bridge.close();
        if let Some(store) = self.core.store.take() {
            store.close();
        }
        info!(server_id = ?self.identity.as_ref().map(|i| i.server_id().as_str()), "registry stopped");
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("address", &self.address)
            .field("server_id", &self.server_id())
            .field("lifecycle", &self.core.lifecycle)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rollcall_testing::InMemoryEnsemble;

    use super::*;

    fn registry(ensemble: &InMemoryEnsemble, server_type: &str, zone: Zone, mode: NodeMode) -> Registry {
        let mut registry = Registry::new(Arc::new(ensemble.clone()));
        registry.init("mem:2181").unwrap();
        registry.set_server_type(server_type, zone, mode).unwrap();
        registry
    }

    fn settle(ensemble: &InMemoryEnsemble, registries: &mut [&mut Registry]) {
        for _ in 0..32 {
            ensemble.flush();
            let ran: usize = registries.iter_mut().map(|r| r.run_pending()).sum();
            if ran == 0 {
                return;
            }
        }
    }

    #[test]
    fn test_call_order_is_enforced() {
        let ensemble = InMemoryEnsemble::new();
        let mut registry = registry(&ensemble, "echo-server", 0, NodeMode::MasterSlave);

        assert!(matches!(registry.connect(), Err(RegistryError::Lifecycle { operation: "connect", .. })));
        assert!(matches!(registry.register(), Err(RegistryError::Lifecycle { .. })));
        assert!(matches!(registry.start_watch(), Err(RegistryError::Lifecycle { .. })));

        registry.init_server_id().unwrap();
        assert_eq!(registry.lifecycle(), Lifecycle::Identified);
        assert!(matches!(registry.init_server_id(), Err(RegistryError::Lifecycle { .. })));
        assert!(registry.set_server_type("other", 1, NodeMode::MasterSlave).is_err());
        assert!(registry.init("elsewhere").is_err());
    }

    #[test]
    fn test_identity_requires_server_type() {
        let ensemble = InMemoryEnsemble::new();
        let mut registry = Registry::new(Arc::new(ensemble));
        let err = registry.init_server_id().unwrap_err();
        assert!(matches!(err, RegistryError::MissingServerType { .. }));
        assert!(err.is_fatal());
        assert!(matches!(
            registry.set_server_type("", 0, NodeMode::MasterSlave),
            Err(RegistryError::Identity { .. })
        ));
    }

    #[test]
    fn test_connect_requires_address() {
        let ensemble = InMemoryEnsemble::new();
        let mut registry = Registry::new(Arc::new(ensemble));
        registry.set_server_type("echo-server", 0, NodeMode::MasterSlave).unwrap();
        registry.init_server_id().unwrap();
        assert!(matches!(registry.connect(), Err(RegistryError::MissingAddress)));
    }

    #[test]
    fn test_refused_connection_is_fatal() {
        let ensemble = InMemoryEnsemble::new();
        ensemble.refuse_connections(true);
        let mut registry = registry(&ensemble, "echo-server", 0, NodeMode::MasterSlave);
        let err = registry.start().unwrap_err();
        assert!(matches!(err, RegistryError::Connect { .. }));
        assert!(err.is_fatal());
        assert_eq!(registry.lifecycle(), Lifecycle::Identified);
    }

    #[test]
    fn test_register_publishes_presence() {
        let ensemble = InMemoryEnsemble::new();
        let mut registry = registry(&ensemble, "echo-server", 2, NodeMode::MasterSlave);
        registry.set_server_info_handler(|| "10.0.0.5:9000".to_string());
        registry.start().unwrap();

        let id = registry.server_id().unwrap().clone();
        assert_eq!(id.server_type().as_str(), "echo-server");
        assert_eq!(id.zone(), 2);
        assert_eq!(registry.state(), NodeState::Master);
        assert_eq!(registry.lifecycle(), Lifecycle::Watching);

        assert_eq!(ensemble.node_data("/servers"), Some(b"server list".to_vec()));
        assert_eq!(ensemble.node_data("/servers/echo-server"), Some(b"server list".to_vec()));
        assert_eq!(ensemble.node_data("/servers/echo-server/2"), Some(b"zone".to_vec()));
        let instance = format!("/servers/echo-server/2/{id}");
        assert_eq!(ensemble.node_data(&instance), Some(b"10.0.0.5:9000".to_vec()));
        assert!(ensemble.ephemeral_owner(&instance).is_some());
        assert_eq!(ensemble.node_data("/master/echo-server/2"), Some(id.as_str().as_bytes().to_vec()));
    }

    #[test]
    fn test_empty_info_without_handler() {
        let ensemble = InMemoryEnsemble::new();
        let mut registry = registry(&ensemble, "echo-server", 0, NodeMode::MasterSlave);
        registry.start().unwrap();
        let instance = format!("/servers/echo-server/0/{}", registry.server_id().unwrap());
        assert_eq!(ensemble.node_data(&instance), Some(Vec::new()));
    }

    #[test]
    fn test_master_master_has_no_marker() {
        let ensemble = InMemoryEnsemble::new();
        let mut a = registry(&ensemble, "echo-server", 0, NodeMode::MasterMaster);
        let mut b = registry(&ensemble, "echo-server", 0, NodeMode::MasterMaster);
        a.start().unwrap();
        b.start().unwrap();
        settle(&ensemble, &mut [&mut a, &mut b]);

        assert_eq!(a.state(), NodeState::Master);
        assert_eq!(b.state(), NodeState::Master);
        assert_eq!(a.mode(), Some(NodeMode::MasterMaster));
        assert!(!ensemble.exists("/master/echo-server/0"));
    }

    #[test]
    fn test_stop_releases_session_and_silences_handlers() {
        let ensemble = InMemoryEnsemble::new();
        let mut watcher = registry(&ensemble, "client", 0, NodeMode::MasterSlave);
        watcher.add_watch_type("echo-server").unwrap();
        let added = Arc::new(Mutex::new(0));
        let sink = added.clone();
        watcher.set_add_server_handler(move |_, _, _, _| *sink.lock().unwrap() += 1);
        watcher.start().unwrap();

        let mut server = registry(&ensemble, "echo-server", 0, NodeMode::MasterSlave);
        server.start().unwrap();
        let instance = format!("/servers/echo-server/0/{}", server.server_id().unwrap());

        // Notification is queued for `watcher` but never drained.
        ensemble.flush();
        watcher.stop();
        assert_eq!(watcher.run_pending(), 0);
        assert_eq!(*added.lock().unwrap(), 0);
        assert_eq!(watcher.lifecycle(), Lifecycle::Stopped);

        server.stop();
        assert!(!ensemble.exists(&instance));
        assert!(!ensemble.exists("/master/echo-server/0"));
        server.stop();
    }

    #[test]
    fn test_drop_stops() {
        let ensemble = InMemoryEnsemble::new();
        let instance = {
            let mut registry = registry(&ensemble, "echo-server", 0, NodeMode::MasterSlave);
            registry.start().unwrap();
            format!("/servers/echo-server/0/{}", registry.server_id().unwrap())
        };
        assert!(!ensemble.exists(&instance));
    }

    #[test]
    fn test_selectors_frozen_after_start_watch() {
        let ensemble = InMemoryEnsemble::new();
        let mut registry = registry(&ensemble, "client", 0, NodeMode::MasterSlave);
        registry.add_watch_zone("echo-server", 1).unwrap();
        registry.add_watch_zone("echo-server", 1).unwrap();
        registry.start().unwrap();
        assert!(matches!(registry.add_watch_type("other"), Err(RegistryError::SelectorsFrozen)));
    }

    #[test]
    fn test_disconnect_demotes_and_reconnect_restores() {
        let ensemble = InMemoryEnsemble::new();
        let mut registry = registry(&ensemble, "echo-server", 0, NodeMode::MasterSlave);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry.set_node_state_change_handler(move |state| sink.lock().unwrap().push(state));
        registry.start().unwrap();
        settle(&ensemble, &mut [&mut registry]);
        assert_eq!(registry.state(), NodeState::Master);
        assert!(seen.lock().unwrap().is_empty());

        let session = ensemble.session_ids()[0];
        ensemble.disconnect(session);
        settle(&ensemble, &mut [&mut registry]);
        assert_eq!(registry.state(), NodeState::Slave);

        ensemble.reconnect(session);
        settle(&ensemble, &mut [&mut registry]);
        assert_eq!(registry.state(), NodeState::Master);
        assert_eq!(*seen.lock().unwrap(), vec![NodeState::Slave, NodeState::Master]);
    }

    #[test]
    fn test_expiry_marks_session_lost() {
        let ensemble = InMemoryEnsemble::new();
        let mut registry = registry(&ensemble, "echo-server", 0, NodeMode::MasterSlave);
        registry.start().unwrap();
        settle(&ensemble, &mut [&mut registry]);

        ensemble.expire(ensemble.session_ids()[0]);
        settle(&ensemble, &mut [&mut registry]);
        assert!(registry.is_session_lost());
        assert_eq!(registry.state(), NodeState::Slave);
        assert!(!ensemble.exists("/master/echo-server/0"));
    }

    #[test]
    fn test_from_config() {
        let ensemble = InMemoryEnsemble::new();
        let config = RegistryConfig {
            node: crate::config::NodeConfig {
                server_type: Some("echo-server".to_string()),
                zone: 4,
                mode: NodeMode::MasterMaster,
            },
            watch: vec![crate::config::WatchConfig {
                server_type: "cache".to_string(),
                zone: None,
            }],
            ..RegistryConfig::default()
        };
        let mut registry = Registry::from_config(Arc::new(ensemble), &config).unwrap();
        assert_eq!(registry.mode(), Some(NodeMode::MasterMaster));
        registry.start().unwrap();
        assert_eq!(registry.server_id().unwrap().zone(), 4);
        assert_eq!(registry.state(), NodeState::Master);
    }
}
