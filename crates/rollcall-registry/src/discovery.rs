//! Watch-driven discovery of live instances.
//!
//! For every watched server type the engine keeps a chain of one-shot
//! watches over the presence hierarchy:
//!
//! ```text
//! exists(/servers/<type>)            fires when the type appears or vanishes
//!   get_children(/servers/<type>)    fires when zones come and go
//!     get_children(.../<zone>)       fires when instances come and go
//! ```
//!
//! Every firing re-arms the watch with the same call that reads the fresh
//! listing, then diffs that listing against the ids last reported for the
//! zone (see [`compute_server_diff`]). Removals are emitted before
//! additions; additions carry the instance's published info string.
//!
//! The engine tracks which watches are outstanding so a listing is re-armed
//! once per firing rather than once per code path that reads it.
//!
//! A re-arm that fails with a transient store error leaves no watch behind,
//! so the target is handed back through [`WatchFactory::retry`] and handled
//! again on a later drain, up to [`MAX_REARM_RETRIES`] times in a row. Past
//! that, the session restore path resyncs everything.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;

use rollcall_core::CoordinationStore;
use rollcall_core::EventType;
use rollcall_core::ServerId;
use rollcall_core::ServerType;
use rollcall_core::StoreError;
use rollcall_core::WatchSelector;
use rollcall_core::WatchedEvent;
use rollcall_core::Zone;
use rollcall_core::constants::MAX_REARM_RETRIES;
use rollcall_core::constants::MAX_WATCH_SELECTORS;
use rollcall_core::paths;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::error::RegistryError;
use crate::pure::WatchScope;
use crate::pure::classify_instances;
use crate::pure::compute_server_diff;
use crate::watcher::WatchFactory;
use crate::watcher::WatchTarget;

/// A change in the set of live instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// An in-scope instance appeared.
    Added {
        /// Its server type.
        server_type: ServerType,
        /// Its zone.
        zone: Zone,
        /// Its id.
        server_id: ServerId,
        /// Payload of its presence entry.
        info: String,
    },
    /// A previously added instance is gone.
    Removed {
        /// Its id.
        server_id: ServerId,
    },
}

/// Discovery state for all watched selectors.
#[derive(Debug, Default)]
pub struct DiscoveryEngine {
    scope: WatchScope,
    /// Ids reported as added and not yet removed, per type.
    server_lists: BTreeMap<ServerType, BTreeSet<ServerId>>,
    existence_armed: BTreeSet<ServerType>,
    zone_lists_armed: BTreeSet<ServerType>,
    instance_lists_armed: BTreeSet<(ServerType, Zone)>,
    /// Consecutive failed re-arms per target.
    rearm_failures: HashMap<WatchTarget, u32>,
    started: bool,
}

impl DiscoveryEngine {
    /// Engine with an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a watch selector. Duplicates collapse (returns false).
    pub fn add_selector(&mut self, selector: WatchSelector) -> Result<bool, RegistryError> {
        if self.started {
            return Err(RegistryError::SelectorsFrozen);
        }
        if !self.scope.contains_selector(&selector) && self.scope.len() >= MAX_WATCH_SELECTORS {
            return Err(RegistryError::TooManySelectors {
                max: MAX_WATCH_SELECTORS,
            });
        }
        Ok(self.scope.insert(selector))
    }

    /// Active selectors.
    pub fn scope(&self) -> &WatchScope {
        &self.scope
    }

    /// Whether [`start`](Self::start) has run.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Ids currently tracked for `server_type`, sorted.
    pub fn tracked(&self, server_type: &ServerType) -> Vec<ServerId> {
        self.server_lists.get(server_type).map(|ids| ids.iter().cloned().collect()).unwrap_or_default()
    }

    /// Arm the watch chain of every selected type and report what is live.
    ///
    /// Freezes the selectors. Failures are fatal.
    pub fn start(
        &mut self,
        store: &dyn CoordinationStore,
        watches: &dyn WatchFactory,
    ) -> Result<Vec<DiscoveryEvent>, RegistryError> {
        self.started = true;
        let mut out = Vec::new();
        for server_type in self.scope.server_types() {
            self.arm_type(store, watches, &server_type, &mut out).inspect_err(|e| {
                error!(server_type = %server_type, error = %e, "failed to start discovery watch");
            })?;
        }
        info!(selectors = self.scope.len(), initial = out.len(), "discovery watches armed");
        Ok(out)
    }

    /// `/servers/<type>` was created, deleted or changed.
    pub fn on_type_event(
        &mut self,
        store: &dyn CoordinationStore,
        watches: &dyn WatchFactory,
        server_type: &ServerType,
    ) -> Vec<DiscoveryEvent> {
        self.existence_armed.remove(server_type);
        let mut out = Vec::new();
        let result = self.arm_type(store, watches, server_type, &mut out);
        let target = WatchTarget::ServerType {
            server_type: server_type.clone(),
        };
        self.finish_rearm(watches, target, result);
        out
    }

    /// The zone set under `/servers/<type>` changed.
    pub fn on_zone_list_event(
        &mut self,
        store: &dyn CoordinationStore,
        watches: &dyn WatchFactory,
        server_type: &ServerType,
    ) -> Vec<DiscoveryEvent> {
        self.zone_lists_armed.remove(server_type);
        let mut out = Vec::new();
        let result = self.arm_type(store, watches, server_type, &mut out);
        let target = WatchTarget::ZoneList {
            server_type: server_type.clone(),
        };
        self.finish_rearm(watches, target, result);
        out
    }

    /// The instance set under `/servers/<type>/<zone>` changed.
    pub fn on_instance_event(
        &mut self,
        store: &dyn CoordinationStore,
        watches: &dyn WatchFactory,
        server_type: &ServerType,
        zone: Zone,
    ) -> Vec<DiscoveryEvent> {
        self.instance_lists_armed.remove(&(server_type.clone(), zone));
        let mut out = Vec::new();
        let mut result = self.list_instances(store, watches, server_type, zone, &mut out);
        if result.is_ok() && !self.zone_lists_armed.contains(server_type) {
            result = self.arm_type(store, watches, server_type, &mut out);
        }
        let target = WatchTarget::InstanceList {
            server_type: server_type.clone(),
            zone,
        };
        self.finish_rearm(watches, target, result);
        out
    }

    /// Re-arm every chain from scratch and re-diff against the store.
    ///
    /// Used after the session reconnects, when notifications may have been
    /// lost. Duplicate watches left over from before are harmless: each
    /// firing only re-lists and re-diffs.
    pub fn resync(&mut self, store: &dyn CoordinationStore, watches: &dyn WatchFactory) -> Vec<DiscoveryEvent> {
        if !self.started {
            return Vec::new();
        }
        self.existence_armed.clear();
        self.zone_lists_armed.clear();
        self.instance_lists_armed.clear();
        self.rearm_failures.clear();

        let mut out = Vec::new();
        for server_type in self.scope.server_types() {
            let result = self.arm_type(store, watches, &server_type, &mut out);
            self.finish_rearm(watches, WatchTarget::ServerType { server_type }, result);
        }
        debug!(events = out.len(), "discovery resynced");
        out
    }

    /// Record how re-arming `target` went and queue a retry after a
    /// transient failure.
    fn finish_rearm(&mut self, watches: &dyn WatchFactory, target: WatchTarget, result: Result<(), RegistryError>) {
        let e = match result {
            Ok(()) => {
                self.rearm_failures.remove(&target);
                return;
            }
            Err(e) => e,
        };
        warn!(target_kind = ?target, error = %e, "failed to re-arm discovery watch");
        if !e.is_transient() {
            return;
        }
        let (event_type, path) = match &target {
            WatchTarget::ServerType { server_type } => {
                (EventType::NodeCreated, paths::server_type_path(server_type.as_str()))
            }
            WatchTarget::ZoneList { server_type } => {
                (EventType::NodeChildrenChanged, paths::server_type_path(server_type.as_str()))
            }
            WatchTarget::InstanceList { server_type, zone } => {
                (EventType::NodeChildrenChanged, paths::zone_path(server_type.as_str(), *zone))
            }
            WatchTarget::Session | WatchTarget::LeaderMarker => return,
        };

        let failures = self.rearm_failures.entry(target.clone()).or_default();
        if *failures >= MAX_REARM_RETRIES {
            warn!(path = %path, failures = *failures, "discovery watch unreachable, waiting for session restore");
            return;
        }
        *failures += 1;
        debug!(path = %path, failure = *failures, "scheduling discovery watch retry");
        watches.retry(target, WatchedEvent::node(event_type, path));
    }

    fn arm_type(
        &mut self,
        store: &dyn CoordinationStore,
        watches: &dyn WatchFactory,
        server_type: &ServerType,
        out: &mut Vec<DiscoveryEvent>,
    ) -> Result<(), RegistryError> {
        let type_path = paths::server_type_path(server_type.as_str());
        if !self.existence_armed.contains(server_type) {
            let watcher = watches.watcher(WatchTarget::ServerType {
                server_type: server_type.clone(),
            });
            let present = store.exists(&type_path, Some(watcher)).map_err(|source| watch_error(&type_path, source))?;
            self.existence_armed.insert(server_type.clone());
            if !present {
                debug!(path = %type_path, "server type not present, waiting for it");
                self.type_vanished(server_type, out);
                return Ok(());
            }
        }
        if self.zone_lists_armed.contains(server_type) {
            return Ok(());
        }
        self.list_zones(store, watches, server_type, out)
    }

    fn list_zones(
        &mut self,
        store: &dyn CoordinationStore,
        watches: &dyn WatchFactory,
        server_type: &ServerType,
        out: &mut Vec<DiscoveryEvent>,
    ) -> Result<(), RegistryError> {
        let type_path = paths::server_type_path(server_type.as_str());
        let watcher = watches.watcher(WatchTarget::ZoneList {
            server_type: server_type.clone(),
        });
        let children = match store.get_children(&type_path, Some(watcher)) {
            Ok(children) => children,
            Err(e) if e.is_no_node() => {
                // The existence watch is outstanding and reports re-creation.
                debug!(path = %type_path, "server type vanished");
                self.type_vanished(server_type, out);
                return Ok(());
            }
            Err(source) => return Err(watch_error(&type_path, source)),
        };
        self.zone_lists_armed.insert(server_type.clone());

        let mut listed = BTreeSet::new();
        for child in &children {
            match paths::parse_zone(child) {
                Some(zone) => {
                    listed.insert(zone);
                }
                None => warn!(path = %type_path, child = %child, "skipping non-numeric zone directory"),
            }
        }

        for zone in self.known_zones(server_type) {
            if !listed.contains(&zone) {
                self.zone_vanished(server_type, zone, out);
            }
        }
        for zone in listed {
            let armed = self.instance_lists_armed.contains(&(server_type.clone(), zone));
            if self.scope.contains_zone(server_type, zone) && !armed {
                self.list_instances(store, watches, server_type, zone, out)?;
            }
        }
        Ok(())
    }

    fn list_instances(
        &mut self,
        store: &dyn CoordinationStore,
        watches: &dyn WatchFactory,
        server_type: &ServerType,
        zone: Zone,
        out: &mut Vec<DiscoveryEvent>,
    ) -> Result<(), RegistryError> {
        let zone_path = paths::zone_path(server_type.as_str(), zone);
        let watcher = watches.watcher(WatchTarget::InstanceList {
            server_type: server_type.clone(),
            zone,
        });
        match store.get_children(&zone_path, Some(watcher)) {
            Ok(children) => {
                self.instance_lists_armed.insert((server_type.clone(), zone));
                let snapshot = classify_instances(server_type, zone, &children);
                for (child, reason) in &snapshot.rejected {
                    warn!(path = %zone_path, child = %child, reason = %reason, "skipping malformed instance entry");
                }
                self.apply_snapshot(store, server_type, zone, snapshot.ids, out);
                Ok(())
            }
            Err(e) if e.is_no_node() => {
                debug!(path = %zone_path, "zone vanished");
                self.zone_vanished(server_type, zone, out);
                Ok(())
            }
            Err(source) => Err(watch_error(&zone_path, source)),
        }
    }

    /// Diff one zone listing against its baseline and emit the changes.
    fn apply_snapshot(
        &mut self,
        store: &dyn CoordinationStore,
        server_type: &ServerType,
        zone: Zone,
        current: BTreeSet<ServerId>,
        out: &mut Vec<DiscoveryEvent>,
    ) {
        let tracked: BTreeSet<ServerId> = self
            .server_lists
            .get(server_type)
            .map(|ids| ids.iter().filter(|id| id.zone() == zone).cloned().collect())
            .unwrap_or_default();
        let diff = compute_server_diff(&tracked, &current, &self.scope);
        if diff.is_empty() {
            return;
        }
        debug!(
            server_type = %server_type,
            zone,
            removed = diff.removed.len(),
            added = diff.added.len(),
            "instance set changed"
        );

        let list = self.server_lists.entry(server_type.clone()).or_default();
        for server_id in diff.removed {
            list.remove(&server_id);
            out.push(DiscoveryEvent::Removed { server_id });
        }
        for server_id in diff.added {
            let path = paths::instance_path(server_type.as_str(), zone, &server_id);
            let info = match store.get_data(&path, None) {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(info) => info,
                    Err(_) => {
                        warn!(path = %path, "instance info is not UTF-8, skipping");
                        continue;
                    }
                },
                Err(StoreError::NoNode { .. }) => {
                    debug!(path = %path, "instance left before its info was read");
                    continue;
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "failed to read instance info, skipping");
                    continue;
                }
            };
            list.insert(server_id.clone());
            out.push(DiscoveryEvent::Added {
                server_type: server_type.clone(),
                zone,
                server_id,
                info,
            });
        }
    }

    /// Zones of `server_type` with tracked ids or an outstanding watch.
    fn known_zones(&self, server_type: &ServerType) -> BTreeSet<Zone> {
        let tracked = self.server_lists.get(server_type).into_iter().flatten().map(ServerId::zone);
        let armed = self.instance_lists_armed.iter().filter(|(t, _)| t == server_type).map(|(_, zone)| *zone);
        tracked.chain(armed).collect()
    }

    fn zone_vanished(&mut self, server_type: &ServerType, zone: Zone, out: &mut Vec<DiscoveryEvent>) {
        self.instance_lists_armed.remove(&(server_type.clone(), zone));
        let Some(list) = self.server_lists.get_mut(server_type) else {
            return;
        };
        let gone: Vec<ServerId> = list.iter().filter(|id| id.zone() == zone).cloned().collect();
        for server_id in gone {
            list.remove(&server_id);
            out.push(DiscoveryEvent::Removed { server_id });
        }
    }

    fn type_vanished(&mut self, server_type: &ServerType, out: &mut Vec<DiscoveryEvent>) {
        self.zone_lists_armed.remove(server_type);
        for zone in self.known_zones(server_type) {
            self.zone_vanished(server_type, zone, out);
        }
    }
}

fn watch_error(path: &str, source: StoreError) -> RegistryError {
    RegistryError::Watch {
        path: path.to_string(),
        source,
    }
}
