//! Watch tokens that hand store callbacks to the reactor.
//!
//! A [`BridgeWatcher`] is registered with the store in place of a callback
//! plus context pointer. It holds only a weak handle to the bridge and the
//! session epoch it was armed under, so callbacks arriving after the
//! registry stopped are dropped instead of touching freed state.

use std::sync::Arc;
use std::sync::Weak;

use rollcall_core::ServerType;
use rollcall_core::WatchedEvent;
use rollcall_core::Watcher;
use rollcall_core::Zone;
use tracing::trace;

use crate::bridge::EventBridge;
use crate::registry::RegistryCore;

/// What an armed watch is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchTarget {
    /// Connection state of the store session.
    Session,
    /// The leader marker of this node's (type, zone).
    LeaderMarker,
    /// Existence of `/servers/<type>`.
    ServerType {
        /// Watched type.
        server_type: ServerType,
    },
    /// Zone directories under `/servers/<type>`.
    ZoneList {
        /// Watched type.
        server_type: ServerType,
    },
    /// Instances under `/servers/<type>/<zone>`.
    InstanceList {
        /// Watched type.
        server_type: ServerType,
        /// Watched zone.
        zone: Zone,
    },
}

/// Produces store watchers for a target.
///
/// The engines arm watches through this seam so they stay independent of
/// how notifications reach the reactor.
pub trait WatchFactory {
    /// A fresh one-shot watcher for `target`.
    fn watcher(&self, target: WatchTarget) -> Arc<dyn Watcher>;

    /// Deliver `event` for `target` again on a later drain, as if its watch
    /// had fired.
    fn retry(&self, target: WatchTarget, event: WatchedEvent) {
        self.watcher(target).process(event);
    }
}

/// Posts every notification it receives into the registry's bridge.
pub(crate) struct BridgeWatcher {
    bridge: Weak<EventBridge<RegistryCore>>,
    epoch: u64,
    target: WatchTarget,
}

impl BridgeWatcher {
    pub(crate) fn new(bridge: Weak<EventBridge<RegistryCore>>, epoch: u64, target: WatchTarget) -> Self {
        Self { bridge, epoch, target }
    }
}

impl Watcher for BridgeWatcher {
    fn process(&self, event: WatchedEvent) {
        let Some(bridge) = self.bridge.upgrade() else {
            trace!(target_kind = ?self.target, "registry gone, dropping store callback");
            return;
        };
        let epoch = self.epoch;
        let target = self.target.clone();
        if !bridge.post(move |core: &mut RegistryCore| core.on_watch(epoch, target, event)) {
            trace!(epoch, "bridge closed, dropping store callback");
        }
    }
}

/// Hands out [`BridgeWatcher`]s stamped with the current epoch.
pub(crate) struct BridgeWatchFactory {
    pub(crate) bridge: Weak<EventBridge<RegistryCore>>,
    pub(crate) epoch: u64,
}

impl WatchFactory for BridgeWatchFactory {
    fn watcher(&self, target: WatchTarget) -> Arc<dyn Watcher> {
        Arc::new(BridgeWatcher::new(self.bridge.clone(), self.epoch, target))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::*;

    /// Records the targets of fired watches instead of posting them.
    #[derive(Default)]
    pub(crate) struct RecordingFactory {
        pub(crate) fired: Arc<Mutex<Vec<WatchTarget>>>,
        pub(crate) armed: Mutex<Vec<WatchTarget>>,
    }

    impl RecordingFactory {
        pub(crate) fn take_fired(&self) -> Vec<WatchTarget> {
            std::mem::take(&mut *self.fired.lock())
        }
    }

    impl WatchFactory for RecordingFactory {
        fn watcher(&self, target: WatchTarget) -> Arc<dyn Watcher> {
            self.armed.lock().push(target.clone());
            let fired = self.fired.clone();
            Arc::new(move |_event: WatchedEvent| fired.lock().push(target.clone()))
        }
    }
}
