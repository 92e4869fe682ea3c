//! Shared fixtures for registry integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;

use rollcall::NodeMode;
use rollcall::NodeState;
use rollcall::Registry;
use rollcall::ServerId;
use rollcall::Zone;
use rollcall::testing::InMemoryEnsemble;

/// Store address used by every test registry.
pub const TEST_ADDRESS: &str = "mem:2181";

/// Upper bound on flush/drain rounds before [`settle`] gives up.
const MAX_SETTLE_ROUNDS: u32 = 64;

/// A handler invocation observed by a [`Recorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    State(NodeState),
    Added {
        server_type: String,
        zone: Zone,
        server_id: String,
        info: String,
    },
    Removed(String),
}

/// Captures every handler call made by one registry.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Recorder {
    /// Everything seen so far, clearing the log.
    pub fn take(&self) -> Vec<Seen> {
        std::mem::take(&mut *self.seen.lock().unwrap())
    }

    /// State changes seen so far, clearing the whole log.
    pub fn take_states(&self) -> Vec<NodeState> {
        self.take()
            .into_iter()
            .filter_map(|seen| match seen {
                Seen::State(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    fn push(&self, seen: Seen) {
        self.seen.lock().unwrap().push(seen);
    }
}

/// An initialized, unstarted registry with its identity configured.
pub fn node(ensemble: &InMemoryEnsemble, server_type: &str, zone: Zone, mode: NodeMode) -> Registry {
    let mut registry = Registry::new(Arc::new(ensemble.clone()));
    registry.init(TEST_ADDRESS).unwrap();
    registry.set_server_type(server_type, zone, mode).unwrap();
    registry
}

/// Install recording handlers on `registry`.
pub fn record(registry: &mut Registry) -> Recorder {
    let recorder = Recorder::default();

    let sink = recorder.clone();
    registry.set_node_state_change_handler(move |state| sink.push(Seen::State(state)));
    let sink = recorder.clone();
    registry.set_add_server_handler(move |server_type, zone, server_id, info| {
        sink.push(Seen::Added {
            server_type: server_type.to_string(),
            zone,
            server_id: server_id.to_string(),
            info: info.to_string(),
        })
    });
    let sink = recorder.clone();
    registry.set_del_server_handler(move |server_id| sink.push(Seen::Removed(server_id.to_string())));

    recorder
}

/// Deliver store callbacks and drain every registry until nothing is left.
pub fn settle(ensemble: &InMemoryEnsemble, registries: &mut [&mut Registry]) {
    for _ in 0..MAX_SETTLE_ROUNDS {
        ensemble.flush();
        let ran: usize = registries.iter_mut().map(|registry| registry.run_pending()).sum();
        if ran == 0 {
            return;
        }
    }
    panic!("registries did not settle after {MAX_SETTLE_ROUNDS} rounds");
}

/// Presence path of a registered server.
pub fn instance_path(server_id: &ServerId) -> String {
    format!("/servers/{}/{}/{}", server_id.server_type(), server_id.zone(), server_id)
}

/// Leader marker path of a (type, zone) group.
pub fn marker_path(server_type: &str, zone: Zone) -> String {
    format!("/master/{server_type}/{zone}")
}
