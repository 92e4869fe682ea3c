//! Master/slave election over an ephemeral leader marker.
//!
//! Every contender of a (type, zone) tries to create `/master/<type>/<zone>`
//! as an ephemeral node holding its own server id. Whoever's id the marker
//! holds is MASTER; everyone else is SLAVE and keeps a one-shot watch on the
//! marker. When the leader's session ends the marker vanishes, the watches
//! fire, and the contenders race to recreate it.
//!
//! # Race-free re-evaluation
//!
//! Each evaluation re-arms the marker watch with the same `get_data` that
//! reads the current holder, so a change between "event delivered" and
//! "watch re-armed" is always observed by the fresh read.
//!
//! # Failure policy
//!
//! Failures during the initial registration are fatal. Failures during a
//! later re-evaluation demote the node to SLAVE; a node never promotes itself
//! on ambiguous information. A transient failure also schedules another
//! evaluation through the [`WatchFactory`], so the marker is never left
//! without a pending watch. After [`MAX_REARM_RETRIES`] consecutive failures
//! the engine waits for the session to be restored.

use rollcall_core::CoordinationStore;
use rollcall_core::CreateMode;
use rollcall_core::EventType;
use rollcall_core::NodeMode;
use rollcall_core::NodeState;
use rollcall_core::ServerId;
use rollcall_core::StoreError;
use rollcall_core::WatchedEvent;
use rollcall_core::constants::MASTER_DIR_PAYLOAD;
use rollcall_core::constants::MAX_ELECTION_ATTEMPTS;
use rollcall_core::constants::MAX_REARM_RETRIES;
use rollcall_core::ensure_persistent_path;
use rollcall_core::paths;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::error::RegistryError;
use crate::identity::NodeIdentity;
use crate::pure::compute_node_state;
use crate::pure::next_reportable_state;
use crate::watcher::WatchFactory;
use crate::watcher::WatchTarget;

/// How this node takes part in leadership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionMode {
    /// `MASTER_SLAVE`: contest the marker at `marker_path`.
    Contested {
        /// `/master/<type>/<zone>`.
        marker_path: String,
        /// Our id, written as the marker payload.
        server_id: ServerId,
    },
    /// `MASTER_MASTER`: always leader, no marker and no watches.
    Uncontested,
}

/// Election state machine for one node.
///
/// The current state is published on a [`watch`] channel, so observers can
/// [`subscribe`](Self::subscribe) instead of polling.
pub struct ElectionEngine {
    mode: ElectionMode,
    state_tx: watch::Sender<NodeState>,
    /// Consecutive failed re-evaluations.
    rearm_failures: u32,
}

impl ElectionEngine {
    /// Engine with its own state channel.
    pub fn new(identity: &NodeIdentity, mode: NodeMode) -> Self {
        let (state_tx, _state_rx) = watch::channel(NodeState::Init);
        Self::with_sender(identity, mode, state_tx)
    }

    /// Engine publishing into an existing state channel.
    pub fn with_sender(identity: &NodeIdentity, mode: NodeMode, state_tx: watch::Sender<NodeState>) -> Self {
        let mode = match mode {
            NodeMode::MasterSlave => ElectionMode::Contested {
                marker_path: paths::marker_path(identity.server_type().as_str(), identity.zone()),
                server_id: identity.server_id().clone(),
            },
            NodeMode::MasterMaster => ElectionMode::Uncontested,
        };
        Self {
            mode,
            state_tx,
            rearm_failures: 0,
        }
    }

    /// The election variant.
    pub fn mode(&self) -> &ElectionMode {
        &self.mode
    }

    /// Current leadership state.
    pub fn state(&self) -> NodeState {
        *self.state_tx.borrow()
    }

    /// Receiver of leadership state updates.
    pub fn subscribe(&self) -> watch::Receiver<NodeState> {
        self.state_tx.subscribe()
    }

    /// Initial registration: `INIT -> MASTER | SLAVE`.
    ///
    /// Creates the `/master/<type>` hierarchy, then contests the marker.
    /// Every failure here is fatal. The resulting state is published but not
    /// reported as a change.
    pub fn register(
        &mut self,
        store: &dyn CoordinationStore,
        watches: &dyn WatchFactory,
    ) -> Result<NodeState, RegistryError> {
        let state = match &self.mode {
            ElectionMode::Uncontested => NodeState::Master,
            ElectionMode::Contested { server_id, .. } => {
                let type_dir = paths::master_type_path(server_id.server_type().as_str());
                ensure_persistent_path(store, &type_dir, MASTER_DIR_PAYLOAD.as_bytes()).map_err(|source| {
                    error!(path = %type_dir, error = %source, "failed to create leader marker directory");
                    RegistryError::CreatePath {
                        path: type_dir.clone(),
                        source,
                    }
                })?;
                self.evaluate(store, watches).inspect_err(|e| {
                    error!(error = %e, "initial leader election failed");
                })?
            }
        };

        self.publish(state);
        info!(state = %state, mode = ?self.mode, "election registered");
        Ok(state)
    }

    /// The leader marker changed: re-arm, re-read and report any transition.
    pub fn on_marker_event(&mut self, store: &dyn CoordinationStore, watches: &dyn WatchFactory) -> Option<NodeState> {
        self.reevaluate(store, watches, "leader marker changed")
    }

    /// The session reconnected: watches may have been missed, so re-derive.
    pub fn on_session_restored(
        &mut self,
        store: &dyn CoordinationStore,
        watches: &dyn WatchFactory,
    ) -> Option<NodeState> {
        self.reevaluate(store, watches, "session restored")
    }

    /// Step down to SLAVE (session lost or unreachable).
    ///
    /// No-op before registration and under `MASTER_MASTER`.
    pub fn demote(&mut self) -> Option<NodeState> {
        if matches!(self.mode, ElectionMode::Uncontested) || self.state() == NodeState::Init {
            return None;
        }
        self.publish(NodeState::Slave)
    }

    fn reevaluate(
        &mut self,
        store: &dyn CoordinationStore,
        watches: &dyn WatchFactory,
        reason: &'static str,
    ) -> Option<NodeState> {
        if matches!(self.mode, ElectionMode::Uncontested) || self.state() == NodeState::Init {
            return None;
        }
        let next = match self.evaluate(store, watches) {
            Ok(state) => {
                self.rearm_failures = 0;
                state
            }
            Err(e) => {
                warn!(error = %e, reason, "leader marker re-evaluation failed, demoting to slave");
                if e.is_transient() {
                    self.schedule_retry(watches);
                }
                NodeState::Slave
            }
        };
        let change = self.publish(next);
        if let Some(state) = change {
            info!(state = %state, reason, "leadership changed");
        }
        change
    }

    /// Queue another evaluation unless the retry budget is spent.
    fn schedule_retry(&mut self, watches: &dyn WatchFactory) {
        let ElectionMode::Contested { marker_path, .. } = &self.mode else {
            return;
        };
        if self.rearm_failures >= MAX_REARM_RETRIES {
            warn!(
                path = %marker_path,
                failures = self.rearm_failures,
                "leader marker unreachable, waiting for session restore"
            );
            return;
        }
        self.rearm_failures += 1;
        debug!(path = %marker_path, failure = self.rearm_failures, "scheduling leader marker retry");
        watches.retry(WatchTarget::LeaderMarker, WatchedEvent::node(EventType::NodeDataChanged, marker_path.as_str()));
    }

    /// Create-if-absent the marker, then re-arm and read it.
    ///
    /// A transient create failure does not skip the read: the read re-arms
    /// the watch, and an absent marker is contested again on the next round.
    fn evaluate(&self, store: &dyn CoordinationStore, watches: &dyn WatchFactory) -> Result<NodeState, RegistryError> {
        let ElectionMode::Contested { marker_path, server_id } = &self.mode else {
            return Ok(NodeState::Master);
        };
        let election_error = |source: StoreError| RegistryError::Election {
            path: marker_path.clone(),
            source,
        };

        let mut create_failure = None;
        for attempt in 1..=MAX_ELECTION_ATTEMPTS {
            create_failure = match store.create(marker_path, server_id.as_str().as_bytes(), CreateMode::Ephemeral) {
                Ok(_) => {
                    debug!(path = %marker_path, "created leader marker");
                    None
                }
                Err(e) if e.is_node_exists() => None,
                Err(e) if e.is_transient() => {
                    debug!(path = %marker_path, attempt, error = %e, "leader marker create failed, reading anyway");
                    Some(e)
                }
                Err(e) => return Err(election_error(e)),
            };

            match store.get_data(marker_path, Some(watches.watcher(WatchTarget::LeaderMarker))) {
                Ok(payload) => {
                    let state = compute_node_state(&payload, server_id.as_str());
                    debug!(path = %marker_path, state = %state, attempt, "read leader marker");
                    return Ok(state);
                }
                Err(e) if e.is_no_node() => {
                    debug!(path = %marker_path, attempt, "leader marker vanished before read, retrying");
                }
                Err(e) => return Err(election_error(e)),
            }
        }

        match create_failure {
            Some(e) => Err(election_error(e)),
            None => Err(RegistryError::ElectionContended {
                path: marker_path.clone(),
                attempts: MAX_ELECTION_ATTEMPTS,
            }),
        }
    }

    fn publish(&mut self, next: NodeState) -> Option<NodeState> {
        let change = next_reportable_state(self.state(), next);
        if let Some(state) = change {
            self.state_tx.send_replace(state);
        }
        change
    }
}

impl std::fmt::Debug for ElectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElectionEngine").field("mode", &self.mode).field("state", &self.state()).finish()
    }
}
