//! Handler slots exposed to the embedding service.
//!
//! All handlers run on the reactor thread. A panicking handler is not
//! caught; it propagates out of `run_pending`.

use rollcall_core::NodeState;
use rollcall_core::ServerId;
use rollcall_core::ServerType;
use rollcall_core::Zone;

use crate::discovery::DiscoveryEvent;

/// Called with the new state on every leadership change after registration.
pub type NodeStateChangeHandler = Box<dyn FnMut(NodeState) + Send>;

/// Called once per discovered instance: `(type, zone, id, info)`.
pub type AddServerHandler = Box<dyn FnMut(&ServerType, Zone, &ServerId, &str) + Send>;

/// Called once per departed instance.
pub type DelServerHandler = Box<dyn FnMut(&ServerId) + Send>;

/// Supplies the info string published with this node's presence entry.
pub type ServerInfoHandler = Box<dyn Fn() -> String + Send>;

#[derive(Default)]
pub(crate) struct Handlers {
    pub(crate) state_change: Option<NodeStateChangeHandler>,
    pub(crate) add_server: Option<AddServerHandler>,
    pub(crate) del_server: Option<DelServerHandler>,
    pub(crate) server_info: Option<ServerInfoHandler>,
}

impl Handlers {
    pub(crate) fn notify_state(&mut self, state: NodeState) {
        if let Some(handler) = self.state_change.as_mut() {
            handler(state);
        }
    }

    /// Deliver discovery events in order.
    pub(crate) fn dispatch(&mut self, events: Vec<DiscoveryEvent>) {
        for event in events {
            match event {
                DiscoveryEvent::Added {
                    server_type,
                    zone,
                    server_id,
                    info,
                } => {
                    if let Some(handler) = self.add_server.as_mut() {
                        handler(&server_type, zone, &server_id, &info);
                    }
                }
                DiscoveryEvent::Removed { server_id } => {
                    if let Some(handler) = self.del_server.as_mut() {
                        handler(&server_id);
                    }
                }
            }
        }
    }

    /// Info payload for the presence entry; empty without a handler.
    pub(crate) fn server_info(&self) -> String {
        self.server_info.as_ref().map(|handler| handler()).unwrap_or_default()
    }
}
