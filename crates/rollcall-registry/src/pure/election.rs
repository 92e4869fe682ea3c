//! Pure election computation functions.
//!
//! # State Machine
//!
//! ```text
//! INIT --register--> MASTER | SLAVE
//! MASTER <--marker event / demotion--> SLAVE
//! ```
//!
//! Nothing ever returns to INIT.

use rollcall_core::NodeState;

/// Interpret the leader marker payload.
///
/// MASTER iff the payload is exactly our own server id. Anything else,
/// including a payload that is not UTF-8, means someone else leads: a node
/// must never promote itself on ambiguous information.
///
/// # Example
///
/// ```ignore
/// assert_eq!(compute_node_state(b"echo:0:a", "echo:0:a"), NodeState::Master);
/// assert_eq!(compute_node_state(b"echo:0:b", "echo:0:a"), NodeState::Slave);
/// ```
#[inline]
pub fn compute_node_state(marker_payload: &[u8], own_id: &str) -> NodeState {
    match std::str::from_utf8(marker_payload) {
        Ok(leader) if leader == own_id => NodeState::Master,
        _ => NodeState::Slave,
    }
}

/// The transition to report to the state-change handler, if any.
///
/// Repeats are suppressed, and `Init` is never a valid target.
#[inline]
pub fn next_reportable_state(previous: NodeState, next: NodeState) -> Option<NodeState> {
    if next == NodeState::Init || next == previous {
        None
    } else {
        Some(next)
    }
}
