//! Error types for the coordination store and node identities.

use snafu::Snafu;

/// Errors returned by a coordination store client.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// The node (or its parent, on create) does not exist.
    #[snafu(display("node '{path}' does not exist"))]
    NoNode {
        /// Path that was addressed.
        path: String,
    },

    /// Create-if-absent found the node already present.
    #[snafu(display("node '{path}' already exists"))]
    NodeExists {
        /// Path that was addressed.
        path: String,
    },

    /// Ephemeral nodes cannot have children.
    #[snafu(display("cannot create children under ephemeral node '{path}'"))]
    NoChildrenForEphemerals {
        /// The ephemeral parent path.
        path: String,
    },

    /// Deleting a node that still has children.
    #[snafu(display("node '{path}' has children"))]
    NotEmpty {
        /// Path that was addressed.
        path: String,
    },

    /// The path is syntactically invalid.
    #[snafu(display("invalid path '{path}': {reason}"))]
    InvalidPath {
        /// Offending path.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The payload exceeds the store's node size limit.
    #[snafu(display("payload for '{path}' is {size} bytes (max: {max})"))]
    PayloadTooLarge {
        /// Path that was addressed.
        path: String,
        /// Payload size in bytes.
        size: u32,
        /// Maximum payload size.
        max: u32,
    },

    /// The connection to the store was lost; the session may still be alive.
    #[snafu(display("connection to coordination store lost"))]
    ConnectionLoss,

    /// The session expired; all its ephemeral nodes are gone.
    #[snafu(display("coordination store session expired"))]
    SessionExpired,

    /// The session was closed by its owner.
    #[snafu(display("coordination store session closed"))]
    Closed,

    /// Establishing a session failed.
    #[snafu(display("failed to connect to coordination store at '{address}': {reason}"))]
    ConnectFailed {
        /// Address that was dialed.
        address: String,
        /// Description of the failure.
        reason: String,
    },
}

impl StoreError {
    /// Returns true when retrying on the same session may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::ConnectionLoss)
    }

    /// Returns true for `NoNode`.
    pub fn is_no_node(&self) -> bool {
        matches!(self, StoreError::NoNode { .. })
    }

    /// Returns true for `NodeExists`.
    pub fn is_node_exists(&self) -> bool {
        matches!(self, StoreError::NodeExists { .. })
    }
}

/// Errors from building or parsing node identities.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum IdentityError {
    /// No server type was configured.
    #[snafu(display("server type must not be empty"))]
    EmptyServerType,

    /// The server type would corrupt the id or path layout.
    #[snafu(display("invalid server type '{server_type}': {reason}"))]
    InvalidServerType {
        /// The rejected name.
        server_type: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A server id string did not have the `type:zone:uuid` shape.
    #[snafu(display("malformed server id '{id}': {reason}"))]
    MalformedServerId {
        /// The rejected id.
        id: String,
        /// Why it was rejected.
        reason: String,
    },
}
