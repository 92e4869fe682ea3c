//! Centralized constants for rollcall.
//!
//! Tiger Style: Constants are fixed and immutable, enforced at compile time.
//! Each constant has explicit bounds to prevent unbounded resource allocation.

// ============================================================================
// Store layout
// ============================================================================

/// Root of the presence hierarchy: `/servers/<type>/<zone>/<serverId>`.
pub const SERVERS_ROOT: &str = "/servers";

/// Root of the leader-marker hierarchy: `/master/<type>/<zone>`.
pub const MASTER_ROOT: &str = "/master";

/// Payload written into persistent directory nodes under `/servers`.
pub const SERVER_DIR_PAYLOAD: &str = "server list";

/// Payload written into persistent zone directory nodes.
pub const ZONE_DIR_PAYLOAD: &str = "zone";

/// Payload written into persistent directory nodes under `/master`.
pub const MASTER_DIR_PAYLOAD: &str = "master";

// ============================================================================
// Session
// ============================================================================

/// Default store session timeout (5 seconds).
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 5_000;

/// Upper bound for a configured session timeout (2 minutes).
pub const MAX_SESSION_TIMEOUT_MS: u64 = 120_000;

/// Default coordination store address.
pub const DEFAULT_STORE_ADDRESS: &str = "127.0.0.1:2181";

// ============================================================================
// Identity
// ============================================================================

/// Maximum length of a server type name in bytes.
pub const MAX_SERVER_TYPE_LEN: u32 = 128;

/// Maximum length of a full server id (`type:zone:uuid`) in bytes.
pub const MAX_SERVER_ID_LEN: u32 = 256;

// ============================================================================
// Election and discovery
// ============================================================================

/// Maximum create-then-read rounds during one leader marker evaluation.
///
/// A round only repeats when the marker vanishes between our create attempt
/// and the read, so a handful of rounds is enough even under heavy churn.
pub const MAX_ELECTION_ATTEMPTS: u32 = 8;

/// Maximum consecutive re-deliveries of one watch target after its re-arm
/// failed with a transient store error.
///
/// Past this the target waits for the session to be restored, which
/// re-derives election and discovery state from scratch.
pub const MAX_REARM_RETRIES: u32 = 8;

/// Maximum number of watch selectors a registry accepts.
pub const MAX_WATCH_SELECTORS: u32 = 1_024;

/// Maximum payload size of a store node (ZooKeeper's default jute limit).
pub const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;
