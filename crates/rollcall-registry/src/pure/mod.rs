//! Pure functions extracted from the election and discovery engines.
//!
//! "Functional Core, Imperative Shell": everything here is deterministic and
//! side-effect free, which keeps the state machines testable with explicit
//! inputs and property tests, with no store or reactor involved.
//!
//! - [`election`]: leader marker interpretation, reportable transitions
//! - [`discovery`]: watch scope, snapshot classification, add/remove diffs
//!
//! # Tiger Style
//!
//! - Explicit state machine transitions
//! - Bounded collections (selector count capped by the caller)
//! - No panics - all functions are total

pub mod discovery;
pub mod election;

pub use discovery::InstanceSnapshot;
pub use discovery::ServerDiff;
pub use discovery::WatchScope;
pub use discovery::classify_instances;
pub use discovery::compute_server_diff;
pub use election::compute_node_state;
pub use election::next_reportable_state;
