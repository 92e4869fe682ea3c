//! Error types for the registry.

use rollcall_core::IdentityError;
use rollcall_core::StoreError;
use snafu::Snafu;

use crate::config::ConfigError;
use crate::registry::Lifecycle;

/// Errors from registry operations.
///
/// Startup failures (identity, connect, presence, initial election, initial
/// watches) are fatal: the process cannot take part in election or discovery
/// without corrupting its peers' view. Callers should log and exit.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RegistryError {
    /// Operation called in the wrong lifecycle state.
    #[snafu(display("{operation} is not allowed while {state}"))]
    Lifecycle {
        /// The rejected operation.
        operation: &'static str,
        /// State the registry was in.
        state: Lifecycle,
    },

    /// `set_server_type` was never called.
    #[snafu(display("server type must be set before {operation}"))]
    MissingServerType {
        /// The operation that needed it.
        operation: &'static str,
    },

    /// Store address was never configured.
    #[snafu(display("store address must be set before connect"))]
    MissingAddress,

    /// Building or parsing an identity failed.
    #[snafu(display("identity error: {source}"))]
    Identity {
        /// The underlying error.
        source: IdentityError,
    },

    /// Establishing the store session failed.
    #[snafu(display("failed to connect to '{address}': {source}"))]
    Connect {
        /// Address that was dialed.
        address: String,
        /// The underlying error.
        source: StoreError,
    },

    /// Creating a persistent directory node failed.
    #[snafu(display("failed to create '{path}': {source}"))]
    CreatePath {
        /// Directory that could not be created.
        path: String,
        /// The underlying error.
        source: StoreError,
    },

    /// Publishing this node's presence entry failed.
    #[snafu(display("failed to register presence at '{path}': {source}"))]
    Register {
        /// Instance path.
        path: String,
        /// The underlying error.
        source: StoreError,
    },

    /// Creating or reading the leader marker failed.
    #[snafu(display("leader election on '{path}' failed: {source}"))]
    Election {
        /// Marker path.
        path: String,
        /// The underlying error.
        source: StoreError,
    },

    /// The marker kept vanishing between create and read.
    #[snafu(display("leader marker '{path}' did not settle after {attempts} attempts"))]
    ElectionContended {
        /// Marker path.
        path: String,
        /// Rounds attempted.
        attempts: u32,
    },

    /// Arming a discovery watch failed.
    #[snafu(display("failed to watch '{path}': {source}"))]
    Watch {
        /// Watched path.
        path: String,
        /// The underlying error.
        source: StoreError,
    },

    /// Watch selectors cannot change once watching started.
    #[snafu(display("watch selectors are frozen once watching has started"))]
    SelectorsFrozen,

    /// Too many watch selectors.
    #[snafu(display("watch selector limit of {max} reached"))]
    TooManySelectors {
        /// Maximum allowed.
        max: u32,
    },

    /// Invalid configuration.
    #[snafu(display("configuration error: {source}"))]
    Config {
        /// The underlying error.
        source: ConfigError,
    },
}

impl RegistryError {
    /// Returns true for failures that must stop the process.
    ///
    /// Misuse of the API (wrong lifecycle state, frozen or excess selectors)
    /// is reported to the caller but is not fatal by itself.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RegistryError::Lifecycle { .. }
                | RegistryError::SelectorsFrozen
                | RegistryError::TooManySelectors { .. }
        )
    }

    /// Returns true when retrying the same step may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RegistryError::Election { source, .. } | RegistryError::Watch { source, .. } => source.is_transient(),
            RegistryError::ElectionContended { .. } => true,
            _ => false,
        }
    }
}

impl From<IdentityError> for RegistryError {
    fn from(source: IdentityError) -> Self {
        RegistryError::Identity { source }
    }
}

impl From<ConfigError> for RegistryError {
    fn from(source: ConfigError) -> Self {
        RegistryError::Config { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_failures_are_fatal() {
        let err = RegistryError::CreatePath {
            path: "/servers/echo-server".to_string(),
            source: StoreError::ConnectionLoss,
        };
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "failed to create '/servers/echo-server': connection to coordination store lost");

        assert!(RegistryError::Identity {
            source: IdentityError::EmptyServerType
        }
        .is_fatal());
    }

    #[test]
    fn test_misuse_is_not_fatal() {
        let err = RegistryError::Lifecycle {
            operation: "register",
            state: Lifecycle::Configuring,
        };
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "register is not allowed while configuring");
        assert!(!RegistryError::SelectorsFrozen.is_fatal());
    }

    #[test]
    fn test_connection_loss_is_transient() {
        let lost = RegistryError::Watch {
            path: "/servers/echo-server/0".to_string(),
            source: StoreError::ConnectionLoss,
        };
        assert!(lost.is_transient());

        let expired = RegistryError::Election {
            path: "/master/echo-server/0".to_string(),
            source: StoreError::SessionExpired,
        };
        assert!(!expired.is_transient());
        assert!(!RegistryError::SelectorsFrozen.is_transient());
    }
}
