//! Registry lifecycle states and call-order enforcement.

use std::fmt;

use crate::error::RegistryError;

/// Where a registry is in its startup sequence.
///
/// ```text
/// Configuring -> Identified -> Connected -> Registered -> Watching
///       \____________\______________\____________\__________\--> Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Lifecycle {
    /// Accepting configuration; no identity yet.
    Configuring,
    /// Server id assigned.
    Identified,
    /// Store session established.
    Connected,
    /// Presence published and election run.
    Registered,
    /// Discovery watches armed.
    Watching,
    /// Session released; terminal.
    Stopped,
}

impl Lifecycle {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuring => "configuring",
            Self::Identified => "identified",
            Self::Connected => "connected",
            Self::Registered => "registered",
            Self::Watching => "watching",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fail with [`RegistryError::Lifecycle`] unless `current` is `expected`.
pub(crate) fn require(operation: &'static str, current: Lifecycle, expected: Lifecycle) -> Result<(), RegistryError> {
    if current == expected {
        Ok(())
    } else {
        Err(RegistryError::Lifecycle {
            operation,
            state: current,
        })
    }
}

/// Fail unless the registry has not stopped.
pub(crate) fn require_running(operation: &'static str, current: Lifecycle) -> Result<(), RegistryError> {
    if current == Lifecycle::Stopped {
        Err(RegistryError::Lifecycle {
            operation,
            state: current,
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require() {
        assert!(require("connect", Lifecycle::Identified, Lifecycle::Identified).is_ok());
        let err = require("connect", Lifecycle::Configuring, Lifecycle::Identified).unwrap_err();
        assert_eq!(err.to_string(), "connect is not allowed while configuring");
    }

    #[test]
    fn test_require_running() {
        assert!(require_running("set handler", Lifecycle::Watching).is_ok());
        assert!(require_running("set handler", Lifecycle::Stopped).is_err());
    }

    #[test]
    fn test_order() {
        assert!(Lifecycle::Configuring < Lifecycle::Identified);
        assert!(Lifecycle::Registered < Lifecycle::Watching);
    }
}
