//! Process identity.

use rollcall_core::IdentityError;
use rollcall_core::ServerId;
use rollcall_core::ServerType;
use rollcall_core::Zone;
use uuid::Uuid;

/// The server type, zone and unique id of this process.
///
/// Built once at startup; the id never changes for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    server_id: ServerId,
}

impl NodeIdentity {
    /// Mint a fresh `type:zone:uuid` identity from a random v4 UUID.
    pub fn generate(server_type: &ServerType, zone: Zone) -> Result<Self, IdentityError> {
        let suffix = Uuid::new_v4().hyphenated().to_string();
        Self::with_suffix(server_type, zone, &suffix)
    }

    /// Identity with a caller-chosen suffix, for deterministic tests.
    pub fn with_suffix(server_type: &ServerType, zone: Zone, suffix: &str) -> Result<Self, IdentityError> {
        let server_id = ServerId::new(server_type.clone(), zone, suffix)?;
        Ok(Self { server_id })
    }

    /// The full server id.
    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// Server type of this process.
    pub fn server_type(&self) -> &ServerType {
        self.server_id.server_type()
    }

    /// Zone of this process.
    pub fn zone(&self) -> Zone {
        self.server_id.zone()
    }
}
