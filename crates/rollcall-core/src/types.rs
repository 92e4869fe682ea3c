//! Core data model: server types, zones, server ids, node modes and states.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::MAX_SERVER_ID_LEN;
use crate::constants::MAX_SERVER_TYPE_LEN;
use crate::error::IdentityError;

/// Deployment region/partition within a server type.
pub type Zone = i32;

/// Name of a service kind, e.g. `echo-server`.
///
/// Never empty, and never contains `:` or `/`: the first separates the
/// fields of a [`ServerId`], the second separates path components.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerType(String);

impl ServerType {
    /// Validate and wrap a server type name.
    pub fn new(name: impl Into<String>) -> Result<Self, IdentityError> {
        let name = name.into();
        if name.is_empty() {
            return Err(IdentityError::EmptyServerType);
        }
        if name.len() > MAX_SERVER_TYPE_LEN as usize {
            return Err(IdentityError::InvalidServerType {
                reason: format!("{} bytes exceeds max of {}", name.len(), MAX_SERVER_TYPE_LEN),
                server_type: name,
            });
        }
        if let Some(c) = name.chars().find(|c| *c == ':' || *c == '/' || c.is_control()) {
            return Err(IdentityError::InvalidServerType {
                reason: format!("contains forbidden character {c:?}"),
                server_type: name,
            });
        }
        Ok(Self(name))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ServerType {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServerType> for String {
    fn from(value: ServerType) -> Self {
        value.0
    }
}

impl AsRef<str> for ServerType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Globally unique identity of one running instance.
///
/// Wire format: `<type>:<zone>:<suffix>` with a decimal zone. The suffix is
/// a random UUID for ids minted by rollcall, but any non-empty text without
/// `:` is accepted so peers using other suffix schemes still parse.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerId {
    raw: String,
    server_type: ServerType,
    zone: Zone,
}

impl ServerId {
    /// Build an id from its parts.
    pub fn new(server_type: ServerType, zone: Zone, suffix: &str) -> Result<Self, IdentityError> {
        let raw = format!("{server_type}:{zone}:{suffix}");
        Self::parse(&raw)
    }

    /// Parse the `type:zone:suffix` wire format.
    pub fn parse(id: &str) -> Result<Self, IdentityError> {
        let malformed = |reason: String| IdentityError::MalformedServerId {
            id: id.to_string(),
            reason,
        };

        if id.len() > MAX_SERVER_ID_LEN as usize {
            return Err(malformed(format!("{} bytes exceeds max of {}", id.len(), MAX_SERVER_ID_LEN)));
        }

        let fields: Vec<&str> = id.split(':').collect();
        let [server_type, zone, suffix] = fields.as_slice() else {
            return Err(malformed(format!("expected 3 fields, found {}", fields.len())));
        };

        let server_type = ServerType::new(*server_type).map_err(|e| malformed(e.to_string()))?;
        let zone: Zone = zone.parse().map_err(|_| malformed(format!("zone '{zone}' is not a decimal integer")))?;
        if suffix.is_empty() {
            return Err(malformed("empty unique suffix".to_string()));
        }

        Ok(Self {
            raw: id.to_string(),
            server_type,
            zone,
        })
    }

    /// The server type embedded in this id.
    pub fn server_type(&self) -> &ServerType {
        &self.server_type
    }

    /// The zone embedded in this id.
    pub fn zone(&self) -> Zone {
        self.zone
    }

    /// The unique suffix (the third field).
    pub fn suffix(&self) -> &str {
        // Both separators are guaranteed present by `parse`.
        self.raw.splitn(3, ':').nth(2).unwrap_or_default()
    }

    /// The full wire representation.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ServerId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ServerId {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ServerId> for String {
    fn from(value: ServerId) -> Self {
        value.raw
    }
}

/// How instances of one (type, zone) share leadership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeMode {
    /// One leader per zone, contested through the leader marker.
    #[default]
    MasterSlave,
    /// Every instance is always a leader; no contest.
    MasterMaster,
}

impl NodeMode {
    /// Parse from string representation (`master_slave`, `master-master`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "master_slave" => Some(Self::MasterSlave),
            "master_master" => Some(Self::MasterMaster),
            _ => None,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MasterSlave => "master_slave",
            Self::MasterMaster => "master_master",
        }
    }
}

/// Leadership state of this node.
///
/// Starts at `Init`, moves to `Master` or `Slave` on registration and only
/// alternates between those two afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    /// Not registered yet.
    #[default]
    Init,
    /// Leader of its (type, zone).
    Master,
    /// Follower of its (type, zone).
    Slave,
}

impl NodeState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Master => "master",
            Self::Slave => "slave",
        }
    }

    /// Returns true if this node currently leads its zone.
    pub fn is_master(&self) -> bool {
        matches!(self, Self::Master)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which remote instances discovery reports.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WatchSelector {
    /// Every zone of a server type.
    Type {
        /// Watched server type.
        server_type: ServerType,
    },
    /// A single zone of a server type.
    Zone {
        /// Watched server type.
        server_type: ServerType,
        /// Watched zone.
        zone: Zone,
    },
}

impl WatchSelector {
    /// The server type this selector targets.
    pub fn server_type(&self) -> &ServerType {
        match self {
            Self::Type { server_type } | Self::Zone { server_type, .. } => server_type,
        }
    }
}
