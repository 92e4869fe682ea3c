//! Store path layout.
//!
//! ```text
//! /master/<type>/<zone>              ephemeral, payload = ServerId of current leader
//! /servers/<type>/<zone>/<serverId>  ephemeral, payload = instance info string
//! ```
//!
//! Peers built on other stacks read and write the same tree, so these
//! functions must stay bit-for-bit stable.

use crate::constants::MASTER_ROOT;
use crate::constants::SERVERS_ROOT;
use crate::types::ServerId;
use crate::types::Zone;

/// `/servers`
#[inline]
pub fn servers_root() -> &'static str {
    SERVERS_ROOT
}

/// `/servers/<type>`
#[inline]
pub fn server_type_path(server_type: &str) -> String {
    format!("{SERVERS_ROOT}/{server_type}")
}

/// `/servers/<type>/<zone>`
#[inline]
pub fn zone_path(server_type: &str, zone: Zone) -> String {
    format!("{SERVERS_ROOT}/{server_type}/{zone}")
}

/// `/servers/<type>/<zone>/<serverId>`
#[inline]
pub fn instance_path(server_type: &str, zone: Zone, server_id: &ServerId) -> String {
    format!("{SERVERS_ROOT}/{server_type}/{zone}/{server_id}")
}

/// `/master`
#[inline]
pub fn master_root() -> &'static str {
    MASTER_ROOT
}

/// `/master/<type>`
#[inline]
pub fn master_type_path(server_type: &str) -> String {
    format!("{MASTER_ROOT}/{server_type}")
}

/// `/master/<type>/<zone>`: the leader marker.
#[inline]
pub fn marker_path(server_type: &str, zone: Zone) -> String {
    format!("{MASTER_ROOT}/{server_type}/{zone}")
}

/// Every proper ancestor of `path`, shallowest first.
///
/// `ancestors("/servers/echo/0/x")` is `["/servers", "/servers/echo", "/servers/echo/0"]`.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    for (idx, ch) in path.char_indices().skip(1) {
        if ch == '/' {
            out.push(path[..idx].to_string());
        }
    }
    out
}

/// Last path component.
pub fn leaf(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parse a zone directory name; `None` for anything but a decimal integer.
pub fn parse_zone(child: &str) -> Option<Zone> {
    if child.is_empty() {
        return None;
    }
    child.parse().ok()
}

/// Validate a store path: absolute, no empty components, no trailing slash.
pub fn validate_path(path: &str) -> Result<(), String> {
    if !path.starts_with('/') {
        return Err("path must be absolute".to_string());
    }
    if path.len() > 1 && path.ends_with('/') {
        return Err("path must not end with '/'".to_string());
    }
    if path.len() > 1 && path[1..].split('/').any(|c| c.is_empty() || c == "." || c == "..") {
        return Err("path has an empty or relative component".to_string());
    }
    Ok(())
}
