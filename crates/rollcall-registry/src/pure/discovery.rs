//! Pure discovery computation functions.
//!
//! Discovery keeps, per watched (type, zone), the set of instance ids it
//! last reported. Each fresh listing of a zone directory is diffed against
//! that baseline: ids that disappeared are removed, ids that appeared and
//! fall inside the watch scope are added. Ids outside the scope are never
//! tracked, so they can never produce a removal either.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use rollcall_core::ServerId;
use rollcall_core::ServerType;
use rollcall_core::WatchSelector;
use rollcall_core::Zone;

/// The set of watch selectors, split into whole-type and per-zone entries.
///
/// Inserting a selector twice is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchScope {
    whole_types: BTreeSet<ServerType>,
    zones: BTreeMap<ServerType, BTreeSet<Zone>>,
}

impl WatchScope {
    /// Empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a selector. Returns false if it was already present.
    pub fn insert(&mut self, selector: WatchSelector) -> bool {
        match selector {
            WatchSelector::Type { server_type } => self.whole_types.insert(server_type),
            WatchSelector::Zone { server_type, zone } => self.zones.entry(server_type).or_default().insert(zone),
        }
    }

    /// Whether exactly this selector was inserted.
    pub fn contains_selector(&self, selector: &WatchSelector) -> bool {
        match selector {
            WatchSelector::Type { server_type } => self.whole_types.contains(server_type),
            WatchSelector::Zone { server_type, zone } => {
                self.zones.get(server_type).is_some_and(|zones| zones.contains(zone))
            }
        }
    }

    /// Number of distinct selectors.
    pub fn len(&self) -> u32 {
        let zoned: usize = self.zones.values().map(BTreeSet::len).sum();
        (self.whole_types.len() + zoned) as u32
    }

    /// Returns true when nothing is watched.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether instances of `(server_type, zone)` are in scope.
    pub fn contains_zone(&self, server_type: &ServerType, zone: Zone) -> bool {
        self.whole_types.contains(server_type) || self.zones.get(server_type).is_some_and(|zones| zones.contains(&zone))
    }

    /// Whether `id` is in scope.
    pub fn contains(&self, id: &ServerId) -> bool {
        self.contains_zone(id.server_type(), id.zone())
    }

    /// Every server type named by some selector, sorted.
    pub fn server_types(&self) -> Vec<ServerType> {
        let types: BTreeSet<&ServerType> = self.whole_types.iter().chain(self.zones.keys()).collect();
        types.into_iter().cloned().collect()
    }
}

/// Result of diffing one zone listing against its baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerDiff {
    /// Tracked ids that are gone, sorted.
    pub removed: Vec<ServerId>,
    /// New in-scope ids, sorted.
    pub added: Vec<ServerId>,
}

impl ServerDiff {
    /// Returns true when nothing changed.
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Diff a fresh listing against the tracked baseline.
///
/// # Arguments
///
/// * `tracked` - ids reported as added and not yet removed
/// * `current` - ids listed in the store right now
/// * `scope` - active watch selectors
#[inline]
pub fn compute_server_diff(
    tracked: &BTreeSet<ServerId>,
    current: &BTreeSet<ServerId>,
    scope: &WatchScope,
) -> ServerDiff {
    ServerDiff {
        removed: tracked.difference(current).cloned().collect(),
        added: current.difference(tracked).filter(|id| scope.contains(id)).cloned().collect(),
    }
}

/// Child names of a zone directory, split into usable ids and rejects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceSnapshot {
    /// Well-formed ids belonging to the listed directory.
    pub ids: BTreeSet<ServerId>,
    /// `(child name, reason)` for every skipped entry.
    pub rejected: Vec<(String, String)>,
}

/// Parse the children of `/servers/<server_type>/<zone>`.
///
/// Entries that are not valid server ids, or whose embedded type or zone
/// disagree with the directory they were found in, are rejected.
pub fn classify_instances(server_type: &ServerType, zone: Zone, children: &[String]) -> InstanceSnapshot {
    let mut snapshot = InstanceSnapshot::default();
    for child in children {
        match ServerId::parse(child) {
            Ok(id) if id.server_type() == server_type && id.zone() == zone => {
                snapshot.ids.insert(id);
            }
            Ok(id) => snapshot.rejected.push((
                child.clone(),
                format!("belongs to {}:{}, found under {server_type}:{zone}", id.server_type(), id.zone()),
            )),
            Err(e) => snapshot.rejected.push((child.clone(), e.to_string())),
        }
    }
    snapshot
}
