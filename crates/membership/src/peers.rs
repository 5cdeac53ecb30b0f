//! Peer Directory
//!
//! Tracks the units of this application seen on the peer relation. The local
//! unit is always a member. Member order is by ordinal, never arrival order,
//! so every unit derives the same list from the same peers.

use common::UnitName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{MembershipError, MembershipResult};

/// What the directory knows about a single peer.
///
/// The address is informational: it is persisted and reported to operators,
/// while replica-set members are always addressed by their stable
/// `<app>-<ordinal>.<app>-endpoints` hostname.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    /// Last `private-address` the peer published, if any.
    #[serde(default)]
    pub address: Option<String>,
}

/// Ordered, duplicate-free set of replica-set members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSet {
    units: Vec<UnitName>,
}

impl PeerSet {
    pub fn units(&self) -> &[UnitName] {
        &self.units
    }

    /// Member hostnames in ordinal order.
    pub fn hosts(&self) -> Vec<String> {
        self.units.iter().map(UnitName::peer_host).collect()
    }

    /// Lowest-ordinal member.
    pub fn first(&self) -> Option<&UnitName> {
        self.units.first()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn contains(&self, unit: &UnitName) -> bool {
        self.units.contains(unit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDirectory {
    local: UnitName,
    peers: BTreeMap<UnitName, PeerEntry>,
}

impl PeerDirectory {
    pub fn new(local: UnitName) -> Self {
        Self {
            local,
            peers: BTreeMap::new(),
        }
    }

    pub fn local(&self) -> &UnitName {
        &self.local
    }

    /// Register a peer. Returns `true` if it was not known before.
    pub fn join(&mut self, unit: UnitName) -> MembershipResult<bool> {
        self.check_app(&unit)?;
        if unit == self.local || self.peers.contains_key(&unit) {
            return Ok(false);
        }
        debug!(peer = %unit, "registered peer");
        self.peers.insert(unit, PeerEntry::default());
        Ok(true)
    }

    /// Remove a departed peer. Returns `true` if it was known.
    pub fn depart(&mut self, unit: &UnitName) -> bool {
        let removed = self.peers.remove(unit).is_some();
        if removed {
            debug!(peer = %unit, "removed departed peer");
        }
        removed
    }

    /// Record a known peer's published address.
    ///
    /// Returns `false` for units that have not joined; addresses never
    /// register a peer on their own.
    pub fn record_address(
        &mut self,
        unit: &UnitName,
        address: impl Into<String>,
    ) -> MembershipResult<bool> {
        self.check_app(unit)?;
        let Some(entry) = self.peers.get_mut(unit) else {
            return Ok(false);
        };
        let address = address.into();
        debug!(peer = %unit, address = %address, "recorded peer address");
        entry.address = Some(address);
        Ok(true)
    }

    pub fn contains(&self, unit: &UnitName) -> bool {
        *unit == self.local || self.peers.contains_key(unit)
    }

    pub fn address(&self, unit: &UnitName) -> Option<&str> {
        self.peers.get(unit).and_then(|entry| entry.address.as_deref())
    }

    /// Local unit plus every known peer, ordered by ordinal.
    pub fn members(&self) -> PeerSet {
        let mut units: Vec<UnitName> = self.peers.keys().cloned().collect();
        units.push(self.local.clone());
        units.sort();
        units.dedup();
        PeerSet { units }
    }

    fn check_app(&self, unit: &UnitName) -> MembershipResult<()> {
        if unit.app() != self.local.app() {
            return Err(MembershipError::ForeignApplication {
                unit: unit.to_string(),
                app: self.local.app().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn unit(ordinal: u32) -> UnitName {
        UnitName::new("mongodb", ordinal)
    }

    #[test]
    fn test_local_unit_is_always_member() {
        let directory = PeerDirectory::new(unit(0));
        assert_eq!(directory.members().hosts(), vec!["mongodb-0.mongodb-endpoints"]);
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut directory = PeerDirectory::new(unit(0));
        assert!(directory.join(unit(1)).unwrap());
        assert!(!directory.join(unit(1)).unwrap());
        assert!(!directory.join(unit(0)).unwrap());
        assert_eq!(directory.members().len(), 2);
    }

    #[test]
    fn test_depart_removes_only_known_peer() {
        let mut directory = PeerDirectory::new(unit(0));
        directory.join(unit(1)).unwrap();
        assert!(directory.depart(&unit(1)));
        assert!(!directory.depart(&unit(1)));
        assert_eq!(directory.members().len(), 1);
    }

    #[test]
    fn test_rejects_foreign_application() {
        let mut directory = PeerDirectory::new(unit(0));
        let err = directory.join(UnitName::new("postgres", 1)).unwrap_err();
        assert!(matches!(err, MembershipError::ForeignApplication { .. }));
    }

    #[test]
    fn test_record_address_only_for_joined_peers() {
        let mut directory = PeerDirectory::new(unit(0));
        assert!(!directory.record_address(&unit(2), "10.0.0.2").unwrap());
        assert!(!directory.members().contains(&unit(2)));

        directory.join(unit(2)).unwrap();
        assert!(directory.record_address(&unit(2), "10.0.0.2").unwrap());
        assert_eq!(directory.address(&unit(2)), Some("10.0.0.2"));
    }

    #[test]
    fn test_first_member_is_lowest_ordinal() {
        let mut directory = PeerDirectory::new(unit(3));
        directory.join(unit(7)).unwrap();
        directory.join(unit(1)).unwrap();
        assert_eq!(directory.members().first(), Some(&unit(1)));
    }

    #[test]
    fn test_directory_survives_json() {
        let mut directory = PeerDirectory::new(unit(0));
        directory.join(unit(1)).unwrap();
        directory.record_address(&unit(1), "10.0.0.1").unwrap();
        let json = serde_json::to_string(&directory).unwrap();
        let restored: PeerDirectory = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, directory);
    }

    proptest! {
        #[test]
        fn prop_members_sorted_by_ordinal(ordinals in proptest::collection::vec(1u32..500, 0..20)) {
            let mut directory = PeerDirectory::new(unit(0));
            for ordinal in &ordinals {
                directory.join(unit(*ordinal)).unwrap();
            }
            let members: Vec<u32> = directory.members().units().iter().map(UnitName::ordinal).collect();
            let mut expected: Vec<u32> = ordinals.clone();
            expected.push(0);
            expected.sort_unstable();
            expected.dedup();
            prop_assert_eq!(members, expected);
        }
    }
}
