use std::collections::HashMap;
use std::fmt;

use anyhow::{bail, Result};
use parking_lot::RwLock;

use crate::partition::PartitionName;

/// One node participating in hosting/replicating partitions.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct RingMember {
    member: String,
}

impl RingMember {
    pub fn new(member: impl Into<String>) -> Self {
        Self {
            member: member.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.member
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.member.as_bytes().to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(Self::new(s)),
            Err(_) => bail!("ring member bytes are not valid utf-8"),
        }
    }
}

impl fmt::Display for RingMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.member)
    }
}

/// Read-only view of ring membership, consumed to compute quorum sizes and
/// replication targets. Membership itself is maintained elsewhere.
pub trait RingReader: Send + Sync {
    /// Every member of the named ring, including the local member.
    fn ring_members(&self, ring_name: &[u8]) -> Vec<RingMember>;

    /// Ring members excluding the given one.
    fn neighbors(&self, ring_name: &[u8], of: &RingMember) -> Vec<RingMember> {
        self.ring_members(ring_name)
            .into_iter()
            .filter(|m| m != of)
            .collect()
    }

    fn is_member(&self, ring_name: &[u8], member: &RingMember) -> bool {
        self.ring_members(ring_name).iter().any(|m| m == member)
    }

    /// The current leader and its leadership token. The token identifies the
    /// leader epoch; acks carrying a greater token prove the leadership has
    /// moved on.
    fn leader(&self, partition_name: &PartitionName) -> Option<(RingMember, i64)>;
}

/// Fixed in-memory ring, for embedding and tests.
pub struct StaticRing {
    rings: RwLock<HashMap<Vec<u8>, Vec<RingMember>>>,
    leaders: RwLock<HashMap<PartitionName, (RingMember, i64)>>,
}

impl StaticRing {
    pub fn new() -> Self {
        Self {
            rings: RwLock::new(HashMap::new()),
            leaders: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_ring(&self, ring_name: &[u8], members: Vec<RingMember>) {
        self.rings.write().insert(ring_name.to_vec(), members);
    }

    pub fn set_leader(&self, partition_name: PartitionName, leader: RingMember, token: i64) {
        self.leaders.write().insert(partition_name, (leader, token));
    }
}

impl Default for StaticRing {
    fn default() -> Self {
        Self::new()
    }
}

impl RingReader for StaticRing {
    fn ring_members(&self, ring_name: &[u8]) -> Vec<RingMember> {
        self.rings.read().get(ring_name).cloned().unwrap_or_default()
    }

    fn leader(&self, partition_name: &PartitionName) -> Option<(RingMember, i64)> {
        self.leaders.read().get(partition_name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neighbors_exclude_self() {
        let ring = StaticRing::new();
        let a = RingMember::new("a");
        let b = RingMember::new("b");
        let c = RingMember::new("c");
        ring.set_ring(b"main", vec![a.clone(), b.clone(), c.clone()]);

        let neighbors = ring.neighbors(b"main", &a);
        assert_eq!(neighbors, vec![b.clone(), c]);
        assert!(ring.is_member(b"main", &b));
        assert!(!ring.is_member(b"other", &b));
    }

    #[test]
    fn test_member_bytes_round_trip() {
        let m = RingMember::new("node-1");
        assert_eq!(RingMember::from_bytes(&m.to_bytes()).unwrap(), m);
        assert!(RingMember::from_bytes(&[0xff, 0xfe]).is_err());
    }
}
