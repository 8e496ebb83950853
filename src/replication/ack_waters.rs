use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use parking_lot::RwLock;

use crate::partition::VersionedPartitionName;
use crate::replication::await_notify::AwaitNotify;
use crate::replication::error::QuorumError;
use crate::ring::RingMember;

pub const NO_LEADERSHIP_TOKEN: i64 = -1;

#[derive(Clone, Copy, Debug)]
struct MemberAck {
    tx_id: i64,
    leadership_token: i64,
}

/// Tracks, per partition, the highest txId each neighbor has acknowledged
/// taking, and lets a committer park until enough neighbors have caught up
/// to its commit. Acks only ever move forward; the txId and leadership token
/// advance independently, each taking the elementwise max.
pub struct AckWaters {
    acks: RwLock<HashMap<VersionedPartitionName, HashMap<RingMember, MemberAck>>>,
    waiters: AwaitNotify<VersionedPartitionName>,
}

impl AckWaters {
    pub fn new() -> Self {
        Self {
            acks: RwLock::new(HashMap::new()),
            waiters: AwaitNotify::new(),
        }
    }

    pub fn set(
        &self,
        member: &RingMember,
        partition: &VersionedPartitionName,
        tx_id: i64,
        leadership_token: i64,
    ) {
        {
            let mut acks = self.acks.write();
            let members = acks.entry(partition.clone()).or_default();
            let ack = members.entry(member.clone()).or_insert(MemberAck {
                tx_id,
                leadership_token,
            });
            ack.tx_id = ack.tx_id.max(tx_id);
            ack.leadership_token = ack.leadership_token.max(leadership_token);
        }
        self.waiters.notify(partition);
    }

    pub fn get(&self, partition: &VersionedPartitionName, member: &RingMember) -> Option<i64> {
        self.acks
            .read()
            .get(partition)
            .and_then(|members| members.get(member))
            .map(|ack| ack.tx_id)
    }

    /// Every neighbor's acked txId for the partition.
    pub fn partition_tx_ids(&self, partition: &VersionedPartitionName) -> Vec<(RingMember, i64)> {
        self.acks
            .read()
            .get(partition)
            .map(|members| {
                members
                    .iter()
                    .map(|(member, ack)| (member.clone(), ack.tx_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn passed(
        &self,
        partition: &VersionedPartitionName,
        tx_id: i64,
        members: &[RingMember],
        leadership_token: i64,
    ) -> Result<usize> {
        let acks = self.acks.read();
        let Some(acked) = acks.get(partition) else {
            return Ok(0);
        };
        let mut passed = 0;
        for member in members {
            let Some(ack) = acked.get(member) else {
                continue;
            };
            if leadership_token != NO_LEADERSHIP_TOKEN && ack.leadership_token > leadership_token {
                bail!(QuorumError::LeadershipChanged {
                    expected: leadership_token,
                    observed: ack.leadership_token,
                });
            }
            if ack.tx_id >= tx_id {
                passed += 1;
            }
        }
        Ok(passed)
    }

    /// Parks until `desired` of `members` have acked at or past `tx_id`.
    /// Only acks from the given replica set count; a mark left behind by a
    /// node no longer in the set must not satisfy the quorum. Fails fast the
    /// moment any counted member reports a newer leadership token, since the
    /// awaited quorum can then never be attributed to this leader.
    pub async fn await_quorum(
        &self,
        partition: &VersionedPartitionName,
        tx_id: i64,
        members: &[RingMember],
        desired: usize,
        timeout: Duration,
        leadership_token: i64,
    ) -> Result<usize> {
        if desired == 0 {
            return Ok(0);
        }
        let started = Instant::now();
        let deadline = started + timeout;
        let waiter = self.waiters.waiter(partition.clone());
        loop {
            let notified = waiter.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let passed = self.passed(partition, tx_id, members, leadership_token)?;
            if passed >= desired {
                return Ok(passed);
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline.into()) => {
                    bail!(QuorumError::Timeout {
                        passed,
                        desired,
                        waited_millis: started.elapsed().as_millis() as u64,
                    });
                }
            }
        }
    }

    /// Forgets a partition's acks, e.g. when its storage generation dies.
    pub fn expunge(&self, partition: &VersionedPartitionName) {
        self.acks.write().remove(partition);
        self.waiters.notify(partition);
    }
}

impl Default for AckWaters {
    fn default() -> Self {
        Self::new()
    }
}
