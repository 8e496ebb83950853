//! Pull replication. A taker asks a neighbor for everything a partition
//! logged after its last applied txId; the neighbor streams rows in txId
//! order, then a snapshot of its highwater marks, then end-of-stream. The
//! taker acks what it applied, which feeds the neighbor's ack waters and
//! highwater marks.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Result};
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::partition::VersionedPartitionName;
use crate::replication::await_notify::AwaitNotify;
use crate::replication::error::TakeError;
use crate::ring::RingMember;
use crate::store::partition_store::{PartitionStore, NO_TX_ID};
use crate::uio;
use crate::wal::row::Row;

pub const ROW_TYPE_PRIMARY: u8 = 1;
pub const ROW_TYPE_HIGHWATER: u8 = 2;
const END_OF_STREAM: u8 = 0;

/// Streams every row logged after `from_tx_id`, a trailing highwater
/// snapshot, and end-of-stream. Returns how many rows were streamed.
pub async fn stream_rows_since<W: AsyncWrite + Unpin>(
    store: &PartitionStore,
    from_tx_id: i64,
    highwaters: &[(RingMember, i64)],
    writer: &mut W,
) -> Result<usize> {
    let mut cursor = store.take_from_tx_id(from_tx_id).await?;
    let mut streamed = 0;
    while let Some(entry) = cursor.next_entry().await? {
        writer.write_u8(ROW_TYPE_PRIMARY).await?;
        writer.write_i64(entry.tx_id).await?;
        uio::write_byte_array(writer, Some(&entry.row.to_bytes())).await?;
        streamed += 1;
    }

    writer.write_u8(ROW_TYPE_HIGHWATER).await?;
    writer.write_i32(highwaters.len() as i32).await?;
    for (member, tx_id) in highwaters {
        uio::write_byte_array(writer, Some(&member.to_bytes())).await?;
        writer.write_i64(*tx_id).await?;
    }

    writer.write_u8(END_OF_STREAM).await?;
    writer.flush().await?;
    Ok(streamed)
}

/// What a take stream delivered. `highwaters` is only present when the
/// stream was consumed to completion; a consumer that stopped early must not
/// trust a snapshot it never reached.
#[derive(Debug)]
pub struct TakeStreamResult {
    pub rows: usize,
    pub highest_tx_id: i64,
    pub highwaters: Option<Vec<(RingMember, i64)>>,
    pub partial: bool,
}

/// Consumes a take stream, handing each row to `stream`. Returning false
/// stops the take early; the result is then marked partial and carries no
/// highwater snapshot.
pub async fn consume_take_stream<R: AsyncRead + Unpin>(
    reader: &mut R,
    mut stream: impl FnMut(i64, Row) -> bool,
) -> Result<TakeStreamResult> {
    let mut rows = 0;
    let mut highest_tx_id = NO_TX_ID;
    let mut highwaters = None;

    loop {
        let row_type = match reader.read_u8().await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                bail!(TakeError::TruncatedStream);
            }
            Err(e) => return Err(e.into()),
        };
        match row_type {
            END_OF_STREAM => break,
            ROW_TYPE_PRIMARY => {
                let tx_id = reader.read_i64().await?;
                let row_bytes = uio::read_required_byte_array(reader).await?;
                let row = Row::from_bytes(&row_bytes)?;
                rows += 1;
                highest_tx_id = highest_tx_id.max(tx_id);
                if !stream(tx_id, row) {
                    return Ok(TakeStreamResult {
                        rows,
                        highest_tx_id,
                        highwaters: None,
                        partial: true,
                    });
                }
            }
            ROW_TYPE_HIGHWATER => {
                let count = reader.read_i32().await?;
                if count < 0 {
                    bail!(TakeError::TruncatedStream);
                }
                let mut marks = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let member_bytes = uio::read_required_byte_array(reader).await?;
                    let tx_id = reader.read_i64().await?;
                    marks.push((RingMember::from_bytes(&member_bytes)?, tx_id));
                }
                highwaters = Some(marks);
            }
            other => bail!(TakeError::UnexpectedRowType(other)),
        }
    }

    Ok(TakeStreamResult {
        rows,
        highest_tx_id,
        highwaters,
        partial: false,
    })
}

/// Rendezvous between committers and takers: a commit announces the new
/// txId, parked takers wake up and pull. Announcements coalesce; a taker
/// only ever cares about the latest.
pub struct TakeAvailability {
    latest: RwLock<HashMap<VersionedPartitionName, i64>>,
    waiters: AwaitNotify<VersionedPartitionName>,
}

impl TakeAvailability {
    pub fn new() -> Self {
        Self {
            latest: RwLock::new(HashMap::new()),
            waiters: AwaitNotify::new(),
        }
    }

    pub fn available(&self, partition: &VersionedPartitionName, tx_id: i64) {
        {
            let mut latest = self.latest.write();
            let entry = latest.entry(partition.clone()).or_insert(NO_TX_ID);
            *entry = (*entry).max(tx_id);
        }
        self.waiters.notify(partition);
    }

    pub fn latest(&self, partition: &VersionedPartitionName) -> i64 {
        self.latest
            .read()
            .get(partition)
            .copied()
            .unwrap_or(NO_TX_ID)
    }

    /// Parks until something newer than `after_tx_id` is announced, or the
    /// timeout passes. `None` on timeout; takers just come back around.
    pub async fn await_available(
        &self,
        partition: &VersionedPartitionName,
        after_tx_id: i64,
        timeout: Duration,
    ) -> Result<Option<i64>> {
        let deadline = tokio::time::Instant::now() + timeout;
        let waiter = self.waiters.waiter(partition.clone());
        loop {
            let notified = waiter.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let latest = self.latest(partition);
            if latest > after_tx_id {
                return Ok(Some(latest));
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }
}

impl Default for TakeAvailability {
    fn default() -> Self {
        Self::new()
    }
}
