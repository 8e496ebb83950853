//! Client-side merging of replica read streams. At merge-level consistency a
//! read fans out to several members; each answers with the same wire shape
//! and the client keeps, per key, the answer with the greatest
//! (timestamp, version).

use anyhow::{bail, Result};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::uio;
use crate::wal::key::compose;
use crate::wal::row::compare_timestamp_version;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("replica streams returned mismatched lengths: {eosed} of {total} ended early")]
    MismatchedStreamLengths { eosed: usize, total: usize },
}

/// One replica's answer for one requested key. A member that has never seen
/// the key answers with no value and timestamp -1, which loses to any real
/// answer.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GetEntry {
    pub value: Option<Vec<u8>>,
    pub timestamp: i64,
    pub tombstone: bool,
    pub version: i64,
}

impl GetEntry {
    pub fn absent() -> Self {
        Self {
            value: None,
            timestamp: -1,
            tombstone: false,
            version: -1,
        }
    }
}

pub async fn write_get_entry<W: AsyncWrite + Unpin>(
    writer: &mut W,
    entry: &GetEntry,
) -> Result<()> {
    uio::write_bool(writer, false).await?;
    uio::write_byte_array(writer, entry.value.as_deref()).await?;
    writer.write_i64(entry.timestamp).await?;
    uio::write_bool(writer, entry.tombstone).await?;
    writer.write_i64(entry.version).await?;
    Ok(())
}

pub async fn write_get_eos<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    uio::write_bool(writer, true).await?;
    Ok(())
}

async fn read_get_entry<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<GetEntry>> {
    if uio::read_bool(reader).await? {
        return Ok(None);
    }
    let value = uio::read_byte_array(reader).await?;
    let timestamp = reader.read_i64().await?;
    let tombstone = uio::read_bool(reader).await?;
    let version = reader.read_i64().await?;
    Ok(Some(GetEntry {
        value,
        timestamp,
        tombstone,
        version,
    }))
}

/// Merges positional get responses from several replicas: the nth entry of
/// each stream answers the nth requested key. All streams must answer the
/// same number of keys; anything else means a protocol break, not a merge.
pub async fn merge_get_streams<R: AsyncRead + Unpin>(
    readers: &mut [R],
) -> Result<Vec<GetEntry>> {
    let total = readers.len();
    let mut winners = vec![];
    loop {
        let mut eosed = 0;
        let mut winner: Option<GetEntry> = None;
        for reader in readers.iter_mut() {
            match read_get_entry(reader).await? {
                None => eosed += 1,
                Some(entry) => {
                    let wins = match &winner {
                        None => true,
                        Some(current) => compare_timestamp_version(
                            entry.timestamp,
                            entry.version,
                            current.timestamp,
                            current.version,
                        )
                        .is_gt(),
                    };
                    if wins {
                        winner = Some(entry);
                    }
                }
            }
        }
        if eosed == total {
            return Ok(winners);
        }
        if eosed > 0 {
            bail!(MergeError::MismatchedStreamLengths { eosed, total });
        }
        // eosed == 0 means every stream answered this position
        winners.push(winner.unwrap_or_else(GetEntry::absent));
    }
}

/// One entry of a replica scan stream. Scans never stream tombstones, so
/// there is no tombstone field on the wire.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ScanEntry {
    pub prefix: Option<Vec<u8>>,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub timestamp: i64,
    pub version: i64,
}

pub async fn write_scan_entry<W: AsyncWrite + Unpin>(
    writer: &mut W,
    entry: &ScanEntry,
) -> Result<()> {
    uio::write_bool(writer, true).await?;
    uio::write_byte_array(writer, entry.prefix.as_deref()).await?;
    uio::write_byte_array(writer, Some(&entry.key)).await?;
    uio::write_byte_array(writer, entry.value.as_deref()).await?;
    writer.write_i64(entry.timestamp).await?;
    writer.write_i64(entry.version).await?;
    Ok(())
}

pub async fn write_scan_eos<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    uio::write_bool(writer, false).await?;
    Ok(())
}

async fn read_scan_entry<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<ScanEntry>> {
    if !uio::read_bool(reader).await? {
        return Ok(None);
    }
    let prefix = uio::read_byte_array(reader).await?;
    let key = uio::read_required_byte_array(reader).await?;
    let value = uio::read_byte_array(reader).await?;
    let timestamp = reader.read_i64().await?;
    let version = reader.read_i64().await?;
    Ok(Some(ScanEntry {
        prefix,
        key,
        value,
        timestamp,
        version,
    }))
}

/// N-way merge of ordered replica scan streams. The winner at each step is
/// the smallest composed key; replicas tying on the key keep only the
/// greatest (timestamp, version) and the losers are discarded.
pub struct QuorumScan<R: AsyncRead + Unpin> {
    readers: Vec<R>,
    filled: Vec<Option<ScanEntry>>,
    done: Vec<bool>,
}

impl<R: AsyncRead + Unpin> QuorumScan<R> {
    pub fn new(readers: Vec<R>) -> Self {
        let count = readers.len();
        Self {
            readers,
            filled: (0..count).map(|_| None).collect(),
            done: vec![false; count],
        }
    }

    async fn fill(&mut self) -> Result<()> {
        for i in 0..self.readers.len() {
            if self.filled[i].is_none() && !self.done[i] {
                match read_scan_entry(&mut self.readers[i]).await? {
                    Some(entry) => self.filled[i] = Some(entry),
                    None => self.done[i] = true,
                }
            }
        }
        Ok(())
    }

    fn find_winning_index(&self) -> Option<usize> {
        let mut winning: Option<(usize, Vec<u8>)> = None;
        for (i, slot) in self.filled.iter().enumerate() {
            let Some(entry) = slot else { continue };
            let composed = compose(entry.prefix.as_deref(), &entry.key);
            let wins = match &winning {
                None => true,
                Some((current, winning_key)) => match composed.cmp(winning_key) {
                    std::cmp::Ordering::Less => true,
                    std::cmp::Ordering::Greater => false,
                    std::cmp::Ordering::Equal => {
                        let against = self.filled[*current].as_ref().unwrap();
                        compare_timestamp_version(
                            entry.timestamp,
                            entry.version,
                            against.timestamp,
                            against.version,
                        )
                        .is_gt()
                    }
                },
            };
            if wins {
                winning = Some((i, composed));
            }
        }
        winning.map(|(i, _)| i)
    }

    pub async fn next_entry(&mut self) -> Result<Option<ScanEntry>> {
        self.fill().await?;
        let Some(winning) = self.find_winning_index() else {
            return Ok(None);
        };
        let winner = self.filled[winning].take().unwrap();
        // stale answers for the same key on the other replicas are dropped
        for i in 0..self.filled.len() {
            if let Some(entry) = &self.filled[i] {
                if entry.prefix == winner.prefix && entry.key == winner.key {
                    self.filled[i] = None;
                }
            }
        }
        Ok(Some(winner))
    }
}

/// Drains the merged scan into `stream`; a single replica stream skips the
/// merge machinery entirely. Stops early when `stream` returns false.
pub async fn merge_scan_streams<R: AsyncRead + Unpin>(
    readers: Vec<R>,
    mut stream: impl FnMut(ScanEntry) -> bool,
) -> Result<usize> {
    let mut streamed = 0;
    if readers.len() == 1 {
        let mut reader = readers.into_iter().next().unwrap();
        while let Some(entry) = read_scan_entry(&mut reader).await? {
            streamed += 1;
            if !stream(entry) {
                return Ok(streamed);
            }
        }
        return Ok(streamed);
    }

    let mut scan = QuorumScan::new(readers);
    while let Some(entry) = scan.next_entry().await? {
        streamed += 1;
        if !stream(entry) {
            return Ok(streamed);
        }
    }
    Ok(streamed)
}
