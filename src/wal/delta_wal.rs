use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use bytes::{Buf, BufMut};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::orderid::OrderIdProvider;
use crate::partition::VersionedPartitionName;
use crate::wal::error::WalError;
use crate::wal::row::{Row, WalPointer};

// [bodyLen:4][txId:8][vpnLen:4][vpn][row][bodyLen:4]; the trailing length
// enables reverse scans and torn-tail detection.
const RECORD_FRAMING: u64 = 4 + 4;
const MIN_BODY_LEN: i32 = 8 + 4;

/// Append-only per-stripe log file. Appends are serialized by the stripe's
/// append lock; records are immutable once written, so hydration and replay
/// read through their own file handles without locking the appender.
pub struct DeltaWal {
    path: PathBuf,
    stripe: usize,
    order_ids: Arc<OrderIdProvider>,
    appender: Mutex<Appender>,
}

struct Appender {
    file: File,
    next_fp: u64,
}

#[derive(Debug)]
pub struct WalReplayEntry {
    pub fp: u64,
    pub tx_id: i64,
    pub partition: VersionedPartitionName,
    pub row: Row,
}

impl DeltaWal {
    pub async fn open(
        dir: impl AsRef<Path>,
        stripe: usize,
        order_ids: Arc<OrderIdProvider>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(dir.as_ref()).await?;
        let path = dir.as_ref().join(format!("stripe-{}.wal", stripe));

        let mut file = match OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .await
        {
            Err(e) => {
                warn!("failed to open delta wal {:?}, err: {}", path, e);
                bail!(WalError::FailedToOpen);
            }
            Ok(f) => f,
        };

        let file_len = file.metadata().await?.len();
        let valid_len = Self::scan_valid_length(&mut file, file_len).await?;
        if valid_len < file_len {
            // torn write from a crash mid-append; drop the tail, never
            // surface it as a row
            warn!(
                "truncating torn tail of {:?}: {} -> {}",
                path, file_len, valid_len
            );
            file.set_len(valid_len).await?;
        }
        file.seek(SeekFrom::Start(valid_len)).await?;

        info!("opened delta wal {:?}, length: {}", path, valid_len);
        Ok(Self {
            path,
            stripe,
            order_ids,
            appender: Mutex::new(Appender {
                file,
                next_fp: valid_len,
            }),
        })
    }

    async fn scan_valid_length(file: &mut File, file_len: u64) -> Result<u64> {
        let mut pos: u64 = 0;
        loop {
            if pos + 4 > file_len {
                return Ok(pos);
            }
            file.seek(SeekFrom::Start(pos)).await?;
            let body_len = file.read_i32().await?;
            if body_len < MIN_BODY_LEN || pos + RECORD_FRAMING + body_len as u64 > file_len {
                return Ok(pos);
            }
            file.seek(SeekFrom::Start(pos + 4 + body_len as u64)).await?;
            let trailing = file.read_i32().await?;
            if trailing != body_len {
                return Ok(pos);
            }
            pos += RECORD_FRAMING + body_len as u64;
        }
    }

    pub fn stripe(&self) -> usize {
        self.stripe
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably appends the batch under the stripe's append lock and returns
    /// the batch txId plus one pointer per row, in order. The txId is issued
    /// inside the lock, so txIds strictly increase in file order.
    pub async fn append(
        &self,
        partition: &VersionedPartitionName,
        rows: &[Row],
        fsync: bool,
    ) -> Result<(i64, Vec<WalPointer>)> {
        let vpn_bytes = partition.to_bytes();
        let mut appender = self.appender.lock().await;
        let tx_id = self.order_ids.next_id();

        let mut buf = Vec::new();
        let mut pointers = Vec::with_capacity(rows.len());
        for row in rows {
            let fp = appender.next_fp + buf.len() as u64;
            let row_bytes = row.to_bytes();
            let body_len = (8 + 4 + vpn_bytes.len() + row_bytes.len()) as i32;
            buf.put_i32(body_len);
            buf.put_i64(tx_id);
            buf.put_i32(vpn_bytes.len() as i32);
            buf.put_slice(&vpn_bytes);
            buf.put_slice(&row_bytes);
            buf.put_i32(body_len);
            pointers.push(WalPointer {
                fp,
                timestamp: row.timestamp,
                tombstone: row.tombstone,
                version: row.version,
            });
        }

        if let Err(e) = appender.file.write_all(&buf).await {
            warn!("delta wal append failed on {:?}, err: {}", self.path, e);
            bail!(WalError::FailedToWrite);
        }
        if fsync {
            appender.file.sync_data().await?;
        }
        appender.next_fp += buf.len() as u64;

        Ok((tx_id, pointers))
    }

    /// Resolves a pointer back to the record it was issued for.
    pub async fn hydrate(&self, fp: u64) -> Result<WalReplayEntry> {
        let end = self.end_of_wal().await;
        if fp + 4 > end {
            bail!(WalError::InvalidPointer(fp));
        }
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(fp)).await?;
        let body_len = file.read_i32().await?;
        if body_len < MIN_BODY_LEN || fp + RECORD_FRAMING + body_len as u64 > end {
            bail!(WalError::InvalidPointer(fp));
        }
        let mut body = vec![0u8; body_len as usize];
        file.read_exact(&mut body).await?;
        parse_body(fp, &body)
    }

    /// Forward replay from a pointer (or 0 for the whole file), as a pull
    /// sequence the consumer may stop at any point. The end of the replay is
    /// fixed when it is created; rows appended later are not observed.
    pub async fn replay(&self, from_fp: u64) -> Result<WalReplay> {
        let end = self.end_of_wal().await;
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(from_fp.min(end))).await?;
        Ok(WalReplay {
            reader: BufReader::new(file),
            pos: from_fp.min(end),
            end,
        })
    }

    /// Newest-to-oldest scan, for diagnostics.
    pub async fn reverse_scan(
        &self,
        mut stream: impl FnMut(WalReplayEntry) -> bool,
    ) -> Result<()> {
        let end = self.end_of_wal().await;
        if end == 0 {
            return Ok(());
        }
        let mut file = File::open(&self.path).await?;
        let mut record_end = end;
        while record_end >= RECORD_FRAMING {
            file.seek(SeekFrom::Start(record_end - 4)).await?;
            let body_len = file.read_i32().await?;
            if body_len < MIN_BODY_LEN || (record_end as i64) - (RECORD_FRAMING as i64) - (body_len as i64) < 0 {
                bail!(WalError::CorruptRecord("bad trailing length in reverse scan"));
            }
            let fp = record_end - RECORD_FRAMING - body_len as u64;
            file.seek(SeekFrom::Start(fp + 4)).await?;
            let mut body = vec![0u8; body_len as usize];
            file.read_exact(&mut body).await?;
            if !stream(parse_body(fp, &body)?) {
                return Ok(());
            }
            record_end = fp;
        }
        Ok(())
    }

    /// The file pointer one past the last complete record.
    pub async fn end_of_wal(&self) -> u64 {
        self.appender.lock().await.next_fp
    }

    pub async fn flush(&self) -> Result<()> {
        self.appender.lock().await.file.sync_data().await?;
        Ok(())
    }
}

fn parse_body(fp: u64, body: &[u8]) -> Result<WalReplayEntry> {
    let mut buf = body;
    if buf.remaining() < 12 {
        bail!(WalError::CorruptRecord("truncated record body"));
    }
    let tx_id = buf.get_i64();
    let vpn_len = buf.get_i32();
    if vpn_len < 0 || buf.remaining() < vpn_len as usize {
        bail!(WalError::CorruptRecord("bad partition name length"));
    }
    let vpn_bytes = buf.copy_to_bytes(vpn_len as usize);
    let partition = VersionedPartitionName::from_bytes(&vpn_bytes)?;
    let row = Row::from_bytes(buf)?;
    Ok(WalReplayEntry {
        fp,
        tx_id,
        partition,
        row,
    })
}

/// Pull-based forward scan over a delta WAL.
pub struct WalReplay {
    reader: BufReader<File>,
    pos: u64,
    end: u64,
}

impl WalReplay {
    pub async fn next_entry(&mut self) -> Result<Option<WalReplayEntry>> {
        if self.pos + 4 > self.end {
            return Ok(None);
        }
        let body_len = self.reader.read_i32().await?;
        if body_len < MIN_BODY_LEN || self.pos + RECORD_FRAMING + body_len as u64 > self.end {
            bail!(WalError::CorruptRecord("bad record length in replay"));
        }
        let fp = self.pos;
        let mut body = vec![0u8; body_len as usize];
        self.reader.read_exact(&mut body).await?;
        let trailing = self.reader.read_i32().await?;
        if trailing != body_len {
            bail!(WalError::CorruptRecord("mismatched trailing length"));
        }
        self.pos += RECORD_FRAMING + body_len as u64;
        Ok(Some(parse_body(fp, &body)?))
    }
}
