use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalError {
    #[error("failed to open wal file")]
    FailedToOpen,
    #[error("failed to read wal file")]
    FailedToRead,
    #[error("failed to write wal file")]
    FailedToWrite,
    #[error("failed to seek wal file")]
    FailedToSeek,

    #[error("no wal record at pointer {0}")]
    InvalidPointer(u64),

    #[error("corrupt wal record: {0}")]
    CorruptRecord(&'static str),
}
