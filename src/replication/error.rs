use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuorumError {
    #[error("quorum timed out: {passed} of {desired} acks after {waited_millis}ms")]
    Timeout {
        passed: usize,
        desired: usize,
        waited_millis: u64,
    },

    #[error("leadership changed while awaiting quorum: expected token {expected}, observed {observed}")]
    LeadershipChanged { expected: i64, observed: i64 },

    #[error("ring has {neighbors} neighbors, cannot satisfy quorum of {desired}")]
    RingTooSmall { neighbors: usize, desired: usize },
}

#[derive(Error, Debug)]
pub enum TakeError {
    #[error("unexpected row type in take stream: {0}")]
    UnexpectedRowType(u8),

    #[error("take stream ended mid-record")]
    TruncatedStream,
}
