pub mod merge;

pub use merge::{
    merge_get_streams, merge_scan_streams, GetEntry, MergeError, QuorumScan, ScanEntry,
};
