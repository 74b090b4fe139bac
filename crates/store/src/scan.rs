//! Scan/mutate worker decisions
//!
//! See [`Store::scan_mutate`](crate::Store::scan_mutate) and
//! [`Store::run_job`](crate::Store::run_job) for the jobs that consume
//! these.

/// Per-record verdict from a scan/mutate worker.
///
/// `Keep` is a valid, non-error outcome; a scan that keeps everything is a
/// plain read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanDecision<V> {
    /// Replace the record's value in place
    Update(V),
    /// Delete the record
    Delete,
    /// Leave the record untouched
    Keep,
}
