//! Thin wrapper over the segmented log and batch codec: appends one
//! batch atomically and returns its offset (C3).

use crate::wal::codec::{self, Batch};
use crate::wal::segment::{Offset, SegmentedLog, WalError};

/// Single-writer producer. Callers must serialize through the commit
/// coordinator; no internal locking is added beyond what the segmented
/// log already provides for its active segment.
pub struct WalProducer<'a> {
    log: &'a SegmentedLog,
}

impl<'a> WalProducer<'a> {
    /// Wraps `log`.
    pub fn new(log: &'a SegmentedLog) -> Self {
        WalProducer { log }
    }

    /// Encodes and appends `batch`, returning its offset.
    pub fn append(&self, batch: &Batch) -> Result<Offset, WalError> {
        let bytes = codec::encode(batch)?;
        self.log.append(&bytes)
    }

    /// Forces an `fsync` of the active segment.
    pub fn flush(&self) -> Result<(), WalError> {
        self.log.flush()
    }
}
