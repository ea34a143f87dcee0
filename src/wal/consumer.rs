//! Sequential cursor over the segmented log with durable offset
//! checkpointing and skip-on-corruption policy (C4).

use std::sync::Mutex;

use tracing::warn;

use crate::config::SkipStrategy;
use crate::wal::codec::{self, Batch};
use crate::wal::segment::{Cursor, CursorOutcome, Offset, SegmentedLog, WalError};

/// Kind of data-loss event recorded for operator visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLossKind {
    /// Forward progress was made by skipping a bounded number of records.
    CorruptionSkip,
    /// The emergency 1,000,000-record jump was used.
    EmergencyJump,
    /// An operator manually instructed the consumer to skip ahead.
    ManualSkip,
}

/// An operator-visible record of WAL entries skipped due to corruption.
#[derive(Debug, Clone)]
pub struct DataLossEvent {
    /// Kind of skip that produced this event.
    pub kind: DataLossKind,
    /// Offset at which corruption was first detected.
    pub start_offset: Offset,
    /// Offset the cursor landed on after recovering (if any).
    pub end_offset: Option<Offset>,
    /// Best-effort estimate of the number of entries lost.
    pub estimated_entries_lost: i32,
    /// Free-form operator note.
    pub note: String,
}

/// The escalating jump sequence used by [`SkipStrategy::Aggressive`] and
/// [`SkipStrategy::Conservative`] before giving up (Conservative) or
/// emergency-jumping (Aggressive).
const JUMP_SEQUENCE: [u64; 5] = [1, 10, 100, 1_000, 10_000];
/// The final, data-loss-inducing jump `skip_strategy=Aggressive` performs
/// when the bounded jump sequence fails to find a clean landing.
const EMERGENCY_JUMP: u64 = 1_000_000;

/// Sequential WAL reader: decodes batches and applies the corruption-skip
/// policy when the underlying cursor reports a corrupt frame.
pub struct WalConsumer<'a> {
    log: &'a SegmentedLog,
    cursor: Mutex<Cursor>,
    skip_strategy: SkipStrategy,
}

impl<'a> WalConsumer<'a> {
    /// Opens a consumer positioned at `from`.
    pub fn new(log: &'a SegmentedLog, skip_strategy: SkipStrategy, from: Offset) -> Result<Self, WalError> {
        let cursor = log.open_cursor(from)?;
        Ok(WalConsumer {
            log,
            cursor: Mutex::new(cursor),
            skip_strategy,
        })
    }

    /// Repositions the cursor to `offset`.
    pub fn seek_to(&self, offset: Offset) -> Result<(), WalError> {
        let mut cursor = self.cursor.lock().unwrap_or_else(|p| p.into_inner());
        *cursor = self.log.open_cursor(offset)?;
        Ok(())
    }

    /// Reads up to `max` batches starting at the internal cursor, applying
    /// the corruption-skip policy on any corrupt frame encountered along
    /// the way. Returns the decoded batches together with any data-loss
    /// events the skip policy generated.
    pub fn read_next_batch(&self, max: usize) -> (Vec<(Offset, Batch)>, Vec<DataLossEvent>) {
        let mut cursor = self.cursor.lock().unwrap_or_else(|p| p.into_inner());
        let mut batches = Vec::with_capacity(max);
        let mut events = Vec::new();

        while batches.len() < max {
            match cursor.next() {
                CursorOutcome::End => break,
                CursorOutcome::Record(offset, bytes) => match codec::decode(&bytes) {
                    Ok(batch) => batches.push((offset, batch)),
                    Err(e) => {
                        warn!(offset = %offset, error = %e, "codec error decoding WAL record; invoking skip policy");
                        match self.recover(&mut cursor, offset) {
                            Recovery::Landed { event, offset, batch } => {
                                events.push(event);
                                batches.push((offset, batch));
                            }
                            Recovery::ReachedEnd { event } => {
                                events.push(event);
                                break;
                            }
                            Recovery::GiveUp => break,
                        }
                    }
                },
                CursorOutcome::Corrupt(e) => {
                    warn!(error = %e, "corrupt WAL frame; invoking skip policy");
                    // The cursor has already consumed the corrupt frame's
                    // bytes; `start_offset` is approximate (the position
                    // we were at) since a corrupt frame has no offset of
                    // its own.
                    let start = self.log.high_water_mark();
                    match self.recover(&mut cursor, start) {
                        Recovery::Landed { event, offset, batch } => {
                            events.push(event);
                            batches.push((offset, batch));
                        }
                        Recovery::ReachedEnd { event } => {
                            events.push(event);
                            break;
                        }
                        Recovery::GiveUp => break,
                    }
                }
            }
        }

        (batches, events)
    }

    /// Attempts to land on and decode a record after skipping `n` positions.
    fn try_land(&self, cursor: &mut Cursor, n: u64) -> Landing {
        match cursor.skip(n) {
            CursorOutcome::Record(offset, bytes) => match codec::decode(&bytes) {
                Ok(batch) => Landing::Decoded(offset, batch),
                Err(e) => {
                    warn!(offset = %offset, error = %e, "landed record failed to decode; continuing escalation");
                    Landing::Failed
                }
            },
            CursorOutcome::End => Landing::End,
            CursorOutcome::Corrupt(_) => Landing::Failed,
        }
    }

    /// Tries landing `n` records ahead of `start_offset`. Returns `Some`
    /// when the attempt is conclusive: either a decodable record, or —
    /// under [`SkipStrategy::Aggressive`] — confirmation that the corrupt
    /// record was the last one in the log. `None` means keep escalating.
    fn try_bounded_skip(&self, cursor: &mut Cursor, n: u64, start_offset: Offset) -> Option<Recovery> {
        match self.try_land(cursor, n) {
            Landing::Decoded(offset, batch) => Some(Recovery::Landed {
                event: DataLossEvent {
                    kind: DataLossKind::CorruptionSkip,
                    start_offset,
                    end_offset: Some(offset),
                    estimated_entries_lost: n as i32,
                    note: if n == 1 {
                        "single-record skip recovered".to_string()
                    } else {
                        format!("recovered after jumping {n} records")
                    },
                },
                offset,
                batch,
            }),
            Landing::End if self.skip_strategy == SkipStrategy::Aggressive => {
                Some(Recovery::ReachedEnd {
                    event: DataLossEvent {
                        kind: DataLossKind::CorruptionSkip,
                        start_offset,
                        end_offset: None,
                        estimated_entries_lost: n as i32,
                        note: "corrupt record was the last in the log".to_string(),
                    },
                })
            }
            Landing::End | Landing::Failed => None,
        }
    }

    /// Last-resort jump for [`SkipStrategy::Aggressive`] once the bounded
    /// sequence never found a clean landing.
    fn emergency_jump(&self, cursor: &mut Cursor, start_offset: Offset) -> Recovery {
        match self.try_land(cursor, EMERGENCY_JUMP) {
            Landing::Decoded(offset, batch) => Recovery::Landed {
                event: DataLossEvent {
                    kind: DataLossKind::EmergencyJump,
                    start_offset,
                    end_offset: Some(offset),
                    estimated_entries_lost: EMERGENCY_JUMP as i32,
                    note: "emergency jump past unrecoverable corruption".to_string(),
                },
                offset,
                batch,
            },
            Landing::End => Recovery::ReachedEnd {
                event: DataLossEvent {
                    kind: DataLossKind::EmergencyJump,
                    start_offset,
                    end_offset: None,
                    estimated_entries_lost: EMERGENCY_JUMP as i32,
                    note: "emergency jump reached end of log".to_string(),
                },
            },
            Landing::Failed => {
                cursor.seek_to_end();
                Recovery::ReachedEnd {
                    event: DataLossEvent {
                        kind: DataLossKind::EmergencyJump,
                        start_offset,
                        end_offset: None,
                        estimated_entries_lost: EMERGENCY_JUMP as i32,
                        note: "emergency jump landed on an undecodable record".to_string(),
                    },
                }
            }
        }
    }

    /// Runs the escalating skip sequence after a corrupt record.
    fn recover(&self, cursor: &mut Cursor, start_offset: Offset) -> Recovery {
        if self.skip_strategy == SkipStrategy::None {
            return Recovery::GiveUp;
        }

        // Step 1: advance one position and see if that alone clears it.
        if let Some(result) = self.try_bounded_skip(cursor, 1, start_offset) {
            return result;
        }

        // Step 2: escalating jumps.
        for &jump in &JUMP_SEQUENCE {
            if let Some(result) = self.try_bounded_skip(cursor, jump, start_offset) {
                return result;
            }
        }

        match self.skip_strategy {
            SkipStrategy::Conservative => Recovery::GiveUp,
            SkipStrategy::Aggressive => self.emergency_jump(cursor, start_offset),
            SkipStrategy::None => unreachable!(),
        }
    }
}

/// Outcome of attempting to land on and decode a record `n` positions ahead.
enum Landing {
    /// Landed on a record and it decoded cleanly.
    Decoded(Offset, Batch),
    /// Ran off the end of the log before landing on anything.
    End,
    /// Landed on a frame that was itself corrupt or undecodable.
    Failed,
}

/// Outcome of the escalating skip-and-decode recovery attempt.
enum Recovery {
    /// Forward progress was made; the landed record decoded successfully
    /// and should be fed into the caller's result.
    Landed {
        event: DataLossEvent,
        offset: Offset,
        batch: Batch,
    },
    /// The corrupt record turned out to be the last one in the log (or the
    /// emergency jump ran off the end); reading stops here.
    ReachedEnd { event: DataLossEvent },
    /// `SkipStrategy::None`, or `Conservative` exhausted the bounded
    /// sequence without a clean landing; reading stops with no event.
    GiveUp,
}
