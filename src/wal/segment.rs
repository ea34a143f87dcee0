//! Append-only byte log partitioned into time-bucketed segments (C1).
//!
//! A segment is a file in the WAL directory whose name encodes its roll
//! cycle bucket and a monotonically increasing sequence number. The active
//! segment is append-only; once the wall-clock bucket advances, the active
//! segment is left untouched (sealed) and a new one is opened. Each record
//! is framed as `[u32 length][u32 crc32 of payload][payload bytes]`.

use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{FlushMode, WalConfig};
use crate::wal::codec::CodecError;

const U32_SIZE: usize = std::mem::size_of::<u32>();
const SEGMENT_PREFIX: &str = "segment-";
const SEGMENT_SUFFIX: &str = ".log";

/// A 64-bit logical position uniquely identifying a batch record in the
/// log: `segment_seq ‖ intra_segment_index`. Monotonically increasing
/// across the life of the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset(u64);

impl Offset {
    /// Construct an offset from its two components.
    pub fn new(segment_seq: u32, intra_index: u32) -> Self {
        Offset(((segment_seq as u64) << 32) | intra_index as u64)
    }

    /// The zero offset, used as the default checkpoint for a fresh consumer.
    pub const ZERO: Offset = Offset(0);

    /// The segment-sequence component.
    pub fn segment_seq(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The intra-segment-index component.
    pub fn intra_index(self) -> u32 {
        self.0 as u32
    }

    /// The raw `u64` representation, as persisted in `consumer_offsets`.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Reconstruct an offset from its raw `u64` representation.
    pub fn from_u64(raw: u64) -> Self {
        Offset(raw)
    }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.segment_seq(), self.intra_index())
    }
}

/// Errors produced by the segmented log, batch codec, producer, and consumer.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The log directory is out of space.
    #[error("WAL directory is full")]
    Full,

    /// Attempted to append to a sealed segment.
    #[error("segment is sealed")]
    Sealed,

    /// A record's CRC did not match its payload.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// A record's declared length exceeds the remaining segment bytes.
    #[error("record too large: {0} bytes")]
    RecordTooLarge(usize),

    /// The segment ended before a complete record frame could be read.
    #[error("unexpected end of segment")]
    UnexpectedEof,

    /// A file in the WAL directory did not match the segment naming scheme.
    #[error("invalid segment file name: {0}")]
    InvalidSegmentName(String),

    /// The record payload failed batch-codec parsing.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

fn is_disk_full(err: &io::Error) -> bool {
    // ENOSPC on Unix; checked via raw_os_error so this also behaves
    // sensibly when built against a future libc without needing the
    // nightly-gated `ErrorKind::StorageFull`.
    err.raw_os_error() == Some(28)
}

fn compute_crc(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn segment_file_name(bucket: u64, seq: u32) -> String {
    format!("{SEGMENT_PREFIX}{bucket:020}-{seq:010}{SEGMENT_SUFFIX}")
}

/// Parses `(bucket, seq)` out of a segment file name, if it matches the
/// naming scheme.
fn parse_segment_name(path: &Path) -> Option<(u64, u32)> {
    let name = path.file_name().and_then(OsStr::to_str)?;
    let stem = name.strip_prefix(SEGMENT_PREFIX)?.strip_suffix(SEGMENT_SUFFIX)?;
    let (bucket_str, seq_str) = stem.split_once('-')?;
    let bucket = bucket_str.parse::<u64>().ok()?;
    let seq = seq_str.parse::<u32>().ok()?;
    Some((bucket, seq))
}

/// Lists every segment file in `dir`, sorted by ascending sequence number.
fn list_segments(dir: &Path) -> Result<Vec<(u64, u32, PathBuf)>, WalError> {
    let mut segments = Vec::new();
    if !dir.exists() {
        return Ok(segments);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match parse_segment_name(&path) {
            Some((bucket, seq)) => segments.push((bucket, seq, path)),
            None => {
                warn!(path = %path.display(), "ignoring file with non-segment name in WAL directory");
            }
        }
    }
    segments.sort_by_key(|(_, seq, _)| *seq);
    Ok(segments)
}

/// Counts how many well-formed `[len][crc][payload]` records are present
/// at the head of `path`, stopping at the first corrupt or incomplete
/// frame. Used at startup to resume the intra-segment index of a segment
/// that was active when the process last stopped.
fn count_valid_records(path: &Path) -> Result<u32, WalError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut count = 0u32;
    loop {
        let mut len_buf = [0u8; U32_SIZE];
        if reader.read_exact(&mut len_buf).is_err() {
            break;
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut crc_buf = [0u8; U32_SIZE];
        if reader.read_exact(&mut crc_buf).is_err() {
            break;
        }
        let expected_crc = u32::from_le_bytes(crc_buf);
        let mut payload = vec![0u8; len];
        if reader.read_exact(&mut payload).is_err() {
            break;
        }
        if compute_crc(&payload) != expected_crc {
            break;
        }
        count += 1;
    }
    Ok(count)
}

struct ActiveSegment {
    path: PathBuf,
    file: File,
    seq: u32,
    bucket: u64,
    next_intra_index: u32,
    last_flush: Instant,
    batches_since_flush: u32,
}

/// Append-only, time-bucketed segmented log.
pub struct SegmentedLog {
    dir: PathBuf,
    roll_cycle_secs: u64,
    retention_segments: u32,
    flush_mode: FlushMode,
    active: Mutex<ActiveSegment>,
    next_seq: AtomicU32,
    /// Highest offset ever appended; exposed for diagnostics.
    high_water_mark: AtomicU64,
}

impl SegmentedLog {
    /// Opens (creating if necessary) the segmented log rooted at
    /// `config.dir`, resuming the most recent segment as active.
    pub fn open(config: &WalConfig) -> Result<Self, WalError> {
        fs::create_dir_all(&config.dir)?;
        let existing = list_segments(&config.dir)?;

        let (active, next_seq) = match existing.last() {
            Some((bucket, seq, path)) => {
                let resumed_index = count_valid_records(path)?;
                let file = OpenOptions::new().append(true).open(path)?;
                info!(path = %path.display(), seq, resumed_index, "resuming active WAL segment");
                (
                    ActiveSegment {
                        path: path.clone(),
                        file,
                        seq: *seq,
                        bucket: *bucket,
                        next_intra_index: resumed_index,
                        last_flush: Instant::now(),
                        batches_since_flush: 0,
                    },
                    seq + 1,
                )
            }
            None => {
                let bucket = now_secs() / config.roll_cycle.cycle_secs();
                let seq = 0u32;
                let path = config.dir.join(segment_file_name(bucket, seq));
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)?;
                info!(path = %path.display(), seq, "opened first WAL segment");
                (
                    ActiveSegment {
                        path,
                        file,
                        seq,
                        bucket,
                        next_intra_index: 0,
                        last_flush: Instant::now(),
                        batches_since_flush: 0,
                    },
                    seq + 1,
                )
            }
        };

        Ok(SegmentedLog {
            dir: config.dir.clone(),
            roll_cycle_secs: config.roll_cycle.cycle_secs(),
            retention_segments: config.retention_segments,
            flush_mode: config.flush_mode,
            active: Mutex::new(active),
            next_seq: AtomicU32::new(next_seq),
            high_water_mark: AtomicU64::new(0),
        })
    }

    /// Appends `payload` to the active segment, rolling to a new segment
    /// first if the wall-clock bucket has advanced. Returns the offset of
    /// the appended record.
    pub fn append(&self, payload: &[u8]) -> Result<Offset, WalError> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());

        let current_bucket = now_secs() / self.roll_cycle_secs;
        if current_bucket != active.bucket {
            self.roll_locked(&mut active, current_bucket)?;
        }

        let crc = compute_crc(payload);
        let result: io::Result<()> = (|| {
            active.file.write_all(&(payload.len() as u32).to_le_bytes())?;
            active.file.write_all(&crc.to_le_bytes())?;
            active.file.write_all(payload)?;
            Ok(())
        })();
        if let Err(e) = result {
            if is_disk_full(&e) {
                return Err(WalError::Full);
            }
            return Err(WalError::Io(e));
        }

        let offset = Offset::new(active.seq, active.next_intra_index);
        active.next_intra_index += 1;
        active.batches_since_flush += 1;
        self.high_water_mark.store(offset.as_u64(), Ordering::Relaxed);

        match self.flush_mode {
            FlushMode::PerBatch => {
                active.file.sync_data()?;
                active.batches_since_flush = 0;
                active.last_flush = Instant::now();
            }
            FlushMode::EveryN(n) => {
                if active.batches_since_flush >= n {
                    active.file.sync_data()?;
                    active.batches_since_flush = 0;
                    active.last_flush = Instant::now();
                }
            }
            FlushMode::TimeMs(t) => {
                if active.last_flush.elapsed().as_millis() as u64 >= t {
                    active.file.sync_data()?;
                    active.batches_since_flush = 0;
                    active.last_flush = Instant::now();
                }
            }
        }

        Ok(offset)
    }

    /// Forces an `fsync` of the active segment regardless of flush mode.
    pub fn flush(&self) -> Result<(), WalError> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        active.file.sync_data()?;
        active.batches_since_flush = 0;
        active.last_flush = Instant::now();
        Ok(())
    }

    fn roll_locked(&self, active: &mut ActiveSegment, new_bucket: u64) -> Result<(), WalError> {
        active.file.sync_data()?;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(segment_file_name(new_bucket, seq));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(old = %active.path.display(), new = %path.display(), "rolled WAL segment");
        *active = ActiveSegment {
            path,
            file,
            seq,
            bucket: new_bucket,
            next_intra_index: 0,
            last_flush: Instant::now(),
            batches_since_flush: 0,
        };
        Ok(())
    }

    /// Opens a sequential cursor over every record at or after `from`.
    pub fn open_cursor(&self, from: Offset) -> Result<Cursor, WalError> {
        let segments = list_segments(&self.dir)?;
        Ok(Cursor {
            segments,
            seg_idx: 0,
            reader: None,
            skip_until: from,
        })
    }

    /// Highest offset appended so far (0 if the log is empty).
    pub fn high_water_mark(&self) -> Offset {
        Offset::from_u64(self.high_water_mark.load(Ordering::Relaxed))
    }

    /// Deletes sealed segments beyond `retention_segments`, never deleting
    /// one that contains an offset at or below `min_checkpoint` unless
    /// `forward_only` is set.
    pub fn enforce_retention(
        &self,
        min_checkpoint: Option<Offset>,
        forward_only: bool,
    ) -> Result<Vec<PathBuf>, WalError> {
        let segments = list_segments(&self.dir)?;
        let active_seq = self.active.lock().unwrap_or_else(|p| p.into_inner()).seq;

        let sealed: Vec<&(u64, u32, PathBuf)> =
            segments.iter().filter(|(_, seq, _)| *seq != active_seq).collect();

        if sealed.len() <= self.retention_segments as usize {
            return Ok(Vec::new());
        }

        let deletable_count = sealed.len() - self.retention_segments as usize;
        let mut removed = Vec::new();

        for (_, seq, path) in sealed.into_iter().take(deletable_count) {
            if !forward_only {
                if let Some(min_offset) = min_checkpoint {
                    if *seq <= min_offset.segment_seq() {
                        continue;
                    }
                }
            }
            fs::remove_file(path)?;
            info!(path = %path.display(), "removed WAL segment under retention policy");
            removed.push(path.clone());
        }

        Ok(removed)
    }
}

/// Outcome of advancing a [`Cursor`].
pub enum CursorOutcome {
    /// A well-formed record and its offset.
    Record(Offset, Vec<u8>),
    /// The cursor has reached the end of the log (no more segments to read).
    End,
    /// A corrupt record frame was detected.
    Corrupt(WalError),
}

/// Sequential cursor over a snapshot of segment files, starting at a given
/// offset. Multiple cursors may coexist; each owns its own file handle.
pub struct Cursor {
    segments: Vec<(u64, u32, PathBuf)>,
    seg_idx: usize,
    reader: Option<(u32, BufReader<File>, u32)>, // (seq, reader, next_intra_index)
    skip_until: Offset,
}

impl Cursor {
    /// Advances to the next record, opening subsequent segment files as
    /// needed.
    pub fn next(&mut self) -> CursorOutcome {
        loop {
            if self.reader.is_none() {
                if self.seg_idx >= self.segments.len() {
                    return CursorOutcome::End;
                }
                let (_, seq, path) = &self.segments[self.seg_idx];
                let file = match File::open(path) {
                    Ok(f) => f,
                    Err(e) => return CursorOutcome::Corrupt(WalError::Io(e)),
                };
                self.reader = Some((*seq, BufReader::new(file), 0));
            }

            let (seq, reader, next_index) = self.reader.as_mut().unwrap();

            if *seq < self.skip_until.segment_seq() {
                self.reader = None;
                self.seg_idx += 1;
                continue;
            }

            let mut len_buf = [0u8; U32_SIZE];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.reader = None;
                    self.seg_idx += 1;
                    continue;
                }
                Err(e) => return CursorOutcome::Corrupt(WalError::Io(e)),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut crc_buf = [0u8; U32_SIZE];
            if let Err(e) = reader.read_exact(&mut crc_buf) {
                return CursorOutcome::Corrupt(if e.kind() == io::ErrorKind::UnexpectedEof {
                    WalError::UnexpectedEof
                } else {
                    WalError::Io(e)
                });
            }
            let expected_crc = u32::from_le_bytes(crc_buf);

            const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;
            if len > MAX_RECORD_SIZE {
                return CursorOutcome::Corrupt(WalError::RecordTooLarge(len));
            }

            let mut payload = vec![0u8; len];
            if let Err(e) = reader.read_exact(&mut payload) {
                return CursorOutcome::Corrupt(if e.kind() == io::ErrorKind::UnexpectedEof {
                    WalError::UnexpectedEof
                } else {
                    WalError::Io(e)
                });
            }

            if compute_crc(&payload) != expected_crc {
                return CursorOutcome::Corrupt(WalError::ChecksumMismatch);
            }

            let offset = Offset::new(*seq, *next_index);
            *next_index += 1;

            if offset < self.skip_until {
                continue;
            }

            return CursorOutcome::Record(offset, payload);
        }
    }

    /// Advances this cursor by `n` record positions from wherever it
    /// currently sits (used by the consumer's escalating skip policy),
    /// returning the outcome of the final, landing attempt — callers
    /// should treat a landing `Record` as success without calling `next()`
    /// again, since that would consume the record beyond the one skipped
    /// to.
    pub fn skip(&mut self, n: u64) -> CursorOutcome {
        let mut outcome = CursorOutcome::End;
        for _ in 0..n {
            outcome = self.next();
            if matches!(outcome, CursorOutcome::End) {
                break;
            }
        }
        outcome
    }

    /// Repositions to end-of-log by draining every remaining record.
    pub fn seek_to_end(&mut self) {
        loop {
            match self.next() {
                CursorOutcome::End => break,
                _ => continue,
            }
        }
    }
}
