//! Write-ahead log: segmented log, batch codec, producer, and consumer.
//!
//! | Sub-module | Responsibility |
//! |------------|----------------|
//! | [`segment`] | Append-only byte log partitioned into time-bucketed segments |
//! | [`codec`] | Binary serialization of a batch |
//! | [`producer`] | Appends one batch atomically, returns its offset |
//! | [`consumer`] | Sequential cursor with checkpointing and corruption-skip policy |

pub mod codec;
pub mod consumer;
pub mod producer;
pub mod segment;

pub use consumer::{DataLossEvent, DataLossKind, WalConsumer};
pub use producer::WalProducer;
pub use segment::{Cursor, CursorOutcome, Offset, SegmentedLog, WalError};
