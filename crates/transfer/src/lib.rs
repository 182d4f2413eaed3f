//! Sliced transfer of large files.
//!
//! A source file is cut into fixed-size [`Slice`]s by a [`SliceReader`] and
//! reassembled by a [`SliceWriter`]. Writers are shared through a
//! [`WriterRegistry`], so any number of senders that agree on a slice's
//! [`Identity`] converge on one destination file, in any order.

mod config;
mod copy;
mod coverage;
mod identity;
mod progress;
mod reader;
mod registry;
mod types;
mod validation;
mod writer;

use std::path::PathBuf;

pub use config::TransferConfig;
pub use copy::{copy_file, copy_file_parallel, copy_file_with};
pub use coverage::RangeSet;
pub use identity::{IdentityHasher, Sha256Identity, calculate_file_checksum, checksum_bytes};
pub use progress::{ProgressCallback, ProgressTracker, SpeedCalculator};
pub use reader::{SliceReader, SliceStream};
pub use registry::WriterRegistry;
pub use types::{Identity, Slice, WriteStatus, WriterPhase, WriterProgress};
pub use validation::validate_slice;
pub use writer::SliceWriter;

/// Default slice size: 4 MiB.
///
/// Large enough to keep per-slice syscall and bookkeeping overhead low,
/// small enough that a handful of in-flight slices stay cheap to buffer.
pub const DEFAULT_SLICE_SIZE: u64 = 4 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("slice size must be greater than zero")]
    InvalidSliceSize,

    #[error("source file is empty: {}", .0.display())]
    EmptySource(PathBuf),

    #[error("cannot resolve path {}: {source}", .path.display())]
    UnresolvedPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("short read at offset {offset}: expected {expected} bytes")]
    ShortRead { offset: u64, expected: u64 },

    #[error("invalid slice: {0}")]
    InvalidSlice(String),

    #[error("slice identity {got} does not belong to writer {expected}")]
    IdentityMismatch { expected: Identity, got: Identity },

    #[error("slice total {got} does not match allocated total {expected}")]
    TotalMismatch { expected: u64, got: u64 },

    #[error("allocation of {} failed: {reason}", .path.display())]
    AllocationFailed { path: PathBuf, reason: String },

    #[error("writer already closed: {0}")]
    WriterClosed(Identity),

    #[error("transfer incomplete: {covered} of {total} bytes written")]
    Incomplete { covered: u64, total: u64 },

    #[error(
        "{identity} is already being written to {}, not {}",
        .existing.display(),
        .requested.display()
    )]
    DestinationConflict {
        identity: Identity,
        existing: PathBuf,
        requested: PathBuf,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}
