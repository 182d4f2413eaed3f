//! Whole-file copies wired through the writer registry.
//!
//! These stand in for a networked deployment: every slice is routed to its
//! writer by identity, exactly as a remote sender's slice would be.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::info;

use crate::reader::{SliceReader, SliceStream};
use crate::registry::WriterRegistry;
use crate::types::{Identity, Slice, WriterPhase};
use crate::writer::SliceWriter;
use crate::{DEFAULT_SLICE_SIZE, TransferError};

/// Copies `source` to `destination` in [`DEFAULT_SLICE_SIZE`] slices.
pub fn copy_file(
    source: &Path,
    destination: &Path,
    registry: &WriterRegistry,
) -> Result<(), TransferError> {
    copy_file_with(source, destination, registry, DEFAULT_SLICE_SIZE)
}

/// Copies `source` to `destination` with one reader feeding one writer.
///
/// Returns once the writer has finalized; the destination handle is closed
/// by then.
pub fn copy_file_with(
    source: &Path,
    destination: &Path,
    registry: &WriterRegistry,
    slice_size: u64,
) -> Result<(), TransferError> {
    let mut stream = SliceReader::new(source, slice_size).open()?;
    let identity = stream.identity().clone();
    let total = stream.total();
    let writer = resolve_writer(registry, &identity, destination)?;

    while let Some(slice) = stream.next_slice()? {
        writer.write(&slice)?;
    }

    if writer.phase() != WriterPhase::Finalized {
        return Err(TransferError::Incomplete {
            covered: writer.current_size(),
            total,
        });
    }

    info!(
        %identity,
        source = %source.display(),
        destination = %destination.display(),
        total,
        "copy complete"
    );
    Ok(())
}

/// Copies `source` to `destination` with `workers` concurrent senders.
///
/// All workers pull from one shared traversal and each resolves its writer
/// through the registry independently, so they converge on a single writer
/// by identity. The first error stops every worker.
pub fn copy_file_parallel(
    source: &Path,
    destination: &Path,
    registry: &WriterRegistry,
    slice_size: u64,
    workers: usize,
) -> Result<(), TransferError> {
    if workers == 0 {
        return Err(TransferError::Config("workers must be at least 1".into()));
    }

    let stream = SliceReader::new(source, slice_size).open()?;
    let identity = stream.identity().clone();
    let total = stream.total();
    resolve_writer(registry, &identity, destination)?;
    let stream = Mutex::new(stream);
    let failed = AtomicBool::new(false);
    let first_error: Mutex<Option<TransferError>> = Mutex::new(None);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                while !failed.load(Ordering::Acquire) {
                    let result = next_shared(&stream).and_then(|slice| match slice {
                        Some(slice) => resolve_writer(registry, &slice.identity, destination)?
                            .write(&slice)
                            .map(Some),
                        None => Ok(None),
                    });
                    match result {
                        Ok(Some(_)) => {}
                        Ok(None) => break,
                        Err(e) => {
                            failed.store(true, Ordering::Release);
                            first_error.lock().get_or_insert(e);
                            break;
                        }
                    }
                }
            });
        }
    });

    if let Some(e) = first_error.into_inner() {
        return Err(e);
    }

    // Every slice was accepted, so the writer finalized and left the registry.
    if let Some(writer) = registry.get(&identity) {
        return Err(TransferError::Incomplete {
            covered: writer.current_size(),
            total,
        });
    }

    info!(
        %identity,
        source = %source.display(),
        destination = %destination.display(),
        total,
        workers,
        "parallel copy complete"
    );
    Ok(())
}

/// Returns the registry's writer for `identity`, provided it targets
/// `destination`.
fn resolve_writer(
    registry: &WriterRegistry,
    identity: &Identity,
    destination: &Path,
) -> Result<Arc<SliceWriter>, TransferError> {
    let writer = registry.get_or_create(identity, destination);
    if writer.path() != destination {
        return Err(TransferError::DestinationConflict {
            identity: identity.clone(),
            existing: writer.path().to_path_buf(),
            requested: destination.to_path_buf(),
        });
    }
    Ok(writer)
}

fn next_shared(stream: &Mutex<SliceStream>) -> Result<Option<Slice>, TransferError> {
    stream.lock().next_slice()
}
