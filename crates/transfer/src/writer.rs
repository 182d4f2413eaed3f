use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::coverage::RangeSet;
use crate::registry::WriterMap;
use crate::types::{Identity, Slice, WriteStatus, WriterPhase, WriterProgress};
use crate::validation::validate_slice;

/// Destination handle for one identity.
///
/// Shared by every sender of that identity. The destination is allocated
/// once, on the first slice; slices may then arrive in any order and from
/// any thread. Once `[0, total)` is covered the writer closes its file and
/// leaves the registry; it never accepts another slice.
pub struct SliceWriter {
    identity: Identity,
    path: PathBuf,
    state: Mutex<WriterState>,
    last_activity: Mutex<Instant>,
    registry: Weak<WriterMap>,
}

struct WriterState {
    phase: Phase,
    total: u64,
    coverage: RangeSet,
    received: u64,
    last_error: Option<String>,
}

enum Phase {
    Uninitialized,
    Active(File),
    /// Allocation failed; the reason is replayed to every later caller.
    Failed(String),
    Finalized,
}

impl Phase {
    fn observed(&self) -> WriterPhase {
        match self {
            Phase::Uninitialized => WriterPhase::Uninitialized,
            Phase::Active(_) => WriterPhase::Active,
            Phase::Failed(_) => WriterPhase::Failed,
            Phase::Finalized => WriterPhase::Finalized,
        }
    }
}

impl SliceWriter {
    pub(crate) fn new(identity: Identity, path: PathBuf, registry: Weak<WriterMap>) -> Self {
        Self {
            identity,
            path,
            state: Mutex::new(WriterState {
                phase: Phase::Uninitialized,
                total: 0,
                coverage: RangeSet::new(),
                received: 0,
                last_error: None,
            }),
            last_activity: Mutex::new(Instant::now()),
            registry,
        }
    }

    /// Allocates the destination at its final size, exactly once.
    ///
    /// The first caller opens or creates the file and sizes it to `total`,
    /// writing at most a single byte at `total - 1`, so a new file is
    /// sparse and an existing one keeps its bytes. Concurrent callers wait
    /// for that outcome; a failed allocation is never retried.
    pub fn ensure_allocated(&self, total: u64) -> Result<(), TransferError> {
        let mut state = self.state.lock();
        self.allocate_locked(&mut state, total)
    }

    fn allocate_locked(&self, state: &mut WriterState, total: u64) -> Result<(), TransferError> {
        match &state.phase {
            Phase::Uninitialized => {}
            Phase::Active(_) if state.total == total => return Ok(()),
            Phase::Active(_) => {
                return Err(TransferError::TotalMismatch {
                    expected: state.total,
                    got: total,
                });
            }
            Phase::Failed(reason) => {
                return Err(TransferError::AllocationFailed {
                    path: self.path.clone(),
                    reason: reason.clone(),
                });
            }
            Phase::Finalized => return Err(TransferError::WriterClosed(self.identity.clone())),
        }

        if total == 0 {
            return Err(TransferError::InvalidSlice(
                "cannot allocate a zero-length destination".into(),
            ));
        }

        match allocate_sparse(&self.path, total) {
            Ok(file) => {
                info!(
                    identity = %self.identity,
                    path = %self.path.display(),
                    total,
                    "destination allocated"
                );
                state.phase = Phase::Active(file);
                state.total = total;
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(
                    identity = %self.identity,
                    path = %self.path.display(),
                    error = %reason,
                    "destination allocation failed"
                );
                state.phase = Phase::Failed(reason.clone());
                Err(TransferError::AllocationFailed {
                    path: self.path.clone(),
                    reason,
                })
            }
        }
    }

    /// Writes one slice at its offset.
    ///
    /// Writes are serialized per writer so that the coverage bookkeeping and
    /// the completion check move together with the bytes on disk.
    pub fn write(&self, slice: &Slice) -> Result<WriteStatus, TransferError> {
        validate_slice(slice)?;
        if slice.identity != self.identity {
            return Err(TransferError::IdentityMismatch {
                expected: self.identity.clone(),
                got: slice.identity.clone(),
            });
        }

        let mut state = self.state.lock();
        self.allocate_locked(&mut state, slice.total)?;

        let Phase::Active(file) = &mut state.phase else {
            return Err(TransferError::WriterClosed(self.identity.clone()));
        };
        if let Err(e) = write_at(file, slice.offset, &slice.content) {
            warn!(
                identity = %self.identity,
                offset = slice.offset,
                size = slice.size,
                error = %e,
                "slice write failed"
            );
            state.last_error = Some(e.to_string());
            return Err(e.into());
        }

        let added = state.coverage.insert(slice.offset, slice.end());
        state.received += slice.size;
        *self.last_activity.lock() = Instant::now();

        if added == 0 {
            warn!(
                identity = %self.identity,
                offset = slice.offset,
                size = slice.size,
                "duplicate slice ignored for completion"
            );
            return Ok(WriteStatus::Duplicate);
        }

        debug!(
            identity = %self.identity,
            offset = slice.offset,
            size = slice.size,
            covered = state.coverage.covered(),
            total = state.total,
            "slice written"
        );

        if !state.coverage.is_complete(state.total) {
            return Ok(WriteStatus::Partial);
        }

        self.finalize_locked(&mut state);
        drop(state);
        self.release();
        Ok(WriteStatus::Completed)
    }

    /// Closes the writer without waiting for completion.
    ///
    /// Used to evict abandoned transfers. Already-finalized writers are left
    /// untouched.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if matches!(state.phase, Phase::Finalized) {
                return;
            }
            warn!(
                identity = %self.identity,
                covered = state.coverage.covered(),
                total = state.total,
                missing_ranges = state.coverage.gaps(state.total).len(),
                "closing incomplete writer"
            );
            self.finalize_locked(&mut state);
        }
        self.release();
    }

    fn finalize_locked(&self, state: &mut WriterState) {
        if let Phase::Active(file) = std::mem::replace(&mut state.phase, Phase::Finalized) {
            if let Err(e) = file.sync_data() {
                warn!(identity = %self.identity, error = %e, "sync before close failed");
            }
            info!(
                identity = %self.identity,
                path = %self.path.display(),
                total = state.total,
                received = state.received,
                "writer finalized"
            );
        }
    }

    /// Removes this instance from its registry, if it is still the entry.
    fn release(&self) {
        let Some(map) = self.registry.upgrade() else {
            return;
        };
        let mut map = map.write();
        let is_self = map
            .get(&self.identity)
            .is_some_and(|w| std::ptr::eq(Arc::as_ptr(w), self));
        if is_self {
            map.remove(&self.identity);
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn phase(&self) -> WriterPhase {
        self.state.lock().phase.observed()
    }

    /// Total size, 0 before allocation.
    pub fn total(&self) -> u64 {
        self.state.lock().total
    }

    /// Distinct bytes written so far.
    pub fn current_size(&self) -> u64 {
        self.state.lock().coverage.covered()
    }

    /// Percentage of distinct bytes written.
    pub fn current_percent(&self) -> f64 {
        let state = self.state.lock();
        percent(state.coverage.covered(), state.total)
    }

    /// Sum of all accepted slice sizes, duplicates included.
    pub fn received_bytes(&self) -> u64 {
        self.state.lock().received
    }

    /// Message of the last failed positioned write, if any.
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    /// Time since the writer was created or last accepted a slice.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn progress(&self) -> WriterProgress {
        let state = self.state.lock();
        WriterProgress {
            identity: self.identity.clone(),
            path: self.path.clone(),
            phase: state.phase.observed(),
            current_size: state.coverage.covered(),
            total: state.total,
            percent: percent(state.coverage.covered(), state.total),
            received_bytes: state.received,
        }
    }
}

fn percent(covered: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    covered as f64 / total as f64 * 100.0
}

/// Brings `path` to exactly `total` bytes without touching existing content.
///
/// A shorter file is extended by writing only the last byte; a longer one
/// is trimmed.
fn allocate_sparse(path: &Path, total: u64) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    let len = file.metadata()?.len();
    if len > total {
        file.set_len(total)?;
    } else if len < total {
        write_at(&mut file, total - 1, &[0])?;
    }
    Ok(file)
}

fn write_at(file: &mut File, offset: u64, data: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)
}
