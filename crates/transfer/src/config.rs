use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_SLICE_SIZE, TransferError};

/// Tunables for a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Slice size in bytes.
    pub slice_size: u64,
    /// Concurrent senders feeding the writer.
    pub workers: usize,
    /// Interval between progress reports, in milliseconds.
    pub progress_interval_ms: u64,
    /// Evict writers idle for this many seconds. 0 disables eviction.
    pub idle_timeout_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            slice_size: DEFAULT_SLICE_SIZE,
            workers: 1,
            progress_interval_ms: 500,
            idle_timeout_secs: 0,
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.slice_size == 0 {
            return Err(TransferError::InvalidSliceSize);
        }
        if self.workers == 0 {
            return Err(TransferError::Config("workers must be at least 1".into()));
        }
        if self.progress_interval_ms == 0 {
            return Err(TransferError::Config(
                "progress_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Idle timeout, `None` when eviction is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}
