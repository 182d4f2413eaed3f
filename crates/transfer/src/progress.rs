use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::registry::WriterRegistry;
use crate::types::{WriterPhase, WriterProgress};

/// Default progress notification interval.
const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Callback invoked with a writer's progress.
pub type ProgressCallback = Box<dyn Fn(WriterProgress) + Send + Sync>;

/// Reports the progress of every live writer in a registry, periodically.
///
/// When an idle timeout is set, each tick also evicts writers that stopped
/// receiving slices.
pub struct ProgressTracker {
    inner: Arc<RwLock<TrackerInner>>,
    stop: Arc<Mutex<Option<tokio::sync::oneshot::Sender<()>>>>,
}

struct TrackerInner {
    callbacks: Vec<ProgressCallback>,
    registry: WriterRegistry,
    interval: Duration,
    idle_timeout: Option<Duration>,
}

impl TrackerInner {
    fn report(&self, live_only: bool) {
        for progress in self.registry.snapshot() {
            if live_only
                && !matches!(
                    progress.phase,
                    WriterPhase::Uninitialized | WriterPhase::Active
                )
            {
                continue;
            }
            for cb in &self.callbacks {
                cb(progress.clone());
            }
        }
    }
}

impl ProgressTracker {
    /// Creates a tracker over `registry`.
    ///
    /// If `interval` is `None`, defaults to 500 ms.
    pub fn new(registry: WriterRegistry, interval: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(TrackerInner {
                callbacks: Vec::new(),
                registry,
                interval: interval.unwrap_or(DEFAULT_INTERVAL),
                idle_timeout: None,
            })),
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Evicts writers idle for at least `timeout` on every tick.
    pub fn with_idle_timeout(self, timeout: Option<Duration>) -> Self {
        self.inner.write().idle_timeout = timeout;
        self
    }

    /// Registers a progress callback.
    pub fn on_progress(&self, callback: ProgressCallback) {
        self.inner.write().callbacks.push(callback);
    }

    /// Sends a one-time progress notification for every tracked writer.
    pub fn notify(&self) {
        self.inner.read().report(false);
    }

    /// Starts periodic notifications in a background tokio task.
    ///
    /// Call [`stop`](Self::stop) to cancel.
    pub fn start(&self) {
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        {
            let mut stop = self.stop.lock();
            // Replacing the sender stops any previous task.
            *stop = Some(tx);
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let interval = inner.read().interval;
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let i = inner.read();
                        if let Some(max_idle) = i.idle_timeout {
                            let evicted = i.registry.sweep_idle(max_idle);
                            if !evicted.is_empty() {
                                debug!(count = evicted.len(), "idle writers evicted");
                            }
                        }
                        i.report(true);
                    }
                    _ = &mut rx => {
                        break;
                    }
                }
            }
        });
    }

    /// Stops the periodic notification task.
    pub fn stop(&self) {
        // Dropping the sender signals the task to exit.
        drop(self.stop.lock().take());
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Transfer speed over a sliding time window.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: VecDeque<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: VecDeque::new(),
                max_samples: max_samples.unwrap_or(100).max(2),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records `bytes` transferred since the previous sample.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.inner.lock();
        let now = Instant::now();
        s.samples.push_back(SpeedSample {
            bytes,
            timestamp: now,
        });

        if let Some(cutoff) = now.checked_sub(s.window_size) {
            while s.samples.front().is_some_and(|f| f.timestamp < cutoff) {
                s.samples.pop_front();
            }
        }

        while s.samples.len() > s.max_samples {
            s.samples.pop_front();
        }
    }

    /// Average bytes/second within the window; 0.0 with fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock();
        let (Some(first), Some(last)) = (s.samples.front(), s.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if s.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }

        // The first sample only marks the start of the window.
        let bytes: u64 = s.samples.iter().skip(1).map(|sample| sample.bytes).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to transfer `remaining_bytes`; `None` while speed is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Clears all recorded samples.
    pub fn reset(&self) {
        self.inner.lock().samples.clear();
    }
}
