use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::types::{Identity, WriterProgress};
use crate::writer::SliceWriter;

pub(crate) type WriterMap = RwLock<HashMap<Identity, Arc<SliceWriter>>>;

/// Map from identity to the single live writer for it (thread-safe).
///
/// Cloning yields another handle to the same map. Writers hold only a weak
/// reference back, so dropping every handle drops the map.
#[derive(Clone, Default)]
pub struct WriterRegistry {
    inner: Arc<WriterMap>,
}

impl WriterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the writer for `identity`, creating it on first reference.
    ///
    /// Concurrent callers for the same identity always receive the same
    /// instance. If a writer already exists, `path` is not consulted.
    pub fn get_or_create(&self, identity: &Identity, path: &Path) -> Arc<SliceWriter> {
        if let Some(writer) = self.inner.read().get(identity) {
            return Self::checked(writer, path);
        }

        let mut map = self.inner.write();
        // Another caller may have created it between the two locks.
        if let Some(writer) = map.get(identity) {
            return Self::checked(writer, path);
        }

        let writer = Arc::new(SliceWriter::new(
            identity.clone(),
            path.to_path_buf(),
            Arc::downgrade(&self.inner),
        ));
        map.insert(identity.clone(), Arc::clone(&writer));
        debug!(%identity, path = %path.display(), "writer registered");
        writer
    }

    fn checked(writer: &Arc<SliceWriter>, path: &Path) -> Arc<SliceWriter> {
        if writer.path() != path {
            warn!(
                identity = %writer.identity(),
                existing = %writer.path().display(),
                requested = %path.display(),
                "identity already bound to another destination"
            );
        }
        Arc::clone(writer)
    }

    /// Returns the live writer for `identity`, if any.
    pub fn get(&self, identity: &Identity) -> Option<Arc<SliceWriter>> {
        self.inner.read().get(identity).cloned()
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.inner.read().contains_key(identity)
    }

    /// Removes the entry for `identity`. Returns whether one was present.
    pub fn remove(&self, identity: &Identity) -> bool {
        self.inner.write().remove(identity).is_some()
    }

    /// Number of live writers.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Progress of every live writer, ordered by identity.
    pub fn snapshot(&self) -> Vec<WriterProgress> {
        let writers: Vec<Arc<SliceWriter>> = self.inner.read().values().cloned().collect();
        let mut progress: Vec<WriterProgress> = writers.iter().map(|w| w.progress()).collect();
        progress.sort_by(|a, b| a.identity.cmp(&b.identity));
        progress
    }

    /// Evicts and closes writers that have been idle for at least `max_idle`.
    ///
    /// Returns the identities that were evicted.
    pub fn sweep_idle(&self, max_idle: Duration) -> Vec<Identity> {
        let evicted: Vec<Arc<SliceWriter>> = {
            let mut map = self.inner.write();
            let stale: Vec<Identity> = map
                .iter()
                .filter(|(_, w)| w.idle_for() >= max_idle)
                .map(|(id, _)| id.clone())
                .collect();
            stale.iter().filter_map(|id| map.remove(id)).collect()
        };

        // Closing takes each writer's own lock; the map lock is already released.
        evicted
            .iter()
            .map(|w| {
                warn!(
                    identity = %w.identity(),
                    idle_secs = w.idle_for().as_secs(),
                    "evicting idle writer"
                );
                w.close();
                w.identity().clone()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    use crate::types::{Slice, WriterPhase};

    #[test]
    fn get_or_create_returns_same_instance() {
        let dir = TempDir::new().unwrap();
        let registry = WriterRegistry::new();
        let id = Identity::new("a");
        let path = dir.path().join("out.bin");

        let a = registry.get_or_create(&id, &path);
        let b = registry.get_or_create(&id, &path);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_identities_get_distinct_writers() {
        let dir = TempDir::new().unwrap();
        let registry = WriterRegistry::new();
        let a = registry.get_or_create(&Identity::new("a"), &dir.path().join("a"));
        let b = registry.get_or_create(&Identity::new("b"), &dir.path().join("b"));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn existing_writer_keeps_its_destination() {
        let dir = TempDir::new().unwrap();
        let registry = WriterRegistry::new();
        let id = Identity::new("a");
        let first = registry.get_or_create(&id, &dir.path().join("first"));
        let second = registry.get_or_create(&id, &dir.path().join("second"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.path(), dir.path().join("first"));
    }

    #[test]
    fn concurrent_get_or_create_is_race_free() {
        let dir = TempDir::new().unwrap();
        let registry = WriterRegistry::new();
        let path = dir.path().join("out.bin");
        let id = Identity::new("shared");
        let barrier = Arc::new(Barrier::new(32));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = registry.clone();
                let barrier = Arc::clone(&barrier);
                let id = id.clone();
                let path = path.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.get_or_create(&id, &path)
                })
            })
            .collect();

        let writers: Vec<Arc<SliceWriter>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let stored = registry.get(&id).unwrap();
        for w in &writers {
            assert!(Arc::ptr_eq(w, &stored));
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = WriterRegistry::new();
        let id = Identity::new("a");
        registry.get_or_create(&id, &dir.path().join("out.bin"));

        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn finalized_writer_does_not_remove_its_successor() {
        let dir = TempDir::new().unwrap();
        let registry = WriterRegistry::new();
        let id = Identity::new("a");

        let old = registry.get_or_create(&id, &dir.path().join("old.bin"));
        registry.remove(&id);
        let new = registry.get_or_create(&id, &dir.path().join("new.bin"));

        old.close();
        assert!(registry.contains(&id));
        assert!(Arc::ptr_eq(&registry.get(&id).unwrap(), &new));
    }

    #[test]
    fn snapshot_reports_live_writers() {
        let dir = TempDir::new().unwrap();
        let registry = WriterRegistry::new();
        let b = registry.get_or_create(&Identity::new("b"), &dir.path().join("b"));
        registry.get_or_create(&Identity::new("a"), &dir.path().join("a"));

        b.write(&Slice {
            identity: Identity::new("b"),
            total: 4,
            size: 1,
            offset: 0,
            content: vec![1],
        })
        .unwrap();

        let snap = registry.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].identity.as_str(), "a");
        assert_eq!(snap[0].phase, WriterPhase::Uninitialized);
        assert_eq!(snap[1].current_size, 1);
        assert!((snap[1].percent - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sweep_evicts_only_idle_writers() {
        let dir = TempDir::new().unwrap();
        let registry = WriterRegistry::new();
        let stale = registry.get_or_create(&Identity::new("stale"), &dir.path().join("s"));

        thread::sleep(Duration::from_millis(60));
        registry.get_or_create(&Identity::new("fresh"), &dir.path().join("f"));

        let evicted = registry.sweep_idle(Duration::from_millis(50));
        assert_eq!(evicted, vec![Identity::new("stale")]);
        assert_eq!(stale.phase(), WriterPhase::Finalized);
        assert!(registry.contains(&Identity::new("fresh")));
        assert!(!registry.contains(&Identity::new("stale")));
    }

    #[test]
    fn writers_outlive_dropped_registry() {
        let dir = TempDir::new().unwrap();
        let registry = WriterRegistry::new();
        let writer = registry.get_or_create(&Identity::new("a"), &dir.path().join("out.bin"));
        drop(registry);

        let status = writer
            .write(&Slice {
                identity: Identity::new("a"),
                total: 2,
                size: 2,
                offset: 0,
                content: b"hi".to_vec(),
            })
            .unwrap();
        assert_eq!(status, crate::types::WriteStatus::Completed);
    }
}
