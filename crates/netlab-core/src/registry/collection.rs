// ── Generic name-keyed registry ──
//
// Concurrent storage with O(1) lookups and a `watch` snapshot that is
// rebuilt on every mutation.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use tokio::sync::watch;

use crate::error::CoreError;
use crate::stream::{EntityStream, Snapshot};

/// Authoritative store for one kind of deployed entity.
///
/// Names are unique: a second insert under the same name is rejected and the
/// first entry stays. Readers never block writers beyond a shard lock.
pub struct Registry<T: Send + Sync + 'static> {
    by_name: DashMap<String, Arc<T>>,
    /// Builds the error returned for a duplicate name.
    conflict: fn(String) -> CoreError,
    version: watch::Sender<u64>,
    snapshot: watch::Sender<Snapshot<T>>,
}

impl<T: Send + Sync + 'static> Registry<T> {
    pub(crate) fn new(conflict: fn(String) -> CoreError) -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_name: DashMap::new(),
            conflict,
            version,
            snapshot,
        }
    }

    /// Insert under `name`, or fail with the registry's conflict error.
    pub fn insert(&self, name: impl Into<String>, entry: T) -> Result<Arc<T>, CoreError> {
        let name = name.into();
        let entry = Arc::new(entry);
        match self.by_name.entry(name) {
            MapEntry::Occupied(occupied) => return Err((self.conflict)(occupied.key().clone())),
            MapEntry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&entry));
            }
        }
        self.publish();
        Ok(entry)
    }

    /// Remove by name. Absent names are a no-op and publish nothing.
    pub fn remove(&self, name: &str) -> Option<Arc<T>> {
        let removed = self.by_name.remove(name).map(|(_, v)| v);
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.by_name.get(name).map(|r| Arc::clone(r.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// All names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Current entries sorted by name (cheap `Arc` clone).
    pub fn snapshot(&self) -> Snapshot<T> {
        self.snapshot.borrow().clone()
    }

    /// Number of mutations since construction.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub fn subscribe(&self) -> EntityStream<T> {
        EntityStream::new(self.snapshot.subscribe())
    }

    pub fn clear(&self) {
        if self.by_name.is_empty() {
            return;
        }
        self.by_name.clear();
        self.publish();
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn publish(&self) {
        let mut entries: Vec<(String, Arc<T>)> = self
            .by_name
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let values: Vec<Arc<T>> = entries.into_iter().map(|(_, v)| v).collect();
        // send_modify updates even with zero receivers
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
        self.version.send_modify(|v| *v += 1);
    }
}
