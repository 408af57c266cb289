use std::{
    collections::VecDeque,
    sync::{Arc, RwLock},
};

/// Journal limit that never drops entries.
pub const UNBOUNDED: usize = usize::MAX;

/// A bounded, append-only log of served events. The oldest entry is dropped once the limit is
/// reached. A limit of zero disables recording.
pub struct Journal<E> {
    limit: usize,
    entries: RwLock<VecDeque<Arc<E>>>,
}

impl<E> Journal<E> {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            entries: RwLock::new(VecDeque::new()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn record(&self, event: E) -> Arc<E> {
        let event = Arc::new(event);

        if self.limit == 0 {
            return event;
        }

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        while entries.len() >= self.limit {
            entries.pop_front();
        }
        entries.push_back(event.clone());

        event
    }

    /// All recorded events, oldest first.
    pub fn all(&self) -> Vec<Arc<E>> {
        self.filter(|_| true)
    }

    pub fn filter<F: Fn(&E) -> bool>(&self, predicate: F) -> Vec<Arc<E>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        tracing::trace!("Cleared journal");
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
