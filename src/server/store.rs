use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use uuid::Uuid;

use crate::server::resolver::Stub;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("a stub with id {0} already exists")]
    DuplicateStubId(Uuid),
    #[error("no stub with id {0}")]
    StubNotFound(Uuid),
}

/// A stored stub together with its registration sequence number.
#[derive(Debug)]
pub struct StubEntry<S> {
    pub seq: u64,
    pub stub: Arc<S>,
}

impl<S> Clone for StubEntry<S> {
    fn clone(&self) -> Self {
        Self {
            seq: self.seq,
            stub: self.stub.clone(),
        }
    }
}

struct StoreState<S> {
    snapshot: Arc<Vec<StubEntry<S>>>,
    next_seq: u64,
}

/// The registered stubs in registration order.
///
/// Writers build a new entry list and swap it in, readers take the current list with a
/// reference count bump. A reader therefore always works on a complete list, never on one a
/// writer is halfway through changing.
pub struct StubStore<S> {
    state: RwLock<StoreState<S>>,
}

impl<S: Stub> Default for StubStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Stub> StubStore<S> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState {
                snapshot: Arc::new(Vec::new()),
                next_seq: 0,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState<S>> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState<S>> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// The current, immutable list of entries.
    pub fn snapshot(&self) -> Arc<Vec<StubEntry<S>>> {
        self.read().snapshot.clone()
    }

    pub fn add(&self, stub: S) -> Result<Arc<S>, Error> {
        let mut state = self.write();

        let id = stub.id();
        if state.snapshot.iter().any(|e| e.stub.id() == id) {
            return Err(Error::DuplicateStubId(id));
        }

        let stub = Arc::new(stub);
        let mut entries = state.snapshot.as_ref().clone();
        entries.push(StubEntry {
            seq: state.next_seq,
            stub: stub.clone(),
        });

        state.next_seq += 1;
        state.snapshot = Arc::new(entries);

        tracing::debug!("Added stub with id={}", id);
        Ok(stub)
    }

    /// Replaces the stub with the same id. The replacement keeps the original registration
    /// position.
    pub fn replace(&self, stub: S) -> Result<Arc<S>, Error> {
        let mut state = self.write();

        let id = stub.id();
        let position = state
            .snapshot
            .iter()
            .position(|e| e.stub.id() == id)
            .ok_or(Error::StubNotFound(id))?;

        let stub = Arc::new(stub);
        let mut entries = state.snapshot.as_ref().clone();
        entries[position].stub = stub.clone();
        state.snapshot = Arc::new(entries);

        tracing::debug!("Replaced stub with id={}", id);
        Ok(stub)
    }

    pub fn remove(&self, id: Uuid) -> Option<Arc<S>> {
        let removed = self.remove_matching(|stub| stub.id() == id);
        removed.into_iter().next()
    }

    /// Removes every stub the predicate holds for and returns them.
    pub fn remove_matching<F: Fn(&S) -> bool>(&self, predicate: F) -> Vec<Arc<S>> {
        let mut state = self.write();

        let (removed, kept): (Vec<StubEntry<S>>, Vec<StubEntry<S>>) = state
            .snapshot
            .iter()
            .cloned()
            .partition(|e| predicate(&e.stub));

        if !removed.is_empty() {
            state.snapshot = Arc::new(kept);
            tracing::debug!("Removed {} stub(s)", removed.len());
        }

        removed.into_iter().map(|e| e.stub).collect()
    }

    /// Removes all stubs except those `keep` holds for.
    pub fn reset<F: Fn(&S) -> bool>(&self, keep: F) -> Vec<Arc<S>> {
        self.remove_matching(|stub| !keep(stub))
    }

    pub fn find_by_id(&self, id: Uuid) -> Option<Arc<S>> {
        self.snapshot()
            .iter()
            .find(|e| e.stub.id() == id)
            .map(|e| e.stub.clone())
    }

    pub fn list(&self) -> Vec<Arc<S>> {
        self.snapshot().iter().map(|e| e.stub.clone()).collect()
    }

    /// The stubs that exactly match the input, in registration order, regardless of
    /// scenario state.
    pub fn all_matching(&self, input: &S::Input) -> Vec<Arc<S>> {
        self.snapshot()
            .iter()
            .filter(|e| e.stub.evaluate(input).is_exact_match())
            .map(|e| e.stub.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::server::resolver::tests::TextStub;

    #[test]
    fn add_rejects_duplicate_ids() {
        let store = StubStore::new();
        let stub = TextStub::new("a");
        let id = stub.id;
        store.add(stub).unwrap();

        let mut duplicate = TextStub::new("b");
        duplicate.id = id;
        assert_eq!(store.add(duplicate).unwrap_err(), Error::DuplicateStubId(id));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn replace_keeps_the_registration_position() {
        let store = StubStore::new();
        let first = TextStub::new("a");
        let first_id = first.id;
        store.add(first).unwrap();
        store.add(TextStub::new("b")).unwrap();

        let mut replacement = TextStub::new("z");
        replacement.id = first_id;
        store.replace(replacement).unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot[0].stub.id, first_id);
        assert_eq!(snapshot[0].stub.expected, "z");
        assert_eq!(snapshot[0].seq, 0);

        let unknown = TextStub::new("q");
        let unknown_id = unknown.id;
        assert_eq!(store.replace(unknown).unwrap_err(), Error::StubNotFound(unknown_id));
    }

    #[test]
    fn remove_and_reset() {
        let store = StubStore::new();
        let a = TextStub::new("a");
        let a_id = a.id;
        store.add(a).unwrap();
        store.add(TextStub::new("keep")).unwrap();
        store.add(TextStub::new("b")).unwrap();

        assert!(store.remove(a_id).is_some());
        assert!(store.remove(a_id).is_none());
        assert!(store.find_by_id(a_id).is_none());

        let removed = store.reset(|s| s.expected == "keep");
        assert_eq!(removed.len(), 1);
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn all_matching_ignores_non_matches() {
        let store = StubStore::new();
        store.add(TextStub::new("ab")).unwrap();
        store.add(TextStub::new("a")).unwrap();
        store.add(TextStub::new("x")).unwrap();

        assert_eq!(store.all_matching("abc").len(), 2);
    }

    #[test]
    fn snapshots_are_unaffected_by_later_writes() {
        let store = Arc::new(StubStore::new());
        store.add(TextStub::new("a")).unwrap();

        let before = store.snapshot();

        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    store.add(TextStub::new("x")).unwrap();
                }
            })
        };
        writer.join().unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(store.len(), 101);
    }
}
