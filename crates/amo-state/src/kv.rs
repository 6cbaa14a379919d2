//! The ordered key-value primitive under the non-Merkle stores.
//!
//! The disk engine is an external concern; this is an in-memory ordered map
//! behind a shared handle: clones see the same data, which is also how
//! restart recovery is exercised in tests. An optional undo journal provides
//! the per-transaction savepoint for secondary indexes.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct DbState {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    // When active, records (key, prior value) for every mutation.
    undo: Option<Vec<(Vec<u8>, Option<Vec<u8>>)>>,
}

/// An ordered KV store handle. Cheap to clone; all clones share storage.
#[derive(Clone, Default)]
pub struct MemDb {
    inner: Arc<RwLock<DbState>>,
}

impl MemDb {
    pub fn new() -> MemDb {
        MemDb::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.read().expect("kv lock").map.get(key).cloned()
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.inner.read().expect("kv lock").map.contains_key(key)
    }

    pub fn set(&self, key: &[u8], value: &[u8]) {
        let mut state = self.inner.write().expect("kv lock");
        let prior = state.map.insert(key.to_vec(), value.to_vec());
        if let Some(undo) = &mut state.undo {
            undo.push((key.to_vec(), prior));
        }
    }

    pub fn delete(&self, key: &[u8]) {
        let mut state = self.inner.write().expect("kv lock");
        let prior = state.map.remove(key);
        if prior.is_some() {
            if let Some(undo) = &mut state.undo {
                undo.push((key.to_vec(), prior));
            }
        }
    }

    /// All entries whose key starts with `prefix`, in key order (reversed
    /// when `rev`). Collected up front so callers are free to mutate while
    /// walking the result.
    pub fn scan_prefix(&self, prefix: &[u8], rev: bool) -> Vec<(Vec<u8>, Vec<u8>)> {
        let state = self.inner.read().expect("kv lock");
        let range = state
            .map
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()));
        let mut entries: Vec<_> = range.collect();
        if rev {
            entries.reverse();
        }
        entries
    }

    /// Start recording mutations for a savepoint. Savepoints do not nest.
    pub fn begin_undo(&self) {
        let mut state = self.inner.write().expect("kv lock");
        debug_assert!(state.undo.is_none(), "savepoint already active");
        state.undo = Some(Vec::new());
    }

    /// Keep all mutations since `begin_undo` and drop the journal.
    pub fn commit_undo(&self) {
        self.inner.write().expect("kv lock").undo = None;
    }

    /// Revert all mutations since `begin_undo`.
    pub fn revert_undo(&self) {
        let mut state = self.inner.write().expect("kv lock");
        if let Some(undo) = state.undo.take() {
            for (key, prior) in undo.into_iter().rev() {
                match prior {
                    Some(value) => state.map.insert(key, value),
                    None => state.map.remove(&key),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_storage() {
        let db = MemDb::new();
        let other = db.clone();
        db.set(b"a", b"1");
        assert_eq!(other.get(b"a"), Some(b"1".to_vec()));
    }

    #[test]
    fn scan_prefix_is_ordered_and_bounded() {
        let db = MemDb::new();
        db.set(b"x:2", b"b");
        db.set(b"x:1", b"a");
        db.set(b"y:1", b"c");
        let forward = db.scan_prefix(b"x:", false);
        assert_eq!(
            forward,
            vec![
                (b"x:1".to_vec(), b"a".to_vec()),
                (b"x:2".to_vec(), b"b".to_vec())
            ]
        );
        let reverse = db.scan_prefix(b"x:", true);
        assert_eq!(reverse[0].0, b"x:2".to_vec());
    }

    #[test]
    fn undo_restores_prior_state() {
        let db = MemDb::new();
        db.set(b"keep", b"old");
        db.begin_undo();
        db.set(b"keep", b"new");
        db.set(b"fresh", b"x");
        db.delete(b"keep");
        db.revert_undo();
        assert_eq!(db.get(b"keep"), Some(b"old".to_vec()));
        assert_eq!(db.get(b"fresh"), None);
    }

    #[test]
    fn commit_undo_keeps_mutations() {
        let db = MemDb::new();
        db.begin_undo();
        db.set(b"a", b"1");
        db.commit_undo();
        assert_eq!(db.get(b"a"), Some(b"1".to_vec()));
    }
}
