//! The authenticated key-value store.
//!
//! An immutable AVL tree with structural sharing: every mutation path-copies
//! from the root, so the working tree is a persistent snapshot and a per-tx
//! savepoint is a clone of the root handle. Each node carries a SHA-256 hash
//! over (height, size, key, value, child hashes), making the root hash a
//! commitment to the full ordered contents. `save` freezes the working tree
//! as the next version and writes its nodes into the backing KV store, from
//! which any saved version can be reloaded by root hash.
//!
//! Determinism contract: two trees built by the same sequence of set/remove
//! calls have equal working hashes.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use color_eyre::{Report, eyre::bail};
use sha2::{Digest, Sha256};

use crate::kv::MemDb;

const KEY_NODE: &[u8] = b"node:";
const KEY_ROOT: &[u8] = b"root:";
const KEY_LATEST: &[u8] = b"latest";

struct Node {
    key: Vec<u8>,
    value: Vec<u8>,
    height: u8,
    size: u64,
    hash: [u8; 32],
    left: Option<Arc<Node>>,
    right: Option<Arc<Node>>,
}

type Link = Option<Arc<Node>>;

fn height(link: &Link) -> u8 {
    link.as_ref().map_or(0, |n| n.height)
}

fn size(link: &Link) -> u64 {
    link.as_ref().map_or(0, |n| n.size)
}

impl Node {
    fn new(key: Vec<u8>, value: Vec<u8>, left: Link, right: Link) -> Arc<Node> {
        let height = 1 + height(&left).max(height(&right));
        let size = 1 + size(&left) + size(&right);

        let mut hasher = Sha256::new();
        hasher.update([height]);
        hasher.update(size.to_be_bytes());
        hasher.update((key.len() as u64).to_be_bytes());
        hasher.update(&key);
        hasher.update((value.len() as u64).to_be_bytes());
        hasher.update(&value);
        for child in [&left, &right] {
            match child {
                Some(node) => {
                    hasher.update([1]);
                    hasher.update(node.hash);
                }
                None => hasher.update([0]),
            }
        }

        Arc::new(Node {
            hash: hasher.finalize().into(),
            key,
            value,
            height,
            size,
            left,
            right,
        })
    }

    fn balance_factor(&self) -> i16 {
        height(&self.left) as i16 - height(&self.right) as i16
    }
}

fn rotate_right(node: &Arc<Node>) -> Arc<Node> {
    let left = node.left.as_ref().expect("rotate_right needs a left child");
    let lowered = Node::new(
        node.key.clone(),
        node.value.clone(),
        left.right.clone(),
        node.right.clone(),
    );
    Node::new(
        left.key.clone(),
        left.value.clone(),
        left.left.clone(),
        Some(lowered),
    )
}

fn rotate_left(node: &Arc<Node>) -> Arc<Node> {
    let right = node.right.as_ref().expect("rotate_left needs a right child");
    let lowered = Node::new(
        node.key.clone(),
        node.value.clone(),
        node.left.clone(),
        right.left.clone(),
    );
    Node::new(
        right.key.clone(),
        right.value.clone(),
        Some(lowered),
        right.right.clone(),
    )
}

fn rebalance(node: Arc<Node>) -> Arc<Node> {
    let factor = node.balance_factor();
    if factor > 1 {
        let left = node.left.as_ref().expect("left-heavy node has left child");
        if left.balance_factor() < 0 {
            let rotated = Node::new(
                node.key.clone(),
                node.value.clone(),
                Some(rotate_left(left)),
                node.right.clone(),
            );
            rotate_right(&rotated)
        } else {
            rotate_right(&node)
        }
    } else if factor < -1 {
        let right = node.right.as_ref().expect("right-heavy node has right child");
        if right.balance_factor() > 0 {
            let rotated = Node::new(
                node.key.clone(),
                node.value.clone(),
                node.left.clone(),
                Some(rotate_right(right)),
            );
            rotate_left(&rotated)
        } else {
            rotate_left(&node)
        }
    } else {
        node
    }
}

fn insert(link: &Link, key: &[u8], value: &[u8]) -> Arc<Node> {
    let Some(node) = link else {
        return Node::new(key.to_vec(), value.to_vec(), None, None);
    };
    match key.cmp(&node.key) {
        Ordering::Equal => Node::new(
            key.to_vec(),
            value.to_vec(),
            node.left.clone(),
            node.right.clone(),
        ),
        Ordering::Less => rebalance(Node::new(
            node.key.clone(),
            node.value.clone(),
            Some(insert(&node.left, key, value)),
            node.right.clone(),
        )),
        Ordering::Greater => rebalance(Node::new(
            node.key.clone(),
            node.value.clone(),
            node.left.clone(),
            Some(insert(&node.right, key, value)),
        )),
    }
}

// Remove the smallest key in the subtree, returning (its node, the remainder).
fn take_min(node: &Arc<Node>) -> (Arc<Node>, Link) {
    match &node.left {
        None => (node.clone(), node.right.clone()),
        Some(left) => {
            let (min, remainder) = take_min(left);
            let rebuilt = rebalance(Node::new(
                node.key.clone(),
                node.value.clone(),
                remainder,
                node.right.clone(),
            ));
            (min, Some(rebuilt))
        }
    }
}

fn delete(link: &Link, key: &[u8]) -> (Link, bool) {
    let Some(node) = link else {
        return (None, false);
    };
    match key.cmp(&node.key) {
        Ordering::Equal => {
            let merged = match (&node.left, &node.right) {
                (None, right) => right.clone(),
                (left, None) => left.clone(),
                (Some(_), Some(right)) => {
                    let (successor, remainder) = take_min(right);
                    Some(rebalance(Node::new(
                        successor.key.clone(),
                        successor.value.clone(),
                        node.left.clone(),
                        remainder,
                    )))
                }
            };
            (merged, true)
        }
        Ordering::Less => {
            let (new_left, removed) = delete(&node.left, key);
            if !removed {
                return (Some(node.clone()), false);
            }
            (
                Some(rebalance(Node::new(
                    node.key.clone(),
                    node.value.clone(),
                    new_left,
                    node.right.clone(),
                ))),
                true,
            )
        }
        Ordering::Greater => {
            let (new_right, removed) = delete(&node.right, key);
            if !removed {
                return (Some(node.clone()), false);
            }
            (
                Some(rebalance(Node::new(
                    node.key.clone(),
                    node.value.clone(),
                    node.left.clone(),
                    new_right,
                ))),
                true,
            )
        }
    }
}

fn lookup<'a>(link: &'a Link, key: &[u8]) -> Option<&'a [u8]> {
    let node = link.as_ref()?;
    match key.cmp(&node.key) {
        Ordering::Equal => Some(&node.value),
        Ordering::Less => lookup(&node.left, key),
        Ordering::Greater => lookup(&node.right, key),
    }
}

// In-order walk over [start, end], calling f until it returns true (stop).
// Returns whether the walk was stopped.
fn walk(
    link: &Link,
    start: &[u8],
    end: Option<&[u8]>,
    ascending: bool,
    f: &mut dyn FnMut(&[u8], &[u8]) -> bool,
) -> bool {
    let Some(node) = link else {
        return false;
    };
    let above_start = node.key.as_slice() >= start;
    let below_end = end.map_or(true, |end| node.key.as_slice() <= end);
    if ascending {
        if above_start && walk(&node.left, start, end, ascending, f) {
            return true;
        }
        if above_start && below_end && f(&node.key, &node.value) {
            return true;
        }
        if below_end && walk(&node.right, start, end, ascending, f) {
            return true;
        }
    } else {
        if below_end && walk(&node.right, start, end, ascending, f) {
            return true;
        }
        if above_start && below_end && f(&node.key, &node.value) {
            return true;
        }
        if above_start && walk(&node.left, start, end, ascending, f) {
            return true;
        }
    }
    false
}

/// A working-tree snapshot handle, restorable in O(1).
#[derive(Clone)]
pub struct TreeSnapshot {
    root: Link,
}

pub struct MerkleTree {
    db: MemDb,
    working: Link,
    version: u64,
    saved: Mutex<BTreeMap<u64, Link>>,
}

impl MerkleTree {
    pub fn new(db: MemDb) -> MerkleTree {
        MerkleTree {
            db,
            working: None,
            version: 0,
            saved: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn has(&self, key: &[u8]) -> bool {
        lookup(&self.working, key).is_some()
    }

    pub fn get_working(&self, key: &[u8]) -> Option<Vec<u8>> {
        lookup(&self.working, key).map(<[u8]>::to_vec)
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) {
        self.working = Some(insert(&self.working, key, value));
    }

    pub fn remove(&mut self, key: &[u8]) -> bool {
        let (root, removed) = delete(&self.working, key);
        self.working = root;
        removed
    }

    /// Hash of the current working tree; equal to the hash the next `save`
    /// will return.
    pub fn working_hash(&self) -> [u8; 32] {
        root_hash(&self.working)
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            root: self.working.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: TreeSnapshot) {
        self.working = snapshot.root;
    }

    /// Freeze the working tree as the next version, persist it, and return
    /// (root hash, new version).
    pub fn save(&mut self) -> ([u8; 32], u64) {
        self.version += 1;
        if let Some(root) = &self.working {
            persist(&self.db, root);
        }
        self.db
            .set(&root_key(self.version), &root_hash(&self.working));
        self.db.set(KEY_LATEST, &self.version.to_be_bytes());
        self.saved
            .lock()
            .expect("saved-roots lock")
            .insert(self.version, self.working.clone());
        (root_hash(&self.working), self.version)
    }

    /// Restart recovery: point the working tree at the latest saved version.
    pub fn load(&mut self) -> Result<u64, Report> {
        let Some(latest) = self.db.get(KEY_LATEST) else {
            self.version = 0;
            self.working = None;
            return Ok(0);
        };
        let version = u64::from_be_bytes(
            latest
                .as_slice()
                .try_into()
                .map_err(|_| color_eyre::eyre::eyre!("corrupt latest-version record"))?,
        );
        self.working = self.load_root(version)?;
        self.version = version;
        self.saved
            .lock()
            .expect("saved-roots lock")
            .insert(version, self.working.clone());
        Ok(version)
    }

    /// Roll the store back to `version`, discarding every later version.
    pub fn load_version_for_overwriting(&mut self, version: u64) -> Result<u64, Report> {
        self.working = if version == 0 {
            None
        } else {
            self.load_root(version)?
        };
        // Drop the root records of the discarded versions; their orphaned
        // nodes stay in the node store (no pruning).
        let mut stale = version + 1;
        while self.db.has(&root_key(stale)) {
            self.db.delete(&root_key(stale));
            stale += 1;
        }
        self.version = version;
        self.db.set(KEY_LATEST, &version.to_be_bytes());
        self.saved
            .lock()
            .expect("saved-roots lock")
            .retain(|&v, _| v <= version);
        Ok(version)
    }

    pub fn get_versioned(&self, key: &[u8], version: u64) -> Option<Vec<u8>> {
        let cached = self
            .saved
            .lock()
            .expect("saved-roots lock")
            .get(&version)
            .cloned();
        let root = match cached {
            Some(root) => root,
            None => {
                let root = self.load_root(version).ok()?;
                self.saved
                    .lock()
                    .expect("saved-roots lock")
                    .insert(version, root.clone());
                root
            }
        };
        lookup(&root, key).map(<[u8]>::to_vec)
    }

    /// In-order scan of the working tree over the inclusive range
    /// [start, end], stopping early when the callback returns true.
    pub fn iterate_range(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        ascending: bool,
        mut f: impl FnMut(&[u8], &[u8]) -> bool,
    ) {
        // Walk a snapshot of the root so the callback may mutate the tree.
        let root = self.working.clone();
        walk(&root, start, end, ascending, &mut f);
    }

    /// The same scan against a saved version.
    pub fn iterate_range_at(
        &self,
        version: u64,
        start: &[u8],
        end: Option<&[u8]>,
        ascending: bool,
        mut f: impl FnMut(&[u8], &[u8]) -> bool,
    ) {
        let cached = self
            .saved
            .lock()
            .expect("saved-roots lock")
            .get(&version)
            .cloned();
        let root = match cached {
            Some(root) => root,
            None => match self.load_root(version) {
                Ok(root) => {
                    self.saved
                        .lock()
                        .expect("saved-roots lock")
                        .insert(version, root.clone());
                    root
                }
                Err(_) => return,
            },
        };
        walk(&root, start, end, ascending, &mut f);
    }

    fn load_root(&self, version: u64) -> Result<Link, Report> {
        let Some(hash) = self.db.get(&root_key(version)) else {
            bail!("no saved root for version {version}");
        };
        if hash == root_hash(&None) {
            return Ok(None);
        }
        Ok(Some(load_node(&self.db, &hash)?))
    }
}

fn root_key(version: u64) -> Vec<u8> {
    let mut key = KEY_ROOT.to_vec();
    key.extend_from_slice(&version.to_be_bytes());
    key
}

fn node_key(hash: &[u8]) -> Vec<u8> {
    let mut key = KEY_NODE.to_vec();
    key.extend_from_slice(hash);
    key
}

fn root_hash(link: &Link) -> [u8; 32] {
    match link {
        Some(node) => node.hash,
        // The hash of the empty tree is the hash of no input.
        None => Sha256::digest([]).into(),
    }
}

// Write the subtree into the node store, skipping subtrees already present
// (a node's hash commits to its whole subtree).
fn persist(db: &MemDb, node: &Arc<Node>) {
    let key = node_key(&node.hash);
    if db.has(&key) {
        return;
    }
    if let Some(left) = &node.left {
        persist(db, left);
    }
    if let Some(right) = &node.right {
        persist(db, right);
    }
    db.set(&key, &encode_node(node));
}

fn encode_node(node: &Node) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(node.height);
    buf.extend_from_slice(&node.size.to_be_bytes());
    buf.extend_from_slice(&(node.key.len() as u64).to_be_bytes());
    buf.extend_from_slice(&node.key);
    buf.extend_from_slice(&(node.value.len() as u64).to_be_bytes());
    buf.extend_from_slice(&node.value);
    for child in [&node.left, &node.right] {
        match child {
            Some(c) => {
                buf.push(1);
                buf.extend_from_slice(&c.hash);
            }
            None => buf.push(0),
        }
    }
    buf
}

fn take<'a>(buf: &'a [u8], at: &mut usize, n: usize) -> Result<&'a [u8], Report> {
    if *at + n > buf.len() {
        bail!("truncated merkle node record");
    }
    let slice = &buf[*at..*at + n];
    *at += n;
    Ok(slice)
}

fn load_node(db: &MemDb, hash: &[u8]) -> Result<Arc<Node>, Report> {
    let Some(buf) = db.get(&node_key(hash)) else {
        bail!("missing merkle node {}", hex::encode(hash));
    };
    let mut at = 0usize;
    take(&buf, &mut at, 1)?; // height, recomputed below
    take(&buf, &mut at, 8)?; // size, recomputed below
    let key_len = u64::from_be_bytes(take(&buf, &mut at, 8)?.try_into().expect("8 bytes")) as usize;
    let key = take(&buf, &mut at, key_len)?.to_vec();
    let value_len =
        u64::from_be_bytes(take(&buf, &mut at, 8)?.try_into().expect("8 bytes")) as usize;
    let value = take(&buf, &mut at, value_len)?.to_vec();
    let mut children: [Link; 2] = [None, None];
    for child in &mut children {
        let flag = take(&buf, &mut at, 1)?[0];
        if flag == 1 {
            let child_hash = take(&buf, &mut at, 32)?.to_vec();
            *child = Some(load_node(db, &child_hash)?);
        }
    }
    let [left, right] = children;
    let node = Node::new(key, value, left, right);
    if node.hash != hash {
        bail!("merkle node hash mismatch for {}", hex::encode(hash));
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tree() -> MerkleTree {
        MerkleTree::new(MemDb::new())
    }

    #[test]
    fn set_get_remove() {
        let mut t = tree();
        t.set(b"a", b"1");
        t.set(b"b", b"2");
        assert!(t.has(b"a"));
        assert_eq!(t.get_working(b"b"), Some(b"2".to_vec()));
        assert!(t.remove(b"a"));
        assert!(!t.remove(b"a"));
        assert_eq!(t.get_working(b"a"), None);
    }

    #[test]
    fn working_hash_matches_next_save() {
        let mut t = tree();
        t.set(b"k1", b"v1");
        t.set(b"k2", b"v2");
        let working = t.working_hash();
        let (saved, version) = t.save();
        assert_eq!(working, saved);
        assert_eq!(version, 1);
    }

    #[test]
    fn versioned_reads_see_saved_values_only() {
        let mut t = tree();
        t.set(b"k", b"old");
        let (_, v1) = t.save();
        t.set(b"k", b"new");
        assert_eq!(t.get_versioned(b"k", v1), Some(b"old".to_vec()));
        assert_eq!(t.get_working(b"k"), Some(b"new".to_vec()));
        let (_, v2) = t.save();
        assert_eq!(t.get_versioned(b"k", v2), Some(b"new".to_vec()));
        assert_eq!(t.get_versioned(b"k", v1), Some(b"old".to_vec()));
    }

    #[test]
    fn reload_from_shared_db_restores_latest_version() {
        let db = MemDb::new();
        let mut t = MerkleTree::new(db.clone());
        t.set(b"balance:alice", b"100");
        t.set(b"balance:bob", b"50");
        let (hash, version) = t.save();

        let mut reloaded = MerkleTree::new(db);
        assert_eq!(reloaded.load().expect("load"), version);
        assert_eq!(reloaded.working_hash(), hash);
        assert_eq!(reloaded.get_working(b"balance:bob"), Some(b"50".to_vec()));
    }

    #[test]
    fn load_version_for_overwriting_discards_later_versions() {
        let db = MemDb::new();
        let mut t = MerkleTree::new(db);
        t.set(b"k", b"1");
        let (hash1, v1) = t.save();
        t.set(b"k", b"2");
        let (_, v2) = t.save();

        assert_eq!(t.load_version_for_overwriting(v1).expect("rollback"), v1);
        assert_eq!(t.working_hash(), hash1);
        assert_eq!(t.get_working(b"k"), Some(b"1".to_vec()));
        assert!(t.get_versioned(b"k", v2).is_none());
    }

    #[test]
    fn snapshot_restore_is_exact() {
        let mut t = tree();
        t.set(b"a", b"1");
        let before = t.working_hash();
        let snapshot = t.snapshot();
        t.set(b"a", b"2");
        t.set(b"b", b"3");
        t.remove(b"a");
        assert_ne!(t.working_hash(), before);
        t.restore(snapshot);
        assert_eq!(t.working_hash(), before);
        assert_eq!(t.get_working(b"a"), Some(b"1".to_vec()));
    }

    #[test]
    fn range_iteration_is_ordered_with_early_exit() {
        let mut t = tree();
        for key in [&b"stake:a"[..], b"stake:b", b"stake:c", b"vote:a"] {
            t.set(key, b"x");
        }
        let mut seen = vec![];
        t.iterate_range(b"stake:", None, true, |k, _| {
            if !k.starts_with(b"stake:") {
                return true;
            }
            seen.push(k.to_vec());
            false
        });
        assert_eq!(seen, vec![b"stake:a".to_vec(), b"stake:b".to_vec(), b"stake:c".to_vec()]);

        let mut reversed = vec![];
        t.iterate_range(b"stake:", Some(b"stake:z"), false, |k, _| {
            reversed.push(k.to_vec());
            false
        });
        assert_eq!(reversed, vec![b"stake:c".to_vec(), b"stake:b".to_vec(), b"stake:a".to_vec()]);
    }

    #[test]
    fn empty_tree_has_stable_hash() {
        let t = tree();
        assert_eq!(t.working_hash(), tree().working_hash());
    }

    proptest! {
        // Same mutation sequence on two replicas => same hash, and contents
        // agree with a BTreeMap reference model.
        #[test]
        fn determinism_and_model_equivalence(
            ops in prop::collection::vec(
                (prop::collection::vec(any::<u8>(), 1..8), any::<Option<u8>>()),
                0..200,
            )
        ) {
            let mut a = tree();
            let mut b = tree();
            let mut model = std::collections::BTreeMap::new();
            for (key, op) in &ops {
                match op {
                    Some(v) => {
                        a.set(key, &[*v]);
                        b.set(key, &[*v]);
                        model.insert(key.clone(), vec![*v]);
                    }
                    None => {
                        a.remove(key);
                        b.remove(key);
                        model.remove(key);
                    }
                }
            }
            prop_assert_eq!(a.working_hash(), b.working_hash());
            for (key, value) in &model {
                prop_assert_eq!(a.get_working(key), Some(value.clone()));
            }
            let mut count = 0;
            a.iterate_range(&[], None, true, |_, _| { count += 1; false });
            prop_assert_eq!(count, model.len());
        }
    }
}
