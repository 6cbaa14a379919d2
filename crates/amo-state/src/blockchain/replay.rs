use amo_types::Tx;

use crate::store::Store;

/// Rejects any tx whose hash was already delivered within the grace window.
///
/// Hashes staged during a block are flushed into the block↔tx index at
/// EndBlock; buckets older than the grace period are evicted once block
/// binding alone is enough to reject their txs.
pub struct ReplayPreventer {
    grace_period: u64,
    height: u64,
    staged: Vec<[u8; 32]>,
}

impl ReplayPreventer {
    pub fn new(grace_period: u64, last_height: u64) -> ReplayPreventer {
        ReplayPreventer {
            grace_period,
            height: last_height,
            staged: Vec::new(),
        }
    }

    /// Begin a new block at `height`, discarding any stale staging.
    pub fn update(&mut self, height: u64) {
        self.height = height;
        self.staged.clear();
    }

    /// Whether `tx_bytes` has not been seen in the replay window.
    pub fn check(&self, store: &Store, tx_bytes: &[u8]) -> bool {
        let hash = Tx::hash_bytes(tx_bytes);
        if self.staged.contains(&hash) {
            return false;
        }
        store.tx_index_height(&hash).is_none()
    }

    /// Check and stage. Returns false (without staging) on a replay; a
    /// second append of the same tx within a block also returns false.
    pub fn append(&mut self, store: &Store, tx_bytes: &[u8]) -> bool {
        if !self.check(store, tx_bytes) {
            return false;
        }
        self.staged.push(Tx::hash_bytes(tx_bytes));
        true
    }

    /// Flush the block's staged hashes into the index and evict the bucket
    /// that has aged out of the window.
    pub fn index(&mut self, store: &mut Store) {
        let staged: Vec<Vec<u8>> = self.staged.drain(..).map(|h| h.to_vec()).collect();
        if !staged.is_empty() {
            store.add_tx_index(self.height, &staged);
        }
        if self.height > self.grace_period {
            store.tx_index_delete(self.height - self.grace_period - 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemDb;

    fn store() -> Store {
        Store::new(MemDb::new(), MemDb::new(), MemDb::new())
    }

    #[test]
    fn append_is_idempotent_within_a_block() {
        let mut store = store();
        let mut preventer = ReplayPreventer::new(5, 0);
        preventer.update(1);
        assert!(preventer.append(&store, b"tx-1"));
        assert!(!preventer.append(&store, b"tx-1"));
        assert!(preventer.append(&store, b"tx-2"));
        preventer.index(&mut store);
    }

    #[test]
    fn indexed_tx_is_rejected_in_later_blocks() {
        let mut store = store();
        let mut preventer = ReplayPreventer::new(5, 0);
        preventer.update(1);
        assert!(preventer.append(&store, b"tx-1"));
        preventer.index(&mut store);

        preventer.update(2);
        assert!(!preventer.check(&store, b"tx-1"));
        assert!(!preventer.append(&store, b"tx-1"));
        assert!(preventer.check(&store, b"tx-2"));
    }

    #[test]
    fn buckets_age_out_after_grace() {
        let mut store = store();
        let grace = 3;
        let mut preventer = ReplayPreventer::new(grace, 0);
        preventer.update(1);
        assert!(preventer.append(&store, b"tx-1"));
        preventer.index(&mut store);

        // height 1's bucket is evicted when block binding alone rejects its txs
        for height in 2..=(grace + 2) {
            preventer.update(height);
            preventer.index(&mut store);
        }
        assert_eq!(store.tx_index_height(&Tx::hash_bytes(b"tx-1")), None);
    }
}
