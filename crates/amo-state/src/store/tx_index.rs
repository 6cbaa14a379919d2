//! Search index for delivered transactions: block height → tx hashes, and
//! tx hash → block height. Fed by the replay preventer when it flushes a
//! block's staged hashes, and pruned as blocks age out of the grace window.

use amo_types::HexBytes;

use super::Store;

const INDEX_BLOCK_TX: &[u8] = b"blocktx:";
const INDEX_TX_BLOCK: &[u8] = b"txblock:";

fn block_tx_key(height: u64) -> Vec<u8> {
    [INDEX_BLOCK_TX, &height.to_be_bytes()[..]].concat()
}

fn tx_block_key(hash: &[u8]) -> Vec<u8> {
    [INDEX_TX_BLOCK, hash].concat()
}

impl Store {
    pub fn add_tx_index(&mut self, height: u64, hashes: &[Vec<u8>]) {
        let hex_hashes: Vec<HexBytes> = hashes.iter().map(|h| HexBytes(h.clone())).collect();
        let body = serde_json::to_vec(&hex_hashes).expect("hash list serializes infallibly");
        self.index.set(&block_tx_key(height), &body);
        for hash in hashes {
            self.index.set(&tx_block_key(hash), &height.to_be_bytes());
        }
    }

    pub fn tx_index_hashes(&self, height: u64) -> Vec<Vec<u8>> {
        let Some(body) = self.index.get(&block_tx_key(height)) else {
            return Vec::new();
        };
        serde_json::from_slice::<Vec<HexBytes>>(&body)
            .map(|hashes| hashes.into_iter().map(|h| h.0).collect())
            .unwrap_or_default()
    }

    pub fn tx_index_height(&self, hash: &[u8]) -> Option<u64> {
        let height = self.index.get(&tx_block_key(hash))?;
        Some(u64::from_be_bytes(height.as_slice().try_into().ok()?))
    }

    pub fn tx_index_delete(&mut self, height: u64) {
        let hashes = self.tx_index_hashes(height);
        self.index.delete(&block_tx_key(height));
        for hash in hashes {
            self.index.delete(&tx_block_key(&hash));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::store;

    #[test]
    fn index_roundtrip_and_prune() {
        let mut s = store();
        let hashes = vec![vec![1u8; 32], vec![2u8; 32]];
        s.add_tx_index(7, &hashes);

        assert_eq!(s.tx_index_hashes(7), hashes);
        assert_eq!(s.tx_index_height(&hashes[0]), Some(7));
        assert_eq!(s.tx_index_height(&hashes[1]), Some(7));
        assert_eq!(s.tx_index_height(&[3u8; 32]), None);

        s.tx_index_delete(7);
        assert!(s.tx_index_hashes(7).is_empty());
        assert_eq!(s.tx_index_height(&hashes[0]), None);
    }
}
